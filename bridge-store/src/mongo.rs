//! MongoDB-backed [`IntentStore`].

use std::time::Duration;

use async_trait::async_trait;
use bson::{doc, Bson, Document as BsonDocument};
use futures::{StreamExt, TryStreamExt};
use mongodb::{
    options::{ClientOptions, FullDocumentType, IndexOptions, ServerApi, ServerApiVersion},
    Client, Collection, Database, IndexModel,
};

use bridge_core::{Document, DocumentId, IntentId, PushIntent};

use crate::error::{query_err, StoreError};
use crate::record::{decode_document, decode_intent, id_candidates};
use crate::store::{order_by_ids, IntentFeed, IntentStore, DOCUMENTS_COLLECTION, INTENTS_COLLECTION};

const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared handle to one MongoDB database. Cheap to clone; every call is
/// issued independently on the driver's connection pool.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    database: Database,
}

impl MongoStore {
    /// Connect and verify the connection with a bounded `ping`.
    pub async fn connect(uri: &str, database: &str) -> Result<Self, StoreError> {
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|err| StoreError::Connect(err.to_string()))?;
        options.server_api = Some(ServerApi::builder().version(ServerApiVersion::V1).build());
        options.app_name = Some("github-bridge".to_string());

        let client =
            Client::with_options(options).map_err(|err| StoreError::Connect(err.to_string()))?;

        match tokio::time::timeout(
            PING_TIMEOUT,
            client.database("admin").run_command(doc! { "ping": 1 }),
        )
        .await
        {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => return Err(StoreError::Connect(format!("ping failed: {err}"))),
            Err(_) => {
                return Err(StoreError::Connect(format!(
                    "ping timed out after {}s",
                    PING_TIMEOUT.as_secs()
                )))
            }
        }

        tracing::info!(database, "connected to MongoDB");
        Ok(Self {
            database: client.database(database),
            client,
        })
    }

    fn intents(&self) -> Collection<BsonDocument> {
        self.database.collection(INTENTS_COLLECTION)
    }

    fn documents(&self) -> Collection<BsonDocument> {
        self.database.collection(DOCUMENTS_COLLECTION)
    }
}

#[async_trait]
impl IntentStore for MongoStore {
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<PushIntent>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut cursor = self
            .intents()
            .find(doc! { "processed": false })
            .sort(doc! { "timestamp": 1 })
            .limit(limit)
            .await
            .map_err(query_err("find", INTENTS_COLLECTION))?;

        let mut intents = Vec::new();
        while let Some(raw) = cursor
            .try_next()
            .await
            .map_err(query_err("find", INTENTS_COLLECTION))?
        {
            match decode_intent(raw) {
                Ok(intent) => intents.push(intent),
                Err(err) => tracing::warn!(error = %err, "skipping undecodable push intent"),
            }
        }
        Ok(intents)
    }

    async fn fetch_documents(&self, ids: &[DocumentId]) -> Result<Vec<Document>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let candidates: Vec<Bson> = ids.iter().flat_map(|id| id_candidates(&id.0)).collect();

        let mut cursor = self
            .documents()
            .find(doc! { "_id": { "$in": candidates } })
            .await
            .map_err(query_err("find", DOCUMENTS_COLLECTION))?;

        let mut documents = Vec::with_capacity(ids.len());
        while let Some(raw) = cursor
            .try_next()
            .await
            .map_err(query_err("find", DOCUMENTS_COLLECTION))?
        {
            documents.push(decode_document(raw)?);
        }
        Ok(order_by_ids(ids, documents))
    }

    async fn mark_processed(&self, id: &IntentId, error: Option<&str>) -> Result<(), StoreError> {
        let mut set = doc! {
            "processed": true,
            "processed_at": bson::DateTime::now(),
        };
        if let Some(message) = error {
            set.insert("error", message);
        }

        let result = self
            .intents()
            .update_one(
                doc! { "_id": { "$in": id_candidates(&id.0) } },
                doc! { "$set": set },
            )
            .await
            .map_err(query_err("update", INTENTS_COLLECTION))?;

        if result.matched_count == 0 {
            return Err(StoreError::IntentNotFound(id.clone()));
        }
        Ok(())
    }

    async fn watch_pending(&self) -> Result<IntentFeed, StoreError> {
        let pipeline = vec![doc! {
            "$match": {
                "operationType": "insert",
                "fullDocument.processed": false,
            }
        }];

        let stream = self
            .intents()
            .watch()
            .pipeline(pipeline)
            .full_document(FullDocumentType::UpdateLookup)
            .await
            .map_err(|err| StoreError::Feed(err.to_string()))?;

        let feed = stream.filter_map(|event| async move {
            match event {
                Ok(event) => {
                    let raw = event.full_document?;
                    match decode_intent(raw) {
                        Ok(intent) if intent.is_pending() => Some(Ok(intent)),
                        Ok(_) => None,
                        Err(err) => {
                            tracing::error!(error = %err, "failed to decode change event");
                            None
                        }
                    }
                }
                Err(err) => Some(Err(StoreError::Feed(err.to_string()))),
            }
        });
        Ok(feed.boxed())
    }

    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        let intent_indexes = vec![
            IndexModel::builder()
                .keys(doc! { "processed": 1, "timestamp": 1 })
                .build(),
            IndexModel::builder().keys(doc! { "repo": 1 }).build(),
            IndexModel::builder().keys(doc! { "branch": 1 }).build(),
        ];
        self.intents()
            .create_indexes(intent_indexes)
            .await
            .map_err(query_err("create_indexes", INTENTS_COLLECTION))?;

        let document_indexes = vec![
            IndexModel::builder()
                .keys(doc! { "repo": 1, "branch": 1, "path": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build(),
            IndexModel::builder().keys(doc! { "timestamp": -1 }).build(),
        ];
        self.documents()
            .create_indexes(document_indexes)
            .await
            .map_err(query_err("create_indexes", DOCUMENTS_COLLECTION))?;

        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.client.clone().shutdown().await;
        tracing::info!("MongoDB connection closed");
        Ok(())
    }
}
