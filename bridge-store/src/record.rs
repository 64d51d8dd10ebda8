//! BSON wire records and their conversion into domain types.
//!
//! Upstream writers are not uniform: `_id` may be a string or an ObjectId,
//! `_v` may be a plain integer or a `{ value }` clock object, and `blob` is
//! normally binary but occasionally a string. Decoding accepts all of these.

use std::collections::BTreeMap;

use bson::{oid::ObjectId, Bson, Document as BsonDocument};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use bridge_core::{Document, DocumentId, IntentId, PushIntent};

use crate::error::StoreError;
use crate::store::{DOCUMENTS_COLLECTION, INTENTS_COLLECTION};

#[derive(Debug, Deserialize)]
struct IntentRecord {
    #[serde(rename = "_id")]
    id: Bson,
    #[serde(default)]
    repo: String,
    #[serde(default)]
    branch: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    message: String,
    timestamp: Option<bson::DateTime>,
    #[serde(default)]
    processed: bool,
    processed_at: Option<bson::DateTime>,
    error: Option<String>,
    #[serde(default)]
    documents: Vec<Bson>,
}

#[derive(Debug, Deserialize)]
struct DocumentRecord {
    #[serde(rename = "_id")]
    id: Bson,
    #[serde(default)]
    repo: String,
    #[serde(default)]
    branch: String,
    #[serde(default)]
    path: String,
    blob: Option<Bson>,
    #[serde(default)]
    author: String,
    #[serde(rename = "_v")]
    version: Option<Bson>,
    timestamp: Option<bson::DateTime>,
    #[serde(default)]
    metadata: BsonDocument,
}

/// Decode a raw `push_intents` record.
pub fn decode_intent(raw: BsonDocument) -> Result<PushIntent, StoreError> {
    let record: IntentRecord = bson::from_document(raw).map_err(|err| StoreError::Decode {
        collection: INTENTS_COLLECTION,
        reason: err.to_string(),
    })?;

    let id = id_string(&record.id).ok_or_else(|| StoreError::Decode {
        collection: INTENTS_COLLECTION,
        reason: format!("unsupported _id {:?}", record.id),
    })?;

    let mut documents = Vec::with_capacity(record.documents.len());
    for raw_id in &record.documents {
        let doc_id = id_string(raw_id).ok_or_else(|| StoreError::Decode {
            collection: INTENTS_COLLECTION,
            reason: format!("unsupported document reference {raw_id:?} in intent {id}"),
        })?;
        documents.push(DocumentId(doc_id));
    }

    Ok(PushIntent {
        id: IntentId(id),
        repo: record.repo,
        branch: record.branch,
        author: record.author,
        message: record.message,
        timestamp: record.timestamp.map(to_chrono).unwrap_or_default(),
        processed: record.processed,
        processed_at: record.processed_at.map(to_chrono),
        error: record.error.filter(|e| !e.is_empty()),
        documents,
    })
}

/// Decode a raw `documents` record.
pub fn decode_document(raw: BsonDocument) -> Result<Document, StoreError> {
    let record: DocumentRecord = bson::from_document(raw).map_err(|err| StoreError::Decode {
        collection: DOCUMENTS_COLLECTION,
        reason: err.to_string(),
    })?;

    let id = id_string(&record.id).ok_or_else(|| StoreError::Decode {
        collection: DOCUMENTS_COLLECTION,
        reason: format!("unsupported _id {:?}", record.id),
    })?;

    let blob = match record.blob {
        None | Some(Bson::Null) => Vec::new(),
        Some(Bson::Binary(binary)) => binary.bytes,
        Some(Bson::String(text)) => text.into_bytes(),
        Some(other) => {
            return Err(StoreError::Decode {
                collection: DOCUMENTS_COLLECTION,
                reason: format!("document {id} has non-binary blob of type {:?}", other.element_type()),
            })
        }
    };

    let version = match record.version {
        None => 0,
        Some(raw) => version_number(&raw).ok_or_else(|| StoreError::Decode {
            collection: DOCUMENTS_COLLECTION,
            reason: format!("document {id} has unreadable _v {raw:?}"),
        })?,
    };

    let metadata: BTreeMap<String, serde_json::Value> = record
        .metadata
        .into_iter()
        .map(|(key, value)| (key, value.into_relaxed_extjson()))
        .collect();

    Ok(Document {
        id: DocumentId(id),
        repo: record.repo,
        branch: record.branch,
        path: record.path,
        blob,
        author: record.author,
        version,
        timestamp: record.timestamp.map(to_chrono).unwrap_or_default(),
        metadata,
    })
}

/// Every BSON encoding an id string may be stored under.
pub fn id_candidates(id: &str) -> Vec<Bson> {
    let mut candidates = vec![Bson::String(id.to_string())];
    if let Ok(oid) = ObjectId::parse_str(id) {
        candidates.push(Bson::ObjectId(oid));
    }
    candidates
}

fn id_string(raw: &Bson) -> Option<String> {
    match raw {
        Bson::String(s) => Some(s.clone()),
        Bson::ObjectId(oid) => Some(oid.to_hex()),
        Bson::Int32(n) => Some(n.to_string()),
        Bson::Int64(n) => Some(n.to_string()),
        _ => None,
    }
}

fn version_number(raw: &Bson) -> Option<i64> {
    match raw {
        Bson::Int32(n) => Some(i64::from(*n)),
        Bson::Int64(n) => Some(*n),
        Bson::Double(f) if f.fract() == 0.0 => Some(*f as i64),
        Bson::Document(clock) => clock.get("value").and_then(version_number),
        _ => None,
    }
}

fn to_chrono(value: bson::DateTime) -> DateTime<Utc> {
    value.to_chrono()
}
