//! Lifecycle controller and process entry points.
//!
//! ```text
//! Idle ──start──▶ Running ──shutdown──▶ Draining ──▶ Stopped
//! ```
//!
//! Shutdown order: cancel, wait for intake to return (which drops the only
//! queue sender and closes the queue), wait for workers up to the drain
//! timeout, then close the store.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use bridge_core::BridgeConfig;
use bridge_store::{IntentStore, MongoStore};
use bridge_sync::{SyncPipeline, SyncSettings};

use crate::error::{io_err, DaemonError};
use crate::intake::{FeedIntake, Intake, PollIntake};
use crate::metrics::{BridgeMetrics, MetricsRegistry};
use crate::queue::work_queue;
use crate::server;
use crate::telemetry::init_tracing;
use crate::worker::{spawn_workers, IntentProcessor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Running,
    Draining,
    Stopped,
}

/// What a finished drain looked like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Whether the drain timeout expired with work still running.
    pub timed_out: bool,
}

/// Components a [`Bridge`] is assembled from.
pub struct BridgeParts {
    pub store: Arc<dyn IntentStore>,
    pub intake: Box<dyn Intake>,
    pub processor: Arc<dyn IntentProcessor>,
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub metrics: BridgeMetrics,
}

pub struct Bridge {
    state: LifecycleState,
    parts: Option<BridgeParts>,
    store: Arc<dyn IntentStore>,
    cancel: CancellationToken,
    intake: Option<JoinHandle<()>>,
    workers: JoinSet<()>,
}

impl Bridge {
    pub fn new(parts: BridgeParts) -> Self {
        Self {
            state: LifecycleState::Idle,
            store: Arc::clone(&parts.store),
            parts: Some(parts),
            cancel: CancellationToken::new(),
            intake: None,
            workers: JoinSet::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Spawn intake and the worker pool.
    pub fn start(&mut self) -> Result<(), DaemonError> {
        let parts = match (self.state, self.parts.take()) {
            (LifecycleState::Idle, Some(parts)) => parts,
            (state, parts) => {
                self.parts = parts;
                return Err(DaemonError::Lifecycle {
                    state,
                    action: "start",
                });
            }
        };

        let BridgeParts {
            intake,
            processor,
            worker_count,
            queue_capacity,
            metrics,
            ..
        } = parts;

        let (sender, receiver) = work_queue(queue_capacity, metrics.clone());
        tracing::info!(
            mode = intake.mode(),
            workers = worker_count,
            queue_capacity,
            "starting bridge"
        );

        let cancel = self.cancel.clone();
        self.intake = Some(tokio::spawn(async move {
            intake.run(sender, cancel).await;
        }));
        spawn_workers(
            &mut self.workers,
            worker_count,
            receiver,
            processor,
            metrics,
            self.cancel.clone(),
        );

        self.state = LifecycleState::Running;
        Ok(())
    }

    /// Stop intake, let in-flight runs finish for at most `timeout`, then
    /// close the store. Runs still going at the deadline are abandoned.
    pub async fn shutdown(&mut self, timeout: Duration) -> Result<DrainReport, DaemonError> {
        if self.state != LifecycleState::Running {
            return Err(DaemonError::Lifecycle {
                state: self.state,
                action: "shut down",
            });
        }
        self.state = LifecycleState::Draining;
        tracing::info!(timeout_secs = timeout.as_secs(), "draining bridge");

        let deadline = Instant::now() + timeout;
        self.cancel.cancel();

        let mut timed_out = false;
        if let Some(mut intake) = self.intake.take() {
            match tokio::time::timeout_at(deadline, &mut intake).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::error!(error = %err, "intake task failed"),
                Err(_) => {
                    intake.abort();
                    timed_out = true;
                }
            }
        }

        let drained = tokio::time::timeout_at(deadline, async {
            while let Some(joined) = self.workers.join_next().await {
                if let Err(err) = joined {
                    tracing::error!(error = %err, "worker task failed");
                }
            }
        })
        .await
        .is_ok();
        if !drained {
            timed_out = true;
            tracing::warn!(
                still_running = self.workers.len(),
                "shutdown timeout exceeded; abandoning in-flight work"
            );
            self.workers.abort_all();
        }

        if let Err(err) = self.store.close().await {
            tracing::warn!(error = %err, "failed to close store");
        }
        self.state = LifecycleState::Stopped;
        tracing::info!(timed_out, "bridge stopped");
        Ok(DrainReport { timed_out })
    }
}

/// Initialise tracing, then run the bridge on a fresh multi-threaded runtime
/// until SIGINT or SIGTERM.
pub fn start_blocking(config: BridgeConfig) -> Result<(), DaemonError> {
    init_tracing(&config.log_level, config.log_format);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(config))
}

/// Connect to MongoDB and run the bridge until a shutdown signal arrives.
pub async fn run(config: BridgeConfig) -> Result<(), DaemonError> {
    config.validate()?;
    let store = MongoStore::connect(&config.mongodb_uri, &config.mongodb_database).await?;
    if let Err(err) = store.ensure_indexes().await {
        tracing::warn!(error = %err, "failed to create indexes");
    }
    run_with_store(config, Arc::new(store), shutdown_signal()).await
}

/// Run the bridge against `store` until `shutdown` resolves.
pub async fn run_with_store<F>(
    config: BridgeConfig,
    store: Arc<dyn IntentStore>,
    shutdown: F,
) -> Result<(), DaemonError>
where
    F: std::future::Future<Output = Result<&'static str, DaemonError>>,
{
    let registry = Arc::new(MetricsRegistry::new()?);
    let metrics = registry.metrics().clone();

    let pipeline = SyncPipeline::new(Arc::clone(&store), SyncSettings::from_config(&config))
        .with_observer(Arc::new(metrics.clone()));
    let intake: Box<dyn Intake> = if config.use_feed {
        Box::new(FeedIntake::new(
            Arc::clone(&store),
            config.feed_reconnect_delay,
            metrics.clone(),
        ))
    } else {
        Box::new(PollIntake::new(
            Arc::clone(&store),
            config.poll_interval,
            config.batch_size,
            metrics.clone(),
        ))
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| DaemonError::Bind { addr, source })?;
    let server_shutdown = CancellationToken::new();
    let server = tokio::spawn(server::serve(
        listener,
        server::router(registry),
        server_shutdown.clone(),
    ));

    let mut bridge = Bridge::new(BridgeParts {
        store,
        intake,
        processor: Arc::new(pipeline),
        worker_count: config.worker_count,
        queue_capacity: config.batch_size,
        metrics,
    });
    bridge.start()?;
    if config.dry_run {
        tracing::warn!("dry run: intents are marked processed without committing or pushing");
    }

    match shutdown.await {
        Ok(signal) => tracing::info!(signal, "shutdown requested"),
        Err(err) => tracing::error!(error = %err, "shutdown signal failed; stopping"),
    }
    let report = bridge.shutdown(config.shutdown_timeout).await?;

    server_shutdown.cancel();
    handle_join("observability server", server.await)?;
    if report.timed_out {
        tracing::warn!("bridge stopped before all in-flight work finished");
    }
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix, with the signal's name.
pub async fn shutdown_signal() -> Result<&'static str, DaemonError> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())
            .map_err(|err| DaemonError::Signal(err.to_string()))?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.map_err(|err| DaemonError::Signal(err.to_string()))?;
                Ok("SIGINT")
            }
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .map_err(|err| DaemonError::Signal(err.to_string()))?;
        Ok("ctrl-c")
    }
}

fn handle_join(
    task: &'static str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Task {
            task,
            reason: err.to_string(),
        }),
    }
}
