//! Bridge daemon: intake, work queue, worker pool and lifecycle.
//!
//! - [`intake`] — poll and feed strategies behind [`Intake`]
//! - [`queue`] — bounded queue with in-flight leases
//! - [`worker`] — worker pool over an [`IntentProcessor`]
//! - [`runtime`] — [`Bridge`] lifecycle, signal handling, entry points
//! - [`metrics`] / [`server`] — Prometheus registry and the HTTP surface

mod error;
pub mod intake;
pub mod metrics;
pub mod queue;
pub mod runtime;
pub mod server;
mod telemetry;
pub mod worker;

pub use error::DaemonError;
pub use intake::{FeedIntake, Intake, PollIntake};
pub use metrics::{BridgeMetrics, MetricsRegistry};
pub use queue::{work_queue, Enqueue, Job, WorkReceiver, WorkSender};
pub use runtime::{
    run, run_with_store, shutdown_signal, start_blocking, Bridge, BridgeParts, DrainReport,
    LifecycleState,
};
pub use telemetry::init_tracing;
pub use worker::IntentProcessor;
