mod common;

use std::sync::Arc;
use std::time::Duration;

use bridge_daemon::{Bridge, BridgeMetrics, BridgeParts, DaemonError, LifecycleState};
use bridge_store::MemoryStore;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use common::{intents, wait_until, FakeProcessor, FixedIntake};

fn bridge(
    intents: Vec<bridge_core::PushIntent>,
    processor: Arc<FakeProcessor>,
    workers: usize,
    metrics: BridgeMetrics,
) -> Bridge {
    Bridge::new(BridgeParts {
        store: Arc::new(MemoryStore::new()),
        intake: Box::new(FixedIntake(intents)),
        processor,
        worker_count: workers,
        queue_capacity: 16,
        metrics,
    })
}

#[tokio::test(start_paused = true)]
async fn workers_process_in_parallel() {
    let processor = FakeProcessor::sleeping(Duration::from_millis(100));
    let metrics = BridgeMetrics::detached().unwrap();
    let mut bridge = bridge(intents(6), processor.clone(), 3, metrics.clone());

    let started = Instant::now();
    bridge.start().unwrap();
    wait_until(|| processor.finished() == 6).await;
    let elapsed = started.elapsed();

    // ceil(6 / 3) rounds of 100ms each.
    assert!(elapsed >= Duration::from_millis(200), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(250), "{elapsed:?}");
    assert_eq!(metrics.active_workers.get(), 3);
    assert_eq!(metrics.queue_size.get(), 0);

    let report = bridge.shutdown(Duration::from_secs(5)).await.unwrap();
    assert!(!report.timed_out);
    assert_eq!(metrics.active_workers.get(), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_lets_in_flight_runs_finish_and_dequeues_nothing_new() {
    let gate = Arc::new(Semaphore::new(0));
    let processor = FakeProcessor::gated(gate.clone());
    let mut bridge = bridge(
        intents(5),
        processor.clone(),
        3,
        BridgeMetrics::detached().unwrap(),
    );

    bridge.start().unwrap();
    wait_until(|| processor.started() == 3).await;

    let release = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        gate.add_permits(5);
    };
    let (report, ()) = tokio::join!(bridge.shutdown(Duration::from_secs(30)), release);

    assert!(!report.unwrap().timed_out);
    assert_eq!(processor.finished(), 3, "the three in-flight runs complete");
    assert_eq!(processor.started(), 3, "queued intents are not picked up");
    assert_eq!(bridge.state(), LifecycleState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn drain_timeout_is_reported_and_bridge_still_stops() {
    let gate = Arc::new(Semaphore::new(0));
    let processor = FakeProcessor::gated(gate);
    let mut bridge = bridge(
        intents(2),
        processor.clone(),
        2,
        BridgeMetrics::detached().unwrap(),
    );

    bridge.start().unwrap();
    wait_until(|| processor.started() == 2).await;

    let started = Instant::now();
    let report = bridge.shutdown(Duration::from_secs(1)).await.unwrap();

    assert!(report.timed_out);
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(processor.finished(), 0);
    assert_eq!(bridge.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn lifecycle_transitions_are_enforced() {
    let processor = FakeProcessor::sleeping(Duration::ZERO);
    let mut bridge = bridge(vec![], processor, 1, BridgeMetrics::detached().unwrap());
    assert_eq!(bridge.state(), LifecycleState::Idle);

    let early = bridge.shutdown(Duration::from_secs(1)).await;
    assert!(matches!(
        early,
        Err(DaemonError::Lifecycle {
            state: LifecycleState::Idle,
            ..
        })
    ));

    bridge.start().unwrap();
    assert_eq!(bridge.state(), LifecycleState::Running);
    assert!(matches!(
        bridge.start(),
        Err(DaemonError::Lifecycle {
            state: LifecycleState::Running,
            ..
        })
    ));

    bridge.shutdown(Duration::from_secs(1)).await.unwrap();
    assert_eq!(bridge.state(), LifecycleState::Stopped);
    assert!(bridge.start().is_err());
}
