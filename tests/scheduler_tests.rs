use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use hera_lite::config::QueueConfig;
use hera_lite::error::HeraError;
use hera_lite::protocol::{frame, Frame, Operation, Response, WorkerInfo};
use hera_lite::scheduler::{
    ConnectionRegistry, DispatchEvent, DispatchOutcome, DispatchQueues, Dispatcher, ExecuteKind,
    JobElement, QueueKind,
};
use hera_lite::service::{
    HistoryRecord, HistoryStore, HostGroup, MemoryHistoryStore, RunStatus, TriggerType,
};

fn worker_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 40000))
}

fn worker_info(host: &str, groups: &[i32], max_parallel: u32) -> WorkerInfo {
    WorkerInfo {
        host: host.to_string(),
        host_groups: groups.to_vec(),
        max_parallel,
    }
}

async fn connect(
    registry: &ConnectionRegistry,
    host: &str,
    groups: &[i32],
    max_parallel: u32,
) -> (Uuid, mpsc::Receiver<Frame>) {
    let id = Uuid::new_v4();
    let (tx, rx) = mpsc::channel(16);
    registry
        .on_connect(id, worker_addr(), worker_info(host, groups, max_parallel), tx)
        .await;
    (id, rx)
}

// =============================================================================
// Queues
// =============================================================================

#[tokio::test]
async fn test_schedule_queue_drains_by_priority() {
    let queues = DispatchQueues::new(QueueConfig::default());
    for (i, priority) in [5, 1, 3].into_iter().enumerate() {
        queues
            .push(JobElement::schedule(format!("J{}", i), format!("H{}", i), priority, 1))
            .await
            .unwrap();
    }

    let mut drained = Vec::new();
    while let Some(element) = queues.try_pop(QueueKind::Schedule).await {
        drained.push(element.priority);
    }
    assert_eq!(drained, vec![1, 3, 5]);
}

#[tokio::test]
async fn test_equal_priorities_keep_arrival_order() {
    let queues = DispatchQueues::new(QueueConfig::default());
    for id in ["a", "b", "c"] {
        queues
            .push(JobElement::schedule(id, id, 2, 1))
            .await
            .unwrap();
    }
    queues
        .push(JobElement::schedule("urgent", "urgent", 0, 1))
        .await
        .unwrap();

    let mut drained = Vec::new();
    while let Some(element) = queues.try_pop(QueueKind::Schedule).await {
        drained.push(element.job_id);
    }
    assert_eq!(drained, vec!["urgent", "a", "b", "c"]);
}

#[tokio::test]
async fn test_debug_queue_rejects_past_capacity() {
    let queues = DispatchQueues::new(QueueConfig::default());
    for i in 0..1000 {
        queues
            .push(JobElement::new(ExecuteKind::Debug, "", format!("D{}", i), 1))
            .await
            .unwrap();
    }

    let result = queues
        .push(JobElement::new(ExecuteKind::Debug, "", "D1000", 1))
        .await;
    assert!(matches!(
        result,
        Err(HeraError::QueueFull {
            queue: "debug",
            capacity: 1000
        })
    ));
    assert_eq!(queues.len(QueueKind::Debug).await, 1000);
    // Other queues are unaffected.
    assert!(queues
        .push(JobElement::new(ExecuteKind::Manual, "J1", "H1", 1))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_retry_queue_never_rejects() {
    let queues = DispatchQueues::new(QueueConfig {
        schedule_capacity: 1,
        manual_capacity: 1,
        debug_capacity: 1,
    });
    for i in 0..50 {
        queues
            .push_retry(JobElement::new(ExecuteKind::Manual, "J1", format!("H{}", i), 1))
            .await;
    }
    assert_eq!(queues.len(QueueKind::Exception).await, 50);
    assert!(queues.is_empty(QueueKind::Manual).await);
}

#[tokio::test]
async fn test_pop_waits_for_push() {
    let queues = Arc::new(DispatchQueues::new(QueueConfig::default()));

    let waiter = {
        let queues = queues.clone();
        tokio::spawn(async move { queues.pop(QueueKind::Manual).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    queues
        .push(JobElement::new(ExecuteKind::Manual, "J1", "H1", 1))
        .await
        .unwrap();
    let element = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(element.history_id, "H1");
}

// =============================================================================
// Connection registry
// =============================================================================

#[tokio::test]
async fn test_assign_picks_least_loaded_worker_in_group() {
    let registry = ConnectionRegistry::new();
    let (a, _rx_a) = connect(&registry, "worker-a", &[1], 4).await;
    let (b, _rx_b) = connect(&registry, "worker-b", &[1], 4).await;
    let (_c, _rx_c) = connect(&registry, "worker-c", &[2], 4).await;

    let first = registry
        .assign(&JobElement::schedule("J1", "H1", 0, 1))
        .await
        .unwrap();
    let second = registry
        .assign(&JobElement::schedule("J2", "H2", 0, 1))
        .await
        .unwrap();

    // Both land in group 1, one on each worker.
    let mut used = vec![first.connection, second.connection];
    used.sort();
    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(used, expected);
    assert_ne!(first.request_id, second.request_id);
    assert_eq!(registry.in_flight().await, 2);
}

#[tokio::test]
async fn test_no_eligible_worker() {
    let registry = ConnectionRegistry::new();
    let (_a, _rx) = connect(&registry, "worker-a", &[1], 1).await;

    assert!(registry.select_worker(7).await.is_none());
    let err = registry
        .assign(&JobElement::schedule("J1", "H1", 0, 7))
        .await
        .unwrap_err();
    assert!(matches!(err, HeraError::NoEligibleWorker(7)));
    assert_eq!(registry.in_flight().await, 0);
}

#[tokio::test]
async fn test_saturated_group_still_assigns() {
    let registry = ConnectionRegistry::new();
    let (a, _rx) = connect(&registry, "worker-a", &[1], 1).await;

    let first = registry
        .assign(&JobElement::schedule("J1", "H1", 0, 1))
        .await
        .unwrap();
    // Full, but it still serves the group: its pool queues the run.
    let second = registry
        .assign(&JobElement::schedule("J2", "H2", 0, 1))
        .await
        .unwrap();

    assert_eq!(first.connection, a);
    assert_eq!(second.connection, a);
    assert_eq!(registry.in_flight().await, 2);
}

#[tokio::test]
async fn test_assign_prefers_worker_with_free_slots() {
    let registry = ConnectionRegistry::new();
    let (small, _rx_small) = connect(&registry, "worker-small", &[1], 1).await;
    let (big, _rx_big) = connect(&registry, "worker-big", &[1], 8).await;

    // Load both workers to one run each.
    for (job, hist) in [("J1", "H1"), ("J2", "H2")] {
        registry
            .assign(&JobElement::schedule(job, hist, 0, 1))
            .await
            .unwrap();
    }
    let summaries = registry.summaries().await;
    assert!(summaries.iter().all(|w| w.running == 1));

    // Equal load: the worker that is not full wins.
    let third = registry
        .assign(&JobElement::schedule("J3", "H3", 0, 1))
        .await
        .unwrap();
    assert_eq!(third.connection, big);
    assert_ne!(third.connection, small);
}

#[tokio::test]
async fn test_host_group_cache_grants_membership() {
    let registry = ConnectionRegistry::new();
    let (a, _rx) = connect(&registry, "batch-01", &[], 0).await;
    assert!(registry.select_worker(5).await.is_none());

    let mut groups = HashMap::new();
    groups.insert(
        5,
        HostGroup {
            id: 5,
            name: "batch".to_string(),
            hosts: vec!["batch-01".to_string()],
        },
    );
    registry.set_host_groups(groups).await;

    assert_eq!(registry.select_worker(5).await, Some(a));
    assert_eq!(registry.host_group(5).await.unwrap().name, "batch");
}

#[tokio::test]
async fn test_release_and_disconnect_hand_back_elements() {
    let registry = ConnectionRegistry::new();
    let id = Uuid::new_v4();
    let (tx, _rx) = mpsc::channel(4);
    let closed = registry
        .on_connect(id, worker_addr(), worker_info("worker-a", &[1], 0), tx)
        .await;

    let done = registry
        .assign(&JobElement::schedule("J1", "H1", 0, 1))
        .await
        .unwrap();
    let _pending = registry
        .assign(&JobElement::schedule("J2", "H2", 0, 1))
        .await
        .unwrap();

    let released = registry.release(id, done.request_id).await.unwrap();
    assert_eq!(released.job_id, "J1");
    // Releasing twice finds nothing.
    assert!(registry.release(id, done.request_id).await.is_none());

    let orphans = registry.on_disconnect(id).await;
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].job_id, "J2");
    assert!(closed.is_cancelled());
    assert_eq!(registry.worker_count().await, 0);
    assert!(registry.on_disconnect(id).await.is_empty());
}

#[tokio::test]
async fn test_stale_workers_and_heartbeats() {
    let registry = ConnectionRegistry::new();
    let (a, _rx_a) = connect(&registry, "worker-a", &[1], 0).await;
    let (b, _rx_b) = connect(&registry, "worker-b", &[1], 0).await;

    tokio::time::sleep(Duration::from_millis(120)).await;
    registry.heartbeat(a).await;

    let stale = registry.stale_workers(Duration::from_millis(100)).await;
    assert_eq!(stale, vec![b]);
}

#[tokio::test]
async fn test_summaries_report_load() {
    let registry = ConnectionRegistry::new();
    let (_a, _rx) = connect(&registry, "worker-a", &[3, 1], 2).await;
    registry
        .assign(&JobElement::schedule("J1", "H1", 0, 1))
        .await
        .unwrap();

    let summaries = registry.summaries().await;
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].host, "worker-a");
    assert_eq!(summaries[0].host_groups, vec![1, 3]);
    assert_eq!(summaries[0].running, 1);
    assert_eq!(summaries[0].max_parallel, 2);
}

// =============================================================================
// Dispatcher
// =============================================================================

struct DispatchFixture {
    queues: Arc<DispatchQueues>,
    registry: Arc<ConnectionRegistry>,
    history: Arc<MemoryHistoryStore>,
    dispatcher: Dispatcher,
}

async fn dispatch_fixture(max_attempts: u32) -> DispatchFixture {
    let queues = Arc::new(DispatchQueues::new(QueueConfig::default()));
    let registry = Arc::new(ConnectionRegistry::new());
    let history = Arc::new(MemoryHistoryStore::new());
    let debug_history = Arc::new(MemoryHistoryStore::new());
    history
        .insert(HistoryRecord::new("H1", "J1", TriggerType::Schedule).with_host_group(1))
        .await;
    let dispatcher = Dispatcher::new(
        queues.clone(),
        registry.clone(),
        history.clone(),
        debug_history,
        max_attempts,
        Duration::from_millis(10),
    );
    DispatchFixture {
        queues,
        registry,
        history,
        dispatcher,
    }
}

#[tokio::test]
async fn test_dispatch_sends_request_to_worker() {
    let fx = dispatch_fixture(3).await;
    let (id, mut rx) = connect(&fx.registry, "worker-a", &[1], 0).await;
    let mut events = fx.dispatcher.subscribe();

    let outcome = fx
        .dispatcher
        .dispatch(JobElement::schedule("J1", "H1", 0, 1))
        .await;
    let DispatchOutcome::Sent {
        connection,
        request_id,
    } = outcome
    else {
        panic!("expected Sent, got {:?}", outcome);
    };
    assert_eq!(connection, id);

    let frame = rx.recv().await.unwrap();
    let Some(frame::Payload::Request(request)) = frame.payload else {
        panic!("expected a request frame");
    };
    assert_eq!(request.request_id, request_id);
    assert_eq!(request.operation, Operation::Schedule as i32);
    let message = request.execute_message().unwrap();
    assert_eq!(message.job_id, "J1");
    assert_eq!(message.history_id, "H1");

    assert!(matches!(
        events.recv().await.unwrap(),
        DispatchEvent::Sent { .. }
    ));
}

#[tokio::test]
async fn test_dispatch_without_workers_retries_then_fails() {
    let fx = dispatch_fixture(2).await;
    let element = JobElement::schedule("J1", "H1", 0, 1);

    assert_eq!(
        fx.dispatcher.dispatch(element).await,
        DispatchOutcome::Requeued
    );
    let retry = fx.queues.try_pop(QueueKind::Exception).await.unwrap();
    assert_eq!(retry.attempts, 1);
    assert!(retry.not_before.is_some());
    assert_eq!(
        fx.history.get("H1").await.unwrap().status,
        RunStatus::Pending
    );

    assert_eq!(fx.dispatcher.dispatch(retry).await, DispatchOutcome::Failed);
    assert!(fx.queues.is_empty(QueueKind::Exception).await);
    let record = fx.history.get("H1").await.unwrap();
    assert_eq!(record.status, RunStatus::Failed);
    assert!(record.error.unwrap().contains("no eligible worker"));
}

#[tokio::test]
async fn test_busy_worker_receives_dispatch_instead_of_failing() {
    let fx = dispatch_fixture(3).await;
    fx.history
        .insert(HistoryRecord::new("H2", "J2", TriggerType::Schedule).with_host_group(1))
        .await;
    let (id, mut rx) = connect(&fx.registry, "worker-a", &[1], 1).await;

    let first = fx
        .dispatcher
        .dispatch(JobElement::schedule("J1", "H1", 0, 1))
        .await;
    assert!(matches!(first, DispatchOutcome::Sent { connection, .. } if connection == id));

    let second = fx
        .dispatcher
        .dispatch(JobElement::schedule("J2", "H2", 0, 1))
        .await;
    assert!(matches!(second, DispatchOutcome::Sent { connection, .. } if connection == id));

    assert!(rx.recv().await.is_some());
    assert!(rx.recv().await.is_some());
    assert!(fx.queues.is_empty(QueueKind::Exception).await);
    assert_eq!(
        fx.history.get("H2").await.unwrap().status,
        RunStatus::Pending
    );
}

#[tokio::test]
async fn test_response_is_matched_by_request_id() {
    let fx = dispatch_fixture(3).await;
    let (id, _rx) = connect(&fx.registry, "worker-a", &[1], 0).await;
    let mut events = fx.dispatcher.subscribe();

    let DispatchOutcome::Sent { request_id, .. } = fx
        .dispatcher
        .dispatch(JobElement::schedule("J1", "H1", 0, 1))
        .await
    else {
        panic!("expected Sent");
    };
    let _ = events.recv().await.unwrap();

    fx.dispatcher
        .on_response(
            id,
            Response::error(request_id, Operation::Schedule as i32, "exitCode=3"),
        )
        .await;

    match events.recv().await.unwrap() {
        DispatchEvent::Completed {
            request_id: rid,
            element,
            succeeded,
            error_text,
        } => {
            assert_eq!(rid, request_id);
            assert_eq!(element.history_id, "H1");
            assert!(!succeeded);
            assert_eq!(error_text, "exitCode=3");
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(fx.registry.in_flight().await, 0);
}

#[tokio::test]
async fn test_disconnect_requeues_in_flight_runs() {
    let fx = dispatch_fixture(3).await;
    let (id, _rx) = connect(&fx.registry, "worker-a", &[1], 0).await;

    fx.dispatcher
        .dispatch(JobElement::schedule("J1", "H1", 0, 1))
        .await;
    fx.dispatcher.on_disconnect(id).await;

    let retry = fx.queues.try_pop(QueueKind::Exception).await.unwrap();
    assert_eq!(retry.history_id, "H1");
    assert_eq!(retry.attempts, 1);
    let record = fx.history.get("H1").await.unwrap();
    assert!(record.log.contains("worker connection lost"));
}

#[tokio::test]
async fn test_disconnect_leaves_finished_runs_alone() {
    let fx = dispatch_fixture(3).await;
    let (id, _rx) = connect(&fx.registry, "worker-a", &[1], 0).await;

    fx.dispatcher
        .dispatch(JobElement::schedule("J1", "H1", 0, 1))
        .await;

    let mut record = fx.history.find_by_id("H1").await.unwrap();
    record.finish(0, None, chrono::Utc::now());
    fx.history.update_status(&record).await.unwrap();

    fx.dispatcher.on_disconnect(id).await;
    assert!(fx.queues.is_empty(QueueKind::Exception).await);
    assert_eq!(
        fx.history.get("H1").await.unwrap().status,
        RunStatus::Success
    );
}
