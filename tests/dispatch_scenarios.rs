//! End-to-end dispatch scenarios against the recording broker mock,
//! assembled through the same bootstrap wiring the binary uses.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use conveyor::bootstrap;
use conveyor::broker::{Broker, RawJob};
use conveyor::call::WorkerRegistry;
use conveyor::consumer::Consumer;
use conveyor::job::{codec, metadata, Job};
use conveyor::producer::Producer;
use conveyor::shutdown::ShutdownToken;
use conveyor::supervise::{
    AutoscaleAlgorithm, ConsumerProcess, ConsumerProcessGroup, ProcessMode, ProcessSpawner,
};
use conveyor::test_helpers::MockBroker;
use conveyor::{ConveyorConfig, JobDispatcher};

const CONFIG: &str = r#"
broker:
  url: redis://localhost:7711
queues:
  ok-queue:
    worker:
      kind: cli
      address: "true"
  retry-queue:
    worker:
      kind: cli
      address: "false"
    max_retries: 2
    job_lifetime_seconds: 600
  nack-queue:
    worker:
      kind: cli
      address: "false"
    failure_strategy: retry-immediately
"#;

fn config() -> Arc<ConveyorConfig> {
    Arc::new(serde_yaml::from_str(CONFIG).unwrap())
}

fn dispatcher(broker: Arc<MockBroker>) -> JobDispatcher {
    bootstrap::build_dispatcher(broker, config(), Arc::new(WorkerRegistry::new()))
        .with_poll_interval(Duration::from_millis(10))
}

fn delivered(id: &str, queue: &str, previous_retries: u64) -> Job {
    let mut meta = std::collections::HashMap::new();
    meta.insert(metadata::CREATED_AT.to_string(), json!(Utc::now().timestamp()));
    meta.insert(metadata::LIFETIME.to_string(), json!(600));
    meta.insert(metadata::RETRY_COUNT.to_string(), json!(previous_retries));
    Job::from_broker(id, queue, json!({"n": 1}), meta, 0, 0)
}

#[tokio::test]
async fn successful_job_is_acked_exactly_once() {
    let broker = Arc::new(MockBroker::new());
    dispatcher(broker.clone())
        .dispatch(vec![delivered("D-1", "ok-queue", 0)], &ShutdownToken::new())
        .await
        .unwrap();

    assert_eq!(broker.acked(), vec!["D-1".to_string()]);
    assert!(broker.nacked().is_empty());
    assert!(broker.added().is_empty());
}

#[tokio::test]
async fn immediate_retry_nacks_without_acking() {
    let broker = Arc::new(MockBroker::new());
    dispatcher(broker.clone())
        .dispatch(vec![delivered("D-2", "nack-queue", 0)], &ShutdownToken::new())
        .await
        .unwrap();

    assert_eq!(broker.nacked(), vec!["D-2".to_string()]);
    assert!(broker.acked().is_empty());
}

#[tokio::test]
async fn backoff_requeues_a_delayed_clone_with_bookkeeping() {
    let broker = Arc::new(MockBroker::new());
    dispatcher(broker.clone())
        .dispatch(
            vec![delivered("D-3", "retry-queue", 0)],
            &ShutdownToken::new(),
        )
        .await
        .unwrap();

    // Emulated delayed requeue: ACK the original, ADD a clone.
    assert_eq!(broker.acked(), vec!["D-3".to_string()]);
    let added = broker.added();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].queue, "retry-queue");
    assert!(added[0].options.delay.unwrap() >= Duration::from_secs(1));

    let clone = codec::decode_payload(&added[0].payload).unwrap();
    assert_eq!(clone.metadata.get(metadata::RETRY_COUNT), Some(&json!(1)));
    assert_eq!(clone.metadata.get(metadata::ORIGINAL_ID), Some(&json!("D-3")));
}

#[tokio::test]
async fn exhausted_retry_budget_moves_the_job_to_the_failure_queue() {
    let broker = Arc::new(MockBroker::new());
    dispatcher(broker.clone())
        .dispatch(
            vec![delivered("D-4", "retry-queue", 2)],
            &ShutdownToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(broker.acked(), vec!["D-4".to_string()]);
    let added = broker.added();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].queue, "retry-queue.failed");
}

#[tokio::test]
async fn insufficient_remaining_lifetime_moves_the_job_to_the_failure_queue() {
    let broker = Arc::new(MockBroker::new());

    // 2s of budget left, but the next backoff delay is around 4s.
    let mut meta = std::collections::HashMap::new();
    meta.insert(
        metadata::CREATED_AT.to_string(),
        json!(Utc::now().timestamp() - 598),
    );
    meta.insert(metadata::LIFETIME.to_string(), json!(600));
    meta.insert(metadata::RETRY_COUNT.to_string(), json!(1));
    let job = Job::from_broker("D-5", "retry-queue", json!(1), meta, 0, 0);

    dispatcher(broker.clone())
        .dispatch(vec![job], &ShutdownToken::new())
        .await
        .unwrap();

    let added = broker.added();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].queue, "retry-queue.failed");
}

#[tokio::test]
async fn produced_jobs_flow_through_a_burst_consumer_to_ack() {
    let broker = Arc::new(MockBroker::new());
    let config = config();

    let producer = Producer::new(broker.clone() as Arc<dyn Broker>, Arc::clone(&config));
    let id = producer.enqueue("ok-queue", json!({"n": 7})).await.unwrap();

    // Hand the enqueued payload back as the next fetch, as the broker would.
    let added = broker.added();
    broker.push_fetch(vec![RawJob {
        id: id.clone(),
        queue: "ok-queue".to_string(),
        payload: added[0].payload.clone(),
        nacks: 0,
        additional_deliveries: 0,
    }]);

    let mut consumer = Consumer::new(
        broker.clone(),
        dispatcher(broker.clone()),
        &config,
        vec!["ok-queue".to_string()],
        10,
        true,
    );
    consumer.run(&ShutdownToken::new()).await.unwrap();

    assert_eq!(broker.acked(), vec![id]);
}

/// Fixed autoscale target, for driving the burst math from outside.
struct FixedTarget(usize);

#[async_trait]
impl AutoscaleAlgorithm for FixedTarget {
    async fn recommended_processes(&mut self, _current: usize) -> usize {
        self.0
    }
}

/// Spawns inert `sleep` children instead of real consumers.
struct SleepSpawner;

impl ProcessSpawner for SleepSpawner {
    fn spawn_consumer(
        &self,
        _queues: &[String],
        _batch_size: usize,
        mode: ProcessMode,
    ) -> std::io::Result<ConsumerProcess> {
        let child = tokio::process::Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()?;
        Ok(ConsumerProcess::new(child, mode))
    }
}

#[tokio::test]
async fn burst_spawning_is_bounded_by_the_group_ceiling() {
    // min 3, max 5, autoscale target 20: the group holds 3 permanent
    // processes and exactly 2 burst processes.
    let mut group = ConsumerProcessGroup::new(
        "bursty",
        vec!["ok-queue".to_string()],
        3,
        5,
        10,
        Box::new(FixedTarget(20)),
        Box::new(SleepSpawner),
    );

    group.check_on_consumers().await;
    assert_eq!(group.alive(), 5);

    group.check_on_consumers().await;
    assert_eq!(group.alive(), 5);

    group.signal_stop_all();
    group.await_termination(Duration::from_secs(1)).await;
}
