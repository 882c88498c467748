//! # Consumer Loop
//!
//! One consumer process runs one of these: a signal-aware loop fetching a
//! batch from the broker and handing it to the dispatcher. The GETJOB
//! timeout is deliberately short so the shutdown token is observed between
//! fetches; there is no long blocking wait to interrupt.
//!
//! ## Burst mode
//!
//! A burst consumer is spawned by the supervisor to drain a backlog. It
//! behaves identically except that the first empty fetch means the backlog
//! is gone and the process exits instead of idling.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::broker::{response, Broker, GetOptions};
use crate::config::ConveyorConfig;
use crate::dispatch::{DispatchError, JobDispatcher};
use crate::shutdown::ShutdownToken;

/// Bounds the broker imposes on GETJOB COUNT.
const MIN_BATCH: usize = 1;
const MAX_BATCH: usize = 99;

/// Pause after a broker fetch error before retrying.
const FETCH_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Pause after an empty fetch, on top of the broker-side GETJOB timeout.
const IDLE_SLEEP: Duration = Duration::from_millis(100);

/// Loop phase, for observability and post-run assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Listening,
    Dispatching,
    Stopped,
}

/// The fetch-and-dispatch loop of one consumer process.
pub struct Consumer {
    broker: Arc<dyn Broker>,
    dispatcher: JobDispatcher,
    queues: Vec<String>,
    batch_size: usize,
    burst: bool,
    fetch_timeout: Duration,
    state: ConsumerState,
}

impl Consumer {
    pub fn new(
        broker: Arc<dyn Broker>,
        dispatcher: JobDispatcher,
        config: &ConveyorConfig,
        queues: Vec<String>,
        batch_size: usize,
        burst: bool,
    ) -> Self {
        Self {
            broker,
            dispatcher,
            queues,
            batch_size: batch_size.clamp(MIN_BATCH, MAX_BATCH),
            burst,
            fetch_timeout: config.broker.fetch_timeout(),
            state: ConsumerState::Listening,
        }
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    /// Run until shutdown is requested, a fatal dispatch error occurs, or
    /// (in burst mode) the queues run dry.
    pub async fn run(&mut self, shutdown: &ShutdownToken) -> Result<(), DispatchError> {
        info!(
            queues = ?self.queues,
            batch_size = self.batch_size,
            burst = self.burst,
            "🚀 consumer listening"
        );

        let options = GetOptions {
            timeout: self.fetch_timeout,
            count: self.batch_size,
            with_counters: true,
        };

        while !shutdown.is_shutdown() {
            self.state = ConsumerState::Listening;
            let raws = match self.broker.get_jobs(&self.queues, &options).await {
                Ok(raws) => raws,
                Err(err) => {
                    error!(error = %err, "broker fetch failed, backing off");
                    tokio::time::sleep(FETCH_ERROR_BACKOFF).await;
                    continue;
                }
            };

            if raws.is_empty() {
                if self.burst {
                    info!(queues = ?self.queues, "burst consumer drained its queues, exiting");
                    break;
                }
                tokio::time::sleep(IDLE_SLEEP).await;
                continue;
            }

            self.state = ConsumerState::Dispatching;
            let jobs = response::jobs_from_raw(raws);
            self.dispatcher.dispatch(jobs, shutdown).await?;
        }

        self.state = ConsumerState::Stopped;
        info!(queues = ?self.queues, "🛑 consumer stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::RawJob;
    use crate::call::WorkerRegistry;
    use crate::failure::{FailureStrategyCollection, RetryImmediately};
    use crate::job::codec::encode_payload;
    use crate::job::Job;
    use crate::routing::{CallFactory, JobRouter, QueueRoute, WorkerDirections, WorkerKind};
    use crate::test_helpers::MockBroker;
    use serde_json::json;

    fn consumer(broker: Arc<MockBroker>, address: &str, burst: bool) -> Consumer {
        let config: Arc<ConveyorConfig> =
            Arc::new(serde_yaml::from_str("broker:\n  url: redis://localhost:7711\n").unwrap());

        let factory = CallFactory::new(Arc::clone(&config), Arc::new(WorkerRegistry::default()));
        let mut router = JobRouter::new(factory);
        router.register_route(Box::new(QueueRoute::new(
            "q",
            WorkerDirections::new(WorkerKind::Cli, address),
        )));

        let mut strategies = FailureStrategyCollection::new();
        strategies.register(
            "retry",
            Arc::new(RetryImmediately::new(broker.clone() as Arc<dyn Broker>)),
        );

        let dispatcher = JobDispatcher::new(
            router,
            broker.clone(),
            Arc::new(strategies),
            Arc::clone(&config),
        )
        .with_poll_interval(Duration::from_millis(10));

        Consumer::new(broker, dispatcher, &config, vec!["q".to_string()], 10, burst)
    }

    fn raw(id: &str) -> RawJob {
        let job = Job::new("q", json!({"n": 1}));
        RawJob {
            id: id.to_string(),
            queue: "q".to_string(),
            payload: encode_payload(&job).unwrap(),
            nacks: 0,
            additional_deliveries: 0,
        }
    }

    #[tokio::test]
    async fn burst_consumer_drains_scripted_batches_and_exits() {
        let broker = Arc::new(MockBroker::new());
        broker.push_fetch(vec![raw("D-1"), raw("D-2")]);
        broker.push_fetch(vec![raw("D-3")]);
        // Third fetch is empty: the burst consumer exits on its own.

        let mut consumer = consumer(broker.clone(), "true", true);
        consumer.run(&ShutdownToken::new()).await.unwrap();
        assert_eq!(consumer.state(), ConsumerState::Stopped);

        let mut acked = broker.acked();
        acked.sort();
        assert_eq!(
            acked,
            vec!["D-1".to_string(), "D-2".to_string(), "D-3".to_string()]
        );
    }

    #[tokio::test]
    async fn shutdown_stops_a_permanent_consumer() {
        let broker = Arc::new(MockBroker::new());
        let mut consumer = consumer(broker, "true", false);
        assert_eq!(consumer.state(), ConsumerState::Listening);

        let shutdown = ShutdownToken::new();
        shutdown.request_shutdown();
        consumer.run(&shutdown).await.unwrap();
        assert_eq!(consumer.state(), ConsumerState::Stopped);
    }

    #[tokio::test]
    async fn failed_jobs_flow_through_the_failure_strategy() {
        let broker = Arc::new(MockBroker::new());
        broker.push_fetch(vec![raw("D-4")]);

        let mut consumer = consumer(broker.clone(), "false", true);
        consumer.run(&ShutdownToken::new()).await.unwrap();

        assert_eq!(broker.nacked(), vec!["D-4".to_string()]);
        assert!(broker.acked().is_empty());
    }

    #[test]
    fn batch_size_is_clamped_to_broker_bounds() {
        let broker = Arc::new(MockBroker::new());
        let consumer = consumer(broker, "true", false);
        assert_eq!(consumer.batch_size, 10);

        let broker = Arc::new(MockBroker::new());
        let config: Arc<ConveyorConfig> =
            Arc::new(serde_yaml::from_str("broker:\n  url: redis://localhost:7711\n").unwrap());
        let factory = CallFactory::new(Arc::clone(&config), Arc::new(WorkerRegistry::default()));
        let dispatcher = JobDispatcher::new(
            JobRouter::new(factory),
            broker.clone(),
            Arc::new(FailureStrategyCollection::new()),
            Arc::clone(&config),
        );
        let oversized = Consumer::new(broker, dispatcher, &config, vec!["q".into()], 500, false);
        assert_eq!(oversized.batch_size, MAX_BATCH);
    }
}
