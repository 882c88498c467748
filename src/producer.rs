//! Producer-side enqueue helper.
//!
//! Stamps the job with its `created_at`/`lifetime` budget at creation time
//! and mirrors the lifetime into the broker TTL, so both the retry logic
//! and the broker agree on when the job expires.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::info;

use crate::broker::{AddOptions, Broker, BrokerResult};
use crate::config::ConveyorConfig;
use crate::job::{codec, Job};

pub struct Producer {
    broker: Arc<dyn Broker>,
    config: Arc<ConveyorConfig>,
}

impl Producer {
    pub fn new(broker: Arc<dyn Broker>, config: Arc<ConveyorConfig>) -> Self {
        Self { broker, config }
    }

    /// Enqueue with the queue's configured lifetime.
    pub async fn enqueue(&self, queue: &str, body: serde_json::Value) -> BrokerResult<String> {
        let lifetime = self.config.job_lifetime(queue);
        self.enqueue_with_lifetime(queue, body, lifetime).await
    }

    /// Enqueue with an explicit lifetime budget.
    pub async fn enqueue_with_lifetime(
        &self,
        queue: &str,
        body: serde_json::Value,
        lifetime: Duration,
    ) -> BrokerResult<String> {
        let mut job = Job::with_lifetime(queue, body, lifetime, Utc::now());
        let payload = codec::encode_payload(&job)?;
        let options = AddOptions {
            retry_timeout: Some(self.config.process_timeout(queue)),
            ttl: Some(lifetime),
            ..AddOptions::default()
        };

        let id = self.broker.add_job(queue, &payload, &options).await?;
        job.assign_id(&id);
        info!(job_id = %id, queue = %queue, lifetime_secs = lifetime.as_secs(), "job enqueued");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MockBroker;
    use serde_json::json;

    fn producer(broker: Arc<MockBroker>) -> Producer {
        let yaml = r#"
broker:
  url: redis://localhost:7711
queues:
  emails:
    worker:
      kind: cli
      address: "bin/send-email"
    process_timeout_seconds: 45
    job_lifetime_seconds: 900
"#;
        Producer::new(broker, Arc::new(serde_yaml::from_str(yaml).unwrap()))
    }

    #[tokio::test]
    async fn stamps_lifetime_metadata_and_broker_ttl() {
        let broker = Arc::new(MockBroker::new());
        let id = producer(broker.clone())
            .enqueue("emails", json!({"to": "a@b.c"}))
            .await
            .unwrap();
        assert!(!id.is_empty());

        let added = broker.added();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].queue, "emails");
        assert_eq!(added[0].options.ttl, Some(Duration::from_secs(900)));
        assert_eq!(added[0].options.retry_timeout, Some(Duration::from_secs(45)));
        assert_eq!(added[0].options.delay, None);

        let decoded = codec::decode_payload(&added[0].payload).unwrap();
        assert!(decoded.metadata.contains_key(crate::job::metadata::CREATED_AT));
        assert_eq!(
            decoded.metadata.get(crate::job::metadata::LIFETIME),
            Some(&json!(900))
        );
    }

    #[tokio::test]
    async fn undefined_queue_falls_back_to_default_budget() {
        let broker = Arc::new(MockBroker::new());
        producer(broker.clone())
            .enqueue("untracked", json!(1))
            .await
            .unwrap();

        assert_eq!(
            broker.added()[0].options.ttl,
            Some(Duration::from_secs(3600))
        );
    }
}
