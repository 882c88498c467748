//! The concrete failure strategies.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::broker::{AddOptions, Broker, BrokerResult};
use crate::call::Call;
use crate::config::ConveyorConfig;
use crate::job::codec;

use super::{backoff, evict_to_failure_queue, FailureStrategy};

/// NACK the job with zero delay; the broker redelivers it at will.
pub struct RetryImmediately {
    broker: Arc<dyn Broker>,
}

impl RetryImmediately {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl FailureStrategy for RetryImmediately {
    async fn handle(&self, call: Box<dyn Call>) -> BrokerResult<()> {
        let message = call.error_message().unwrap_or("unknown failure").to_string();
        let job = call.into_job();

        match job.id() {
            Some(id) => {
                if let Err(err) = self.broker.nack(id).await {
                    warn!(
                        job_id = %id,
                        error = %err,
                        "nack failed, job will be redelivered after its retry timeout"
                    );
                } else {
                    info!(
                        job_id = %id,
                        queue = %job.queue(),
                        error = %message,
                        retry_count = job.retry_count(),
                        "job nacked for immediate retry"
                    );
                }
            }
            None => warn!(
                queue = %job.queue(),
                "cannot nack a job without a broker id, dropping"
            ),
        }
        Ok(())
    }
}

/// Requeue with an exponential backoff delay, emulated as ACK + delayed
/// ADD of a clone. Jobs that exhausted their retry budget or whose
/// remaining lifetime no longer covers the delay are evicted to the
/// failure queue instead.
pub struct RetryWithBackoff {
    broker: Arc<dyn Broker>,
    config: Arc<ConveyorConfig>,
}

impl RetryWithBackoff {
    pub fn new(broker: Arc<dyn Broker>, config: Arc<ConveyorConfig>) -> Self {
        Self { broker, config }
    }
}

#[async_trait]
impl FailureStrategy for RetryWithBackoff {
    async fn handle(&self, call: Box<dyn Call>) -> BrokerResult<()> {
        let message = call.error_message().unwrap_or("unknown failure").to_string();
        let job = call.into_job();
        let queue = job.queue().to_string();

        let retries = job.retry_count();
        let max_retries = self.config.max_retries(&queue);
        if retries >= max_retries {
            evict_to_failure_queue(
                self.broker.as_ref(),
                &self.config,
                job,
                &format!("retry budget exhausted ({retries}/{max_retries}): {message}"),
            )
            .await;
            return Ok(());
        }

        let delay = backoff::delay(retries);
        let remaining = job
            .remaining_lifetime(Utc::now())
            .unwrap_or_else(|| self.config.job_lifetime(&queue).as_secs() as i64);
        if remaining <= 0 || remaining as u64 <= delay.as_secs() {
            evict_to_failure_queue(
                self.broker.as_ref(),
                &self.config,
                job,
                &format!("lifetime exhausted ({remaining}s remaining): {message}"),
            )
            .await;
            return Ok(());
        }

        if let Some(id) = job.id() {
            if let Err(err) = self.broker.ack_job(id).await {
                warn!(
                    job_id = %id,
                    error = %err,
                    "failed to ack job before delayed requeue, broker may deliver a duplicate"
                );
            }
        }

        let clone = job.requeue_clone();
        let payload = codec::encode_payload(&clone)?;
        let options = AddOptions {
            delay: Some(delay),
            retry_timeout: Some(self.config.process_timeout(&queue)),
            ttl: Some(std::time::Duration::from_secs(remaining as u64)),
        };

        // A rejected requeue ADDJOB is structural, propagate it.
        let new_id = self.broker.add_job(&queue, &payload, &options).await?;
        info!(
            original_id = job.original_id().unwrap_or("unknown"),
            new_id = %new_id,
            queue = %queue,
            delay_secs = delay.as_secs(),
            retry_count = retries,
            error = %message,
            "job requeued with backoff"
        );
        Ok(())
    }
}

/// ACK the original and ADD a clone into the failure queue with the
/// maximum broker lifetime.
pub struct MoveToFailureQueue {
    broker: Arc<dyn Broker>,
    config: Arc<ConveyorConfig>,
}

impl MoveToFailureQueue {
    pub fn new(broker: Arc<dyn Broker>, config: Arc<ConveyorConfig>) -> Self {
        Self { broker, config }
    }
}

#[async_trait]
impl FailureStrategy for MoveToFailureQueue {
    async fn handle(&self, call: Box<dyn Call>) -> BrokerResult<()> {
        let message = call.error_message().unwrap_or("unknown failure").to_string();
        let job = call.into_job();
        evict_to_failure_queue(self.broker.as_ref(), &self.config, job, &message).await;
        Ok(())
    }
}

/// Log and drop. Used only by the synchronous dispatcher, which has no
/// broker connection.
pub struct LogAndDiscard;

#[async_trait]
impl FailureStrategy for LogAndDiscard {
    async fn handle(&self, call: Box<dyn Call>) -> BrokerResult<()> {
        let message = call.error_message().unwrap_or("unknown failure").to_string();
        let job = call.into_job();
        warn!(
            queue = %job.queue(),
            body = %job.body(),
            error = %message,
            "job failed in synchronous mode, discarding"
        );
        Ok(())
    }
}
