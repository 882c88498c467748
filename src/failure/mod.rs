//! # Failure Strategies
//!
//! Stateless policy objects deciding what happens to a job whose call
//! failed: immediate redelivery, delayed requeue with exponential backoff,
//! eviction to a failure queue, or log-and-discard for the synchronous
//! dispatcher.
//!
//! The broker has no native delayed-NACK or move-between-queues primitive,
//! so delayed requeues and queue moves are emulated with ACK of the
//! original plus ADD of a clone that carries the retry bookkeeping forward.
//!
//! ## Selection
//!
//! Strategies are chosen per queue from a named, insertion-ordered
//! collection with a three-level fallback: the queue's configured name,
//! then the global `retry` default, then the first registered strategy.
//! An exhausted fallback chain is a fatal configuration error.

pub mod backoff;
pub mod strategies;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, warn};

use crate::broker::{AddOptions, Broker, BrokerResult, MAX_JOB_LIFETIME};
use crate::call::Call;
use crate::config::{ConfigurationError, ConveyorConfig};
use crate::job::codec;
use crate::job::Job;

pub use strategies::{LogAndDiscard, MoveToFailureQueue, RetryImmediately, RetryWithBackoff};

/// Name of the global default strategy in the fallback chain.
pub const DEFAULT_STRATEGY: &str = "retry";

/// Policy for a job whose call failed.
///
/// Transient failures are handled entirely here and never escalate; only
/// a broker rejecting a requeue ADDJOB propagates, because continuing
/// would silently drop the job.
#[async_trait]
pub trait FailureStrategy: Send + Sync {
    async fn handle(&self, call: Box<dyn Call>) -> BrokerResult<()>;
}

impl std::fmt::Debug for dyn FailureStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FailureStrategy")
    }
}

/// Named strategies in explicit registration order.
///
/// The "first registered" fallback is a documented property of this list,
/// not an accident of map iteration order.
#[derive(Default)]
pub struct FailureStrategyCollection {
    entries: Vec<(String, Arc<dyn FailureStrategy>)>,
}

impl FailureStrategyCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a strategy under `name`. Registration order is meaningful:
    /// the first entry is the final fallback.
    pub fn register(&mut self, name: impl Into<String>, strategy: Arc<dyn FailureStrategy>) {
        self.entries.push((name.into(), strategy));
    }

    fn find(&self, name: &str) -> Option<Arc<dyn FailureStrategy>> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| Arc::clone(s))
    }

    /// Select the strategy for `queue` given its configured name, walking
    /// the fallback chain: configured -> `retry` -> first registered.
    pub fn select(
        &self,
        queue: &str,
        configured: Option<&str>,
    ) -> Result<Arc<dyn FailureStrategy>, ConfigurationError> {
        if let Some(name) = configured {
            if let Some(strategy) = self.find(name) {
                return Ok(strategy);
            }
            warn!(
                queue = %queue,
                strategy = %name,
                "configured failure strategy is not registered, falling back"
            );
        }

        if let Some(strategy) = self.find(DEFAULT_STRATEGY) {
            return Ok(strategy);
        }

        self.entries
            .first()
            .map(|(_, s)| Arc::clone(s))
            .ok_or_else(|| {
                ConfigurationError::missing_strategy(
                    queue,
                    "no configured, default, or first-registered strategy available",
                )
            })
    }
}

/// Evict a job to its configured failure queue: ACK the original, ADD a
/// clone with the maximum broker lifetime.
///
/// A failed ADD here loses the job permanently; it is logged at the
/// highest severity with enough context to reconstruct it from logs.
pub(crate) async fn evict_to_failure_queue(
    broker: &dyn Broker,
    config: &ConveyorConfig,
    job: Job,
    reason: &str,
) {
    let failure_queue = config.failure_queue_name(job.queue());

    if let Some(id) = job.id() {
        if let Err(err) = broker.ack_job(id).await {
            warn!(
                job_id = %id,
                error = %err,
                "failed to ack job before failure-queue move, broker may redeliver it"
            );
        }
    }

    let clone = job.requeue_clone_into(failure_queue.clone());
    let payload = match codec::encode_payload(&clone) {
        Ok(payload) => payload,
        Err(err) => {
            error!(
                original_id = job.original_id().unwrap_or("unknown"),
                queue = %job.queue(),
                failure_queue = %failure_queue,
                error = %err,
                body = %job.body(),
                "JOB LOST: could not marshal clone for the failure queue"
            );
            return;
        }
    };

    let options = AddOptions {
        ttl: Some(MAX_JOB_LIFETIME),
        ..AddOptions::default()
    };
    match broker.add_job(&failure_queue, &payload, &options).await {
        Ok(new_id) => warn!(
            original_id = job.original_id().unwrap_or("unknown"),
            new_id = %new_id,
            queue = %job.queue(),
            failure_queue = %failure_queue,
            reason = %reason,
            "job moved to failure queue"
        ),
        Err(err) => error!(
            original_id = job.original_id().unwrap_or("unknown"),
            queue = %job.queue(),
            failure_queue = %failure_queue,
            error = %err,
            body = %job.body(),
            "JOB LOST: broker rejected the failure-queue clone"
        ),
    }
}
