//! # Job Dispatch
//!
//! Takes a fetched batch of jobs through its full lifecycle: route each job
//! to a call, start the calls (non-blocking first), poll the in-flight set,
//! and resolve each finished call by ACKing it or handing it to the queue's
//! failure strategy.
//!
//! ## Ordering
//!
//! Calls are partitioned so every non-blocking call is started before any
//! blocking one; within each class, fetch order is preserved. Subprocesses
//! therefore run concurrently with synchronous in-process work instead of
//! queueing behind it.
//!
//! ## Shutdown
//!
//! A termination signal observed during the start phase never interrupts a
//! call that has already started. Jobs whose calls were not yet started are
//! NACKed back to the broker for immediate redelivery elsewhere; the
//! in-flight remainder is awaited and resolved normally.

pub mod sync;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::broker::{Broker, BrokerError};
use crate::call::Call;
use crate::config::{ConfigurationError, ConveyorConfig};
use crate::failure::FailureStrategyCollection;
use crate::job::Job;
use crate::routing::{JobRouter, RoutingError};
use crate::shutdown::ShutdownToken;

pub use sync::SyncDispatcher;

/// How often the in-flight set is polled.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Errors that abort a batch. Per-job problems (a failed worker, a missing
/// route) are handled inside the batch and never surface here.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Drives a batch of jobs from routed calls to ACK or failure handling.
pub struct JobDispatcher {
    router: JobRouter,
    broker: Arc<dyn Broker>,
    strategies: Arc<FailureStrategyCollection>,
    config: Arc<ConveyorConfig>,
    poll_interval: Duration,
}

impl JobDispatcher {
    pub fn new(
        router: JobRouter,
        broker: Arc<dyn Broker>,
        strategies: Arc<FailureStrategyCollection>,
        config: Arc<ConveyorConfig>,
    ) -> Self {
        Self {
            router,
            broker,
            strategies,
            config,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the in-flight poll interval. Tests use a short one.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Dispatch one batch to completion.
    ///
    /// Unroutable jobs are dropped from the batch with an error log; the
    /// broker redelivers them after their retry timeout. A fatal routing
    /// error or a broker rejection during failure handling aborts the batch.
    pub async fn dispatch(
        &self,
        jobs: Vec<Job>,
        shutdown: &ShutdownToken,
    ) -> Result<(), DispatchError> {
        let mut calls = self.collect_calls(jobs)?;
        order_calls(&mut calls);

        let mut in_flight: Vec<Box<dyn Call>> = Vec::with_capacity(calls.len());
        let mut calls = calls.into_iter();
        for mut call in calls.by_ref() {
            if shutdown.is_shutdown() {
                self.return_job(call).await;
                break;
            }
            call.start().await;
            in_flight.push(call);
        }
        for call in calls {
            self.return_job(call).await;
        }

        while !in_flight.is_empty() {
            let mut still_running = Vec::with_capacity(in_flight.len());
            for mut call in in_flight {
                call.check_timeout().await;
                if call.is_running().await {
                    still_running.push(call);
                } else {
                    self.resolve(call).await?;
                }
            }
            in_flight = still_running;
            if !in_flight.is_empty() {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        Ok(())
    }

    fn collect_calls(&self, jobs: Vec<Job>) -> Result<Vec<Box<dyn Call>>, DispatchError> {
        let mut calls = Vec::with_capacity(jobs.len());
        for job in jobs {
            match self.router.call_for(job) {
                Ok(call) => calls.push(call),
                Err(err) if err.is_fatal() => return Err(err.into()),
                Err(err) => {
                    // Left unacked; the broker redelivers after the retry
                    // timeout, by which time a route may exist.
                    error!(error = %err, "dropping unroutable job from batch");
                }
            }
        }
        Ok(calls)
    }

    /// NACK a job whose call never started so another consumer picks it up
    /// immediately instead of waiting out the retry timeout.
    async fn return_job(&self, call: Box<dyn Call>) {
        let job = call.into_job();
        match job.id() {
            Some(id) => {
                if let Err(err) = self.broker.nack(id).await {
                    warn!(
                        job_id = %id,
                        error = %err,
                        "failed to return unstarted job, broker will redeliver after timeout"
                    );
                } else {
                    info!(job_id = %id, queue = %job.queue(), "returned unstarted job to broker");
                }
            }
            None => warn!(queue = %job.queue(), "unstarted job has no broker id, dropping"),
        }
    }

    async fn resolve(&self, mut call: Box<dyn Call>) -> Result<(), DispatchError> {
        if call.was_successful().await {
            let job = call.into_job();
            if let Some(id) = job.id() {
                match self.broker.ack_job(id).await {
                    Ok(()) => info!(
                        job_id = %id,
                        queue = %job.queue(),
                        retry_count = job.retry_count(),
                        "✅ job processed"
                    ),
                    // The work is done; a lost ACK costs one duplicate
                    // delivery, not the batch.
                    Err(err) => warn!(
                        job_id = %id,
                        error = %err,
                        "ack failed after successful call, job may be redelivered"
                    ),
                }
            }
            return Ok(());
        }

        let queue = call.job().queue().to_string();
        let strategy = self
            .strategies
            .select(&queue, self.config.failure_strategy_name(&queue))?;
        strategy.handle(call).await?;
        Ok(())
    }
}

/// Stable partition: non-blocking calls first, blocking last. Every
/// subprocess is started before any synchronous in-process call runs to
/// completion; fetch order is preserved within each class.
fn order_calls(calls: &mut [Box<dyn Call>]) {
    calls.sort_by_key(|call| call.is_blocking());
}
