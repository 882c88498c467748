//! # Broker Abstraction
//!
//! Conveyor targets brokers with Disque-style semantics: ADDJOB with delay,
//! retry-timeout, and TTL options; blocking GETJOB across multiple queues;
//! ACKJOB; and NACK. Delivery is at-least-once and the broker has no native
//! "NACK with delay" or "move between queues" primitives, so the failure
//! strategies emulate those with ACK + re-ADD.
//!
//! The [`Broker`] trait is the seam between the control plane and the wire:
//! production code uses [`DisqueBroker`], tests use the recording mock in
//! [`crate::test_helpers`].

pub mod disque;
pub mod errors;
pub mod response;

use std::time::Duration;

use async_trait::async_trait;

pub use disque::DisqueBroker;
pub use errors::{BrokerError, BrokerResult};

/// The largest TTL the broker accepts. Failure-queue clones are stored with
/// this lifetime so operators have the maximum window to inspect them.
pub const MAX_JOB_LIFETIME: Duration = Duration::from_secs(3_888_000); // 45 days

/// Options for ADDJOB.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddOptions {
    /// Delay before the job becomes deliverable.
    pub delay: Option<Duration>,
    /// Redelivery timeout: how long the broker waits for an ACK before
    /// handing the job to another consumer.
    pub retry_timeout: Option<Duration>,
    /// Total time to live; the broker evicts the job afterwards.
    pub ttl: Option<Duration>,
}

/// Options for GETJOB.
#[derive(Debug, Clone, PartialEq)]
pub struct GetOptions {
    /// Blocking timeout. Kept short so signal checks stay responsive.
    pub timeout: Duration,
    /// Maximum jobs returned in one fetch.
    pub count: usize,
    /// Request nack/additional-delivery counters with each job.
    pub with_counters: bool,
}

/// One undecoded job entry from a GETJOB reply.
#[derive(Debug, Clone, PartialEq)]
pub struct RawJob {
    pub id: String,
    pub queue: String,
    pub payload: String,
    pub nacks: u64,
    pub additional_deliveries: u64,
}

/// Client for a Disque-style at-least-once job broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Enqueue a payload; returns the broker-assigned job ID.
    async fn add_job(&self, queue: &str, payload: &str, options: &AddOptions)
        -> BrokerResult<String>;

    /// Fetch up to `options.count` jobs from the given queues, blocking up
    /// to `options.timeout`. An empty vec means the queues were idle.
    async fn get_jobs(&self, queues: &[String], options: &GetOptions) -> BrokerResult<Vec<RawJob>>;

    /// Acknowledge a job: the broker forgets it.
    async fn ack_job(&self, id: &str) -> BrokerResult<()>;

    /// Negative-acknowledge: the broker requeues the job immediately and
    /// increments its nack counter.
    async fn nack(&self, id: &str) -> BrokerResult<()>;

    /// Current depth of a queue. Used by the predictive autoscaler.
    async fn queue_len(&self, queue: &str) -> BrokerResult<u64>;
}
