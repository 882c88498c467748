//! # Job Data Model
//!
//! The unit of work. A job always knows its queue and body; the broker ID,
//! delivery counters, and time metadata are attached after creation or when
//! the job is reconstructed from a broker response.
//!
//! ## Retry bookkeeping
//!
//! `retry_count = nacks + additional_deliveries + previous_retry_count`.
//! The broker-native counters reset whenever a failure strategy "moves" a
//! job (ACK + re-ADD of a clone), so the running total is carried in the
//! `retry_count` metadata key and survives the move.

pub mod codec;

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Metadata keys carried alongside the job body.
pub mod metadata {
    /// Retry count accumulated before the last move (u64).
    pub const RETRY_COUNT: &str = "retry_count";
    /// Unix timestamp of first enqueue (i64 seconds).
    pub const CREATED_AT: &str = "created_at";
    /// Configured total lifetime (u64 seconds).
    pub const LIFETIME: &str = "lifetime";
    /// First broker-assigned ID, preserved across moves for log correlation.
    pub const ORIGINAL_ID: &str = "original_id";
}

/// One unit of work: queue, body, metadata, and retry/lifetime bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    id: Option<String>,
    original_id: Option<String>,
    queue: String,
    body: serde_json::Value,
    metadata: HashMap<String, serde_json::Value>,
    nacks: u64,
    additional_deliveries: u64,
}

impl Job {
    /// Create a job with no bookkeeping metadata. Producers normally use
    /// [`Job::with_lifetime`] so the lifetime budget is stamped at creation.
    pub fn new(queue: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            id: None,
            original_id: None,
            queue: queue.into(),
            body,
            metadata: HashMap::new(),
            nacks: 0,
            additional_deliveries: 0,
        }
    }

    /// Create a job stamped with `created_at` and `lifetime` metadata.
    pub fn with_lifetime(
        queue: impl Into<String>,
        body: serde_json::Value,
        lifetime: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let mut job = Self::new(queue, body);
        job.metadata.insert(
            metadata::CREATED_AT.to_string(),
            serde_json::json!(now.timestamp()),
        );
        job.metadata.insert(
            metadata::LIFETIME.to_string(),
            serde_json::json!(lifetime.as_secs()),
        );
        job
    }

    /// Create a job with an explicit metadata map and no broker id. Used by
    /// the one-job worker subprocess, which receives both over argv.
    pub fn with_metadata(
        queue: impl Into<String>,
        body: serde_json::Value,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            metadata,
            ..Self::new(queue, body)
        }
    }

    /// Reconstruct a job from a broker response.
    pub fn from_broker(
        id: impl Into<String>,
        queue: impl Into<String>,
        body: serde_json::Value,
        metadata: HashMap<String, serde_json::Value>,
        nacks: u64,
        additional_deliveries: u64,
    ) -> Self {
        let id = id.into();
        let original_id = metadata
            .get(metadata::ORIGINAL_ID)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| id.clone());

        Self {
            id: Some(id),
            original_id: Some(original_id),
            queue: queue.into(),
            body,
            metadata,
            nacks,
            additional_deliveries,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// The first broker-assigned ID, surviving moves. Used for log
    /// correlation across requeues.
    pub fn original_id(&self) -> Option<&str> {
        self.original_id.as_deref()
    }

    /// Attach a broker-assigned ID. The original ID is captured on first
    /// assignment only.
    pub fn assign_id(&mut self, id: impl Into<String>) {
        let id = id.into();
        if self.original_id.is_none() {
            self.original_id = Some(id.clone());
        }
        self.id = Some(id);
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn body(&self) -> &serde_json::Value {
        &self.body
    }

    pub fn metadata(&self) -> &HashMap<String, serde_json::Value> {
        &self.metadata
    }

    pub fn nacks(&self) -> u64 {
        self.nacks
    }

    pub fn additional_deliveries(&self) -> u64 {
        self.additional_deliveries
    }

    /// Retry count carried in metadata from before the last move.
    pub fn previous_retry_count(&self) -> u64 {
        self.metadata
            .get(metadata::RETRY_COUNT)
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    }

    /// Total retry count across all deliveries and moves.
    pub fn retry_count(&self) -> u64 {
        self.nacks + self.additional_deliveries + self.previous_retry_count()
    }

    /// Unix timestamp of first enqueue, if stamped.
    pub fn created_at(&self) -> Option<i64> {
        self.metadata
            .get(metadata::CREATED_AT)
            .and_then(|v| v.as_i64())
    }

    /// Configured total lifetime, if stamped.
    pub fn lifetime(&self) -> Option<Duration> {
        self.metadata
            .get(metadata::LIFETIME)
            .and_then(|v| v.as_u64())
            .map(Duration::from_secs)
    }

    /// Seconds of lifetime budget left: `created_at + lifetime - now`.
    /// `None` when the job carries no time metadata.
    pub fn remaining_lifetime(&self, now: DateTime<Utc>) -> Option<i64> {
        let created = self.created_at()?;
        let lifetime = self.lifetime()?.as_secs() as i64;
        Some(created + lifetime - now.timestamp())
    }

    /// Clone this job for a requeue onto the same queue.
    ///
    /// The clone has no broker ID yet, fresh broker counters, and a
    /// `retry_count` metadata entry accounting for the attempt that just
    /// failed, so the retry-count invariant holds across the move.
    pub fn requeue_clone(&self) -> Job {
        self.requeue_clone_into(self.queue.clone())
    }

    /// Clone this job for a requeue onto `queue` (used for failure-queue
    /// eviction).
    pub fn requeue_clone_into(&self, queue: impl Into<String>) -> Job {
        let mut metadata = self.metadata.clone();
        metadata.insert(
            metadata::RETRY_COUNT.to_string(),
            serde_json::json!(self.retry_count() + 1),
        );
        if let Some(original) = self.original_id.as_deref().or(self.id.as_deref()) {
            metadata.insert(
                metadata::ORIGINAL_ID.to_string(),
                serde_json::json!(original),
            );
        }

        Job {
            id: None,
            original_id: self.original_id.clone().or_else(|| self.id.clone()),
            queue: queue.into(),
            body: self.body.clone(),
            metadata,
            nacks: 0,
            additional_deliveries: 0,
        }
    }
}
