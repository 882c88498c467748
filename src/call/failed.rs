//! Always-failing placeholder call.
//!
//! Substituted when a real call cannot be constructed (missing in-process
//! worker, marshal failure, empty command). The job must not crash the
//! batch; it flows through the normal failure path and is retried or
//! failure-routed like any other failed job.

use async_trait::async_trait;

use crate::job::Job;

use super::Call;

/// A call that finished failed before it could start.
pub struct FailedCall {
    job: Job,
    message: String,
}

impl FailedCall {
    pub fn new(job: Job, message: impl Into<String>) -> Self {
        Self {
            job,
            message: message.into(),
        }
    }
}

#[async_trait]
impl Call for FailedCall {
    fn is_blocking(&self) -> bool {
        false
    }

    async fn start(&mut self) {}

    async fn is_running(&mut self) -> bool {
        false
    }

    async fn check_timeout(&mut self) {}

    async fn was_successful(&mut self) -> bool {
        false
    }

    fn error_message(&self) -> Option<&str> {
        Some(&self.message)
    }

    fn job(&self) -> &Job {
        &self.job
    }

    fn into_job(self: Box<Self>) -> Job {
        self.job
    }
}
