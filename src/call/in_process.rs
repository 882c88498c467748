//! In-process call.
//!
//! Invokes a registered handler function directly. This is the only
//! blocking transport: the work runs to completion inside `start()`, so
//! `is_running()` is always false by definition. Handler errors and panics
//! are converted into a failed result plus message, never propagated.

use std::panic::{catch_unwind, AssertUnwindSafe};

use async_trait::async_trait;

use crate::job::Job;

use super::registry::WorkerHandler;
use super::Call;

/// Direct invocation of an in-process worker.
pub struct InProcessCall {
    job: Job,
    handler: WorkerHandler,
    started: bool,
    outcome: Option<bool>,
    error_message: Option<String>,
}

impl InProcessCall {
    pub fn new(job: Job, handler: WorkerHandler) -> Self {
        Self {
            job,
            handler,
            started: false,
            outcome: None,
            error_message: None,
        }
    }
}

#[async_trait]
impl Call for InProcessCall {
    fn is_blocking(&self) -> bool {
        true
    }

    async fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;

        let handler = &self.handler;
        let job = &self.job;
        match catch_unwind(AssertUnwindSafe(|| handler(job))) {
            Ok(Ok(())) => self.outcome = Some(true),
            Ok(Err(message)) => {
                self.outcome = Some(false);
                self.error_message = Some(message);
            }
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<String>()
                    .map(String::as_str)
                    .or_else(|| panic.downcast_ref::<&str>().copied())
                    .unwrap_or("unknown panic");
                self.outcome = Some(false);
                self.error_message = Some(format!("worker panicked: {detail}"));
            }
        }
    }

    async fn is_running(&mut self) -> bool {
        // The work happens entirely inside start(); there is never an
        // in-flight state to observe.
        false
    }

    async fn check_timeout(&mut self) {}

    async fn was_successful(&mut self) -> bool {
        if self.outcome.is_none() {
            self.outcome = Some(false);
            self.error_message = Some("worker was never started".to_string());
        }
        self.outcome.unwrap_or(false)
    }

    fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    fn job(&self) -> &Job {
        &self.job
    }

    fn into_job(self: Box<Self>) -> Job {
        self.job
    }
}
