//! Isolated subprocess call.
//!
//! Runs an in-process worker inside a one-job subprocess of the current
//! executable (`conveyor worker --name .. --queue ..`), protecting the
//! consumer from worker crashes and memory leaks. The wire protocol and
//! result interpretation are the CLI call's.

use std::time::Duration;

use async_trait::async_trait;

use crate::job::Job;

use super::cli::{CallBuildError, CliCall};
use super::Call;

/// An in-process worker re-executed as a one-job CLI subprocess.
pub struct IsolatedCall {
    inner: CliCall,
}

impl IsolatedCall {
    /// Build a call re-executing the current binary's `worker` subcommand
    /// for the named worker.
    pub fn build(job: Job, worker_name: &str, timeout: Duration) -> Result<Self, CallBuildError> {
        let executable = match std::env::current_exe() {
            Ok(path) => path,
            Err(err) => {
                return Err(CallBuildError {
                    message: format!("cannot locate current executable: {err}"),
                    job,
                })
            }
        };

        let args = vec![
            "worker".to_string(),
            "--name".to_string(),
            worker_name.to_string(),
            "--queue".to_string(),
            job.queue().to_string(),
        ];

        let inner = CliCall::from_parts(
            job,
            executable.display().to_string(),
            args,
            timeout,
        )?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl Call for IsolatedCall {
    fn is_blocking(&self) -> bool {
        false
    }

    async fn start(&mut self) {
        self.inner.start().await;
    }

    async fn is_running(&mut self) -> bool {
        self.inner.is_running().await
    }

    async fn check_timeout(&mut self) {
        self.inner.check_timeout().await;
    }

    async fn was_successful(&mut self) -> bool {
        self.inner.was_successful().await
    }

    fn error_message(&self) -> Option<&str> {
        self.inner.error_message()
    }

    fn job(&self) -> &Job {
        self.inner.job()
    }

    fn into_job(self: Box<Self>) -> Job {
        Box::new(self.inner).into_job()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn build_targets_current_executable_worker_subcommand() {
        let call =
            IsolatedCall::build(Job::new("q", json!(1)), "thumbnailer", Duration::from_secs(5))
                .unwrap();
        assert!(!call.is_blocking());
    }
}
