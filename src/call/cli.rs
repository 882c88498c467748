//! CLI subprocess call.
//!
//! Spawns `<worker-command> --body=<marshalled> --metadata=<marshalled>` as
//! a child process with a per-queue deadline. Spawn failures, non-zero
//! exits, and timeouts are all reported through the call result, never
//! raised.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::job::codec;
use crate::job::Job;

use super::Call;

/// A call that could not be constructed. Carries the job back so the
/// factory can substitute a failing call and keep the batch exception-free.
#[derive(Debug)]
pub struct CallBuildError {
    pub job: Job,
    pub message: String,
}

/// Subprocess invocation of a CLI worker.
#[derive(Debug)]
pub struct CliCall {
    job: Job,
    program: String,
    args: Vec<String>,
    timeout: Duration,
    child: Option<Child>,
    started: bool,
    started_at: Option<Instant>,
    outcome: Option<bool>,
    error_message: Option<String>,
}

impl CliCall {
    /// Build a call for `command`, marshalling the job into protocol
    /// arguments. Fails (returning the job) on an empty command or a
    /// marshalling error.
    pub fn build(job: Job, command: &str, timeout: Duration) -> Result<Self, CallBuildError> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = match parts.next() {
            Some(program) => program,
            None => {
                return Err(CallBuildError {
                    message: "worker command is empty".to_string(),
                    job,
                })
            }
        };
        let args: Vec<String> = parts.collect();
        Self::from_parts(job, program, args, timeout)
    }

    /// Build a call from an explicit program and argument list. The
    /// marshalled `--body`/`--metadata` protocol arguments are appended.
    pub fn from_parts(
        job: Job,
        program: String,
        mut args: Vec<String>,
        timeout: Duration,
    ) -> Result<Self, CallBuildError> {
        let body = match codec::marshal_body(job.body()) {
            Ok(body) => body,
            Err(err) => {
                return Err(CallBuildError {
                    message: format!("failed to marshal job body: {err}"),
                    job,
                })
            }
        };
        let metadata = match codec::marshal_metadata(job.metadata()) {
            Ok(metadata) => metadata,
            Err(err) => {
                return Err(CallBuildError {
                    message: format!("failed to marshal job metadata: {err}"),
                    job,
                })
            }
        };

        args.push(format!("--body={body}"));
        args.push(format!("--metadata={metadata}"));

        Ok(Self {
            job,
            program,
            args,
            timeout,
            child: None,
            started: false,
            started_at: None,
            outcome: None,
            error_message: None,
        })
    }

    fn record_exit(&mut self, status: std::process::ExitStatus) {
        if status.success() {
            self.outcome = Some(true);
        } else {
            self.outcome = Some(false);
            self.error_message = Some(format!(
                "worker command '{}' exited with {status}",
                self.program
            ));
        }
    }

    fn record_failure(&mut self, message: String) {
        self.outcome = Some(false);
        self.error_message = Some(message);
    }
}

#[async_trait]
impl Call for CliCall {
    fn is_blocking(&self) -> bool {
        false
    }

    async fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match cmd.spawn() {
            Ok(child) => {
                debug!(
                    job_id = self.job.id().unwrap_or("unassigned"),
                    queue = %self.job.queue(),
                    program = %self.program,
                    "worker subprocess started"
                );
                self.child = Some(child);
                self.started_at = Some(Instant::now());
            }
            Err(err) => {
                self.record_failure(format!(
                    "failed to spawn worker command '{}': {err}",
                    self.program
                ));
            }
        }
    }

    async fn is_running(&mut self) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        let child = match self.child.as_mut() {
            Some(child) => child,
            None => return false,
        };

        match child.try_wait() {
            Ok(Some(status)) => {
                self.record_exit(status);
                self.child = None;
                false
            }
            Ok(None) => true,
            Err(err) => {
                self.record_failure(format!("failed to poll worker subprocess: {err}"));
                self.child = None;
                false
            }
        }
    }

    async fn check_timeout(&mut self) {
        if self.outcome.is_some() {
            return;
        }
        let deadline_hit = self
            .started_at
            .map(|at| at.elapsed() >= self.timeout)
            .unwrap_or(false);
        if !deadline_hit {
            return;
        }

        if let Some(mut child) = self.child.take() {
            warn!(
                job_id = self.job.id().unwrap_or("unassigned"),
                queue = %self.job.queue(),
                timeout_secs = self.timeout.as_secs(),
                "worker subprocess exceeded deadline, killing"
            );
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        self.record_failure(format!(
            "worker timed out after {}s",
            self.timeout.as_secs()
        ));
    }

    async fn was_successful(&mut self) -> bool {
        if self.outcome.is_none() {
            match self.child.take() {
                Some(mut child) => match child.wait().await {
                    Ok(status) => self.record_exit(status),
                    Err(err) => {
                        self.record_failure(format!("failed to await worker subprocess: {err}"))
                    }
                },
                None => self.record_failure("worker subprocess was never started".to_string()),
            }
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job() -> Job {
        Job::new("q", json!({"n": 1}))
    }

    #[test]
    fn build_appends_protocol_arguments() {
        let call = CliCall::build(job(), "bin/worker --flag", Duration::from_secs(5)).unwrap();
        assert_eq!(call.program, "bin/worker");
        assert_eq!(call.args[0], "--flag");
        assert!(call.args[1].starts_with("--body="));
        assert!(call.args[2].starts_with("--metadata="));
    }

    #[test]
    fn empty_command_fails_build_and_returns_job() {
        let err = CliCall::build(job(), "   ", Duration::from_secs(5)).unwrap_err();
        assert!(err.message.contains("empty"));
        assert_eq!(err.job.queue(), "q");
    }

    #[tokio::test]
    async fn successful_exit_reports_success() {
        let mut call = CliCall::build(job(), "true", Duration::from_secs(5)).unwrap();
        call.start().await;
        assert!(call.was_successful().await);
        assert!(call.error_message().is_none());
    }

    #[tokio::test]
    async fn nonzero_exit_reports_failure_with_message() {
        let mut call = CliCall::build(job(), "false", Duration::from_secs(5)).unwrap();
        call.start().await;
        assert!(!call.was_successful().await);
        assert!(call.error_message().unwrap().contains("exited"));
    }

    #[tokio::test]
    async fn spawn_failure_is_reported_not_raised() {
        let mut call = CliCall::build(
            job(),
            "/nonexistent/conveyor-worker",
            Duration::from_secs(5),
        )
        .unwrap();
        call.start().await;
        assert!(!call.is_running().await);
        assert!(!call.was_successful().await);
        assert!(call.error_message().unwrap().contains("failed to spawn"));
    }

    #[tokio::test]
    async fn timeout_kills_and_flags_the_call() {
        let mut call = CliCall::build(job(), "sleep 30", Duration::from_millis(50)).unwrap();
        call.start().await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        call.check_timeout().await;

        assert!(!call.is_running().await);
        assert!(!call.was_successful().await);
        assert!(call.error_message().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let mut call = CliCall::build(job(), "true", Duration::from_secs(5)).unwrap();
        call.start().await;
        let first = call.was_successful().await;
        // A second start must not respawn the finished invocation.
        call.start().await;
        assert!(call.child.is_none());
        assert_eq!(call.was_successful().await, first);
    }

    #[tokio::test]
    async fn never_started_call_fails_with_message() {
        let mut call = CliCall::build(job(), "true", Duration::from_secs(5)).unwrap();
        assert!(!call.was_successful().await);
        assert!(call.error_message().unwrap().contains("never started"));
    }
}
