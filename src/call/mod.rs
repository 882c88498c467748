//! # Worker Call Abstraction
//!
//! A [`Call`] wraps one invocation attempt of a worker for one job and the
//! interpretation of its result. Calls never raise worker failure across
//! their interface boundary: a crashed subprocess, a non-zero exit, a
//! handler error, or a timeout all surface as `was_successful() == false`
//! plus an error message. Keeping this hot path exception-free is what lets
//! the dispatcher treat every call uniformly.
//!
//! ## Variants
//!
//! - [`CliCall`] - spawns `<worker-command> --body=.. --metadata=..` with a
//!   per-queue deadline
//! - [`InProcessCall`] - invokes a registered handler directly; the only
//!   blocking variant
//! - [`IsolatedCall`] - an in-process worker re-executed as a one-job
//!   subprocess, protecting the parent from crashes and leaks
//! - [`FailedCall`] - placeholder that always fails with a diagnostic, used
//!   when a call cannot even be constructed
//!
//! ## Lifecycle
//!
//! *not started* -> *running* -> *finished(success | failure)*. `start()`
//! is idempotent: calling it twice must not start the work twice.

pub mod cli;
pub mod failed;
pub mod in_process;
pub mod isolated;
pub mod registry;

use std::fmt;

use async_trait::async_trait;

use crate::job::Job;

pub use cli::{CallBuildError, CliCall};
pub use failed::FailedCall;
pub use in_process::InProcessCall;
pub use isolated::IsolatedCall;
pub use registry::{WorkerHandler, WorkerRegistry};

/// One invocation attempt of a worker for a job.
#[async_trait]
pub trait Call: Send {
    /// Whether starting this call runs the work to completion before
    /// returning. Only the synchronous in-process transport blocks; the
    /// dispatcher starts all non-blocking calls first to maximize overlap.
    fn is_blocking(&self) -> bool;

    /// Start the invocation. Idempotent: a second call is a no-op.
    async fn start(&mut self);

    /// Whether the invocation is still in flight. Always false for the
    /// in-process transport, whose work completes inside `start()`.
    async fn is_running(&mut self) -> bool;

    /// Stop and flag the call if it exceeded its deadline. Never errors.
    async fn check_timeout(&mut self);

    /// Whether the invocation succeeded. Awaits completion if the call is
    /// still running; the result is computed once and cached.
    async fn was_successful(&mut self) -> bool;

    /// Diagnostic message for a failed call.
    fn error_message(&self) -> Option<&str>;

    /// The originating job.
    fn job(&self) -> &Job;

    /// Surrender the originating job to a failure strategy.
    fn into_job(self: Box<Self>) -> Job;
}

impl fmt::Debug for dyn Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call").field("job", self.job()).finish()
    }
}
