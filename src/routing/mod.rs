//! # Job Routing
//!
//! Maps a job to [`WorkerDirections`] and from there to a [`Call`] via the
//! [`CallFactory`].
//!
//! ## Resolution order
//!
//! 1. The pluggable directions hook; when it supplies directions, the
//!    registered routes are skipped entirely.
//! 2. Registered routes, most-recently-added first, so later registrations
//!    override earlier ones for the same queue. The first route that both
//!    supports the queue and returns directions wins.
//! 3. Otherwise routing fails with [`RoutingError::NoRoute`].
//!
//! An unsupported worker kind at the factory stage is treated like a config
//! syntax error: fatal, surfaced immediately, never silently swallowed at
//! runtime.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::call::{Call, CliCall, FailedCall, InProcessCall, IsolatedCall, WorkerRegistry};
use crate::config::ConveyorConfig;
use crate::job::Job;

/// Worker transport, as a closed tagged type. Unknown tags are rejected at
/// configuration load time, not per job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerKind {
    Cli,
    Http,
    InProcess,
    IsolatedSubprocess,
}

impl WorkerKind {
    pub fn name(&self) -> &'static str {
        match self {
            WorkerKind::Cli => "cli",
            WorkerKind::Http => "http",
            WorkerKind::InProcess => "in-process",
            WorkerKind::IsolatedSubprocess => "isolated-subprocess",
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolved description of how and where to call a worker for a job.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerDirections {
    pub kind: WorkerKind,
    /// Command line, handler name, or URL depending on the kind.
    pub address: String,
    pub parameters: BTreeMap<String, serde_json::Value>,
}

impl WorkerDirections {
    pub fn new(kind: WorkerKind, address: impl Into<String>) -> Self {
        Self {
            kind,
            address: address.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameters(
        mut self,
        parameters: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Errors raised while routing a job to a call.
#[derive(Error, Debug)]
pub enum RoutingError {
    /// No hook or route produced directions. The job is dropped from the
    /// batch and left for redelivery; retrying cannot fix missing routes.
    #[error("no route found for queue '{queue}' (job {job_id})")]
    NoRoute { queue: String, job_id: String },

    /// A route produced directions no call transport exists for. This is a
    /// deployment defect and aborts the batch.
    #[error("no call transport for worker kind '{kind}'")]
    UnsupportedWorker { kind: WorkerKind },
}

impl RoutingError {
    /// Fatal errors abort the batch; non-fatal ones drop only the job.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RoutingError::UnsupportedWorker { .. })
    }
}

/// A policy mapping queues to worker directions.
pub trait Route: Send + Sync {
    /// Whether this route covers the given queue.
    fn supports(&self, queue: &str) -> bool;

    /// Directions for a job on a supported queue, or `None` to pass.
    fn directions_for(&self, job: &Job) -> Option<WorkerDirections>;
}

/// The standard config-driven route: one queue, fixed directions.
pub struct QueueRoute {
    queue: String,
    directions: WorkerDirections,
}

impl QueueRoute {
    pub fn new(queue: impl Into<String>, directions: WorkerDirections) -> Self {
        Self {
            queue: queue.into(),
            directions,
        }
    }
}

impl Route for QueueRoute {
    fn supports(&self, queue: &str) -> bool {
        self.queue == queue
    }

    fn directions_for(&self, _job: &Job) -> Option<WorkerDirections> {
        Some(self.directions.clone())
    }
}

/// Pre-routing hook. When it returns directions, routes are not consulted.
pub type DirectionsHook = Box<dyn Fn(&Job) -> Option<WorkerDirections> + Send + Sync>;

/// Builds calls from worker directions, keyed on the worker kind.
pub struct CallFactory {
    config: Arc<ConveyorConfig>,
    registry: Arc<WorkerRegistry>,
}

impl CallFactory {
    pub fn new(config: Arc<ConveyorConfig>, registry: Arc<WorkerRegistry>) -> Self {
        Self { config, registry }
    }

    /// Build a call for `job` according to `directions`.
    ///
    /// Construction failures of a concrete call (marshal failure, empty
    /// command, missing in-process worker) yield a [`FailedCall`] so the
    /// job flows through normal failure handling instead of crashing the
    /// batch. Only an unsupported worker kind is fatal.
    pub fn build(
        &self,
        job: Job,
        directions: &WorkerDirections,
    ) -> Result<Box<dyn Call>, RoutingError> {
        let timeout = self.config.process_timeout(job.queue());

        match directions.kind {
            WorkerKind::Cli => Ok(match CliCall::build(job, &directions.address, timeout) {
                Ok(call) => Box::new(call),
                Err(build_err) => {
                    warn!(
                        queue = %build_err.job.queue(),
                        error = %build_err.message,
                        "CLI call construction failed, substituting failing call"
                    );
                    Box::new(FailedCall::new(build_err.job, build_err.message))
                }
            }),
            WorkerKind::InProcess => match self.registry.get(&directions.address) {
                Some(handler) => Ok(Box::new(InProcessCall::new(job, handler))),
                None => {
                    let message = format!(
                        "in-process worker '{}' is not registered",
                        directions.address
                    );
                    warn!(queue = %job.queue(), worker = %directions.address, "missing in-process worker");
                    Ok(Box::new(FailedCall::new(job, message)))
                }
            },
            WorkerKind::IsolatedSubprocess => {
                Ok(match IsolatedCall::build(job, &directions.address, timeout) {
                    Ok(call) => Box::new(call),
                    Err(build_err) => {
                        warn!(
                            queue = %build_err.job.queue(),
                            error = %build_err.message,
                            "isolated call construction failed, substituting failing call"
                        );
                        Box::new(FailedCall::new(build_err.job, build_err.message))
                    }
                })
            }
            WorkerKind::Http => Err(RoutingError::UnsupportedWorker {
                kind: directions.kind,
            }),
        }
    }
}

/// Routes jobs to calls.
pub struct JobRouter {
    hook: Option<DirectionsHook>,
    routes: Vec<Box<dyn Route>>,
    factory: CallFactory,
}

impl JobRouter {
    pub fn new(factory: CallFactory) -> Self {
        Self {
            hook: None,
            routes: Vec::new(),
            factory,
        }
    }

    /// Install the pre-routing directions hook.
    pub fn set_hook(&mut self, hook: DirectionsHook) {
        self.hook = Some(hook);
    }

    /// Register a route. Later registrations take precedence over earlier
    /// ones for the same queue.
    pub fn register_route(&mut self, route: Box<dyn Route>) {
        self.routes.push(route);
    }

    /// Resolve a job to a ready-to-start call.
    pub fn call_for(&self, job: Job) -> Result<Box<dyn Call>, RoutingError> {
        let directions = match self.resolve_directions(&job) {
            Some(directions) => directions,
            None => {
                return Err(RoutingError::NoRoute {
                    queue: job.queue().to_string(),
                    job_id: job.id().unwrap_or("unassigned").to_string(),
                })
            }
        };

        self.factory.build(job, &directions)
    }

    fn resolve_directions(&self, job: &Job) -> Option<WorkerDirections> {
        if let Some(hook) = &self.hook {
            if let Some(directions) = hook(job) {
                return Some(directions);
            }
        }

        self.routes
            .iter()
            .rev()
            .find_map(|route| {
                if route.supports(job.queue()) {
                    route.directions_for(job)
                } else {
                    None
                }
            })
    }
}
