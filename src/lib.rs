//! # Conveyor
//!
//! Control plane for Disque-style job brokers (ADDJOB/GETJOB/ACKJOB/NACK
//! semantics). Conveyor turns a bare at-least-once broker into a managed
//! job-processing platform: it routes jobs to workers, invokes those workers
//! through pluggable transports, interprets success and failure, applies
//! configurable retry and backoff policies, and supervises a fleet of
//! consumer processes that scales with load.
//!
//! ## Architecture
//!
//! Control flow runs top-down through the module tree:
//!
//! ```text
//! Supervisor -> ConsumerProcessGroup -> consumer process -> JobDispatcher
//!            -> JobRouter -> Call -> ACK (success) / FailureStrategy (failure)
//! ```
//!
//! - [`job`] - the unit of work: body, queue, metadata, retry bookkeeping
//! - [`broker`] - the Disque-dialect broker client and response unmarshalling
//! - [`routing`] - routes, worker directions, and the call factory
//! - [`call`] - worker invocation transports (CLI, in-process, isolated)
//! - [`dispatch`] - batch orchestration: order, start, await, resolve
//! - [`failure`] - retry/backoff/failure-queue policies
//! - [`consumer`] - the signal-aware fetch/dispatch loop
//! - [`supervise`] - process groups, autoscaling, and the supervisor loop
//! - [`config`] - YAML configuration with explicit validation
//!
//! ## Scheduling model
//!
//! Conveyor runs multiple OS processes, not in-process threads: one
//! supervisor, one process per consumer instance, and one short-lived child
//! per CLI worker invocation. Within a consumer process, control is
//! single-threaded cooperative polling over a small set of in-flight calls.

pub mod bootstrap;
pub mod broker;
pub mod call;
pub mod config;
pub mod consumer;
pub mod dispatch;
pub mod failure;
pub mod job;
pub mod logging;
pub mod producer;
pub mod routing;
pub mod shutdown;
pub mod supervise;
pub mod test_helpers;

pub use broker::{AddOptions, Broker, BrokerError, GetOptions, RawJob};
pub use call::{Call, WorkerRegistry};
pub use config::{ConfigManager, ConfigurationError, ConveyorConfig};
pub use consumer::{Consumer, ConsumerState};
pub use dispatch::{DispatchError, JobDispatcher, SyncDispatcher};
pub use failure::{FailureStrategy, FailureStrategyCollection};
pub use job::Job;
pub use routing::{JobRouter, RoutingError, WorkerDirections, WorkerKind};
pub use shutdown::ShutdownToken;
pub use supervise::Supervisor;
