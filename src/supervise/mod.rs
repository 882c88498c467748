//! # Process Supervision
//!
//! The supervisor owns the consumer fleet as OS processes, not threads: one
//! child per consumer instance, each re-executing this binary's `consume`
//! subcommand. Groups map queue sets to fleets, the autoscalers size them,
//! and shutdown is two-phase so every process starts draining before the
//! first one is awaited.

pub mod autoscale;
pub mod group;
pub mod spawner;
pub mod supervisor;

pub use autoscale::{AutoscaleAlgorithm, ConstantAutoscale, PredictiveAutoscale};
pub use group::ConsumerProcessGroup;
pub use spawner::{ConsumerProcess, ConsumerProcessSpawner, ProcessMode, ProcessSpawner};
pub use supervisor::Supervisor;
