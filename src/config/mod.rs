//! # Conveyor Configuration System
//!
//! YAML-based configuration with explicit validation and no silent
//! fallbacks. Every queue the system consumes from is declared here, along
//! with how its worker is called, how failures are retried, and how the
//! consumer fleet for it is sized.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use conveyor::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load(None)?;
//! let timeout = manager.config().process_timeout("emails");
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::routing::WorkerKind;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

fn default_max_retries() -> u64 {
    25
}

fn default_process_timeout_seconds() -> u64 {
    60
}

fn default_job_lifetime_seconds() -> u64 {
    3600
}

fn default_fetch_timeout_ms() -> u64 {
    200
}

fn default_min_processes() -> usize {
    1
}

fn default_max_processes() -> usize {
    1
}

fn default_batch_size() -> usize {
    10
}

fn default_floor() -> usize {
    1
}

fn default_short_window_seconds() -> u64 {
    60
}

fn default_long_window_seconds() -> u64 {
    900
}

fn default_check_interval_ms() -> u64 {
    1000
}

fn default_shutdown_grace_seconds() -> u64 {
    30
}

fn default_log_directory() -> PathBuf {
    PathBuf::from("log")
}

/// Root configuration structure mirroring conveyor.yaml.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConveyorConfig {
    /// Broker connection settings.
    pub broker: BrokerConfig,

    /// Queue definitions keyed by queue name. BTreeMap keeps route
    /// registration and default-group membership deterministic.
    #[serde(default)]
    pub queues: BTreeMap<String, QueueConfig>,

    /// Explicit consumer fleet entries. Queues not covered by any entry are
    /// handled by a default group built by the supervisor.
    #[serde(default)]
    pub consumers: Vec<ConsumerEntry>,

    /// Supervisor loop settings and fleet defaults.
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ConveyorConfig {
    /// Per-queue configuration, if the queue is defined.
    pub fn queue(&self, name: &str) -> Option<&QueueConfig> {
        self.queues.get(name)
    }

    /// All defined queue names, in deterministic order.
    pub fn queue_names(&self) -> Vec<String> {
        self.queues.keys().cloned().collect()
    }

    /// Worker subprocess deadline for a queue (falls back to the global
    /// default when the queue is undefined).
    pub fn process_timeout(&self, queue: &str) -> Duration {
        let seconds = self
            .queue(queue)
            .map(|q| q.process_timeout_seconds)
            .unwrap_or_else(default_process_timeout_seconds);
        Duration::from_secs(seconds)
    }

    /// Configured job lifetime for a queue.
    pub fn job_lifetime(&self, queue: &str) -> Duration {
        let seconds = self
            .queue(queue)
            .map(|q| q.job_lifetime_seconds)
            .unwrap_or_else(default_job_lifetime_seconds);
        Duration::from_secs(seconds)
    }

    /// Maximum retry attempts before a job is evicted to its failure queue.
    pub fn max_retries(&self, queue: &str) -> u64 {
        self.queue(queue)
            .map(|q| q.max_retries)
            .unwrap_or_else(default_max_retries)
    }

    /// The failure queue holding jobs that exhausted retries or lifetime.
    /// Defaults to `<queue>.failed` when not configured.
    pub fn failure_queue_name(&self, queue: &str) -> String {
        self.queue(queue)
            .and_then(|q| q.failure_queue.clone())
            .unwrap_or_else(|| format!("{queue}.failed"))
    }

    /// Configured failure-strategy name for a queue, if any.
    pub fn failure_strategy_name(&self, queue: &str) -> Option<&str> {
        self.queue(queue).and_then(|q| q.failure_strategy.as_deref())
    }

    /// Validate cross-field constraints that serde cannot express.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.broker.url.is_empty() {
            return Err(ConfigurationError::invalid("broker.url must not be empty"));
        }

        for entry in &self.consumers {
            if entry.queues.is_empty() {
                return Err(ConfigurationError::invalid(format!(
                    "consumer '{}' declares no queues",
                    entry.name
                )));
            }
            if entry.min_processes < 1 {
                return Err(ConfigurationError::invalid(format!(
                    "consumer '{}': min_processes must be at least 1",
                    entry.name
                )));
            }
            if entry.min_processes > entry.max_processes {
                return Err(ConfigurationError::invalid(format!(
                    "consumer '{}': min_processes ({}) exceeds max_processes ({})",
                    entry.name, entry.min_processes, entry.max_processes
                )));
            }
        }

        Ok(())
    }
}

/// Broker connection and fetch settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    /// Broker URL, e.g. `redis://localhost:7711`.
    pub url: String,

    /// GETJOB timeout. Kept short so pending signals are observed between
    /// fetches.
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
}

impl BrokerConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

/// Per-queue configuration: worker, retry policy, and lifetime budget.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// How and where to call the worker for this queue.
    pub worker: WorkerConfig,

    /// Retry attempts before eviction to the failure queue.
    #[serde(default = "default_max_retries")]
    pub max_retries: u64,

    /// Failure queue name. Defaults to `<queue>.failed`.
    #[serde(default)]
    pub failure_queue: Option<String>,

    /// Deadline for one worker invocation.
    #[serde(default = "default_process_timeout_seconds")]
    pub process_timeout_seconds: u64,

    /// Total time budget for a job, including requeue delays.
    #[serde(default = "default_job_lifetime_seconds")]
    pub job_lifetime_seconds: u64,

    /// Named failure strategy. Falls back to the global `retry` default.
    #[serde(default)]
    pub failure_strategy: Option<String>,
}

/// Worker transport and address for a queue.
///
/// The worker kind is a closed enum: an unknown tag is rejected when the
/// configuration is parsed, not when the first job arrives.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    pub kind: WorkerKind,

    /// Command line, handler name, or URL depending on the kind.
    pub address: String,

    /// Free-form parameters passed through to the call.
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

/// One explicit consumer fleet entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsumerEntry {
    pub name: String,

    /// Queues this fleet consumes from. Every name must be a defined queue;
    /// the supervisor refuses to start otherwise.
    pub queues: Vec<String>,

    /// Permanent process floor.
    #[serde(default = "default_min_processes")]
    pub min_processes: usize,

    /// Hard ceiling including burst processes.
    #[serde(default = "default_max_processes")]
    pub max_processes: usize,

    /// Jobs fetched per GETJOB. Clamped to 1..=99 by the consumer.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default)]
    pub autoscale: AutoscaleConfig,
}

/// Autoscale algorithm selection and tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AutoscaleConfig {
    #[serde(default)]
    pub algorithm: AutoscaleKind,

    /// Fixed recommendation for the constant algorithm.
    #[serde(default = "default_floor")]
    pub floor: usize,

    /// Predictive short trend window; also the re-evaluation interval.
    #[serde(default = "default_short_window_seconds")]
    pub short_window_seconds: u64,

    /// Predictive long trend window; measurements older than this are
    /// discarded.
    #[serde(default = "default_long_window_seconds")]
    pub long_window_seconds: u64,
}

impl Default for AutoscaleConfig {
    fn default() -> Self {
        Self {
            algorithm: AutoscaleKind::default(),
            floor: default_floor(),
            short_window_seconds: default_short_window_seconds(),
            long_window_seconds: default_long_window_seconds(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AutoscaleKind {
    #[default]
    Constant,
    Predictive,
}

/// Supervisor loop settings plus defaults for the implicit group covering
/// queues without an explicit consumer entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,

    /// Grace period per process during the second shutdown phase before a
    /// hard kill.
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,

    #[serde(default = "default_min_processes")]
    pub default_min_processes: usize,

    #[serde(default = "default_max_processes")]
    pub default_max_processes: usize,

    #[serde(default = "default_batch_size")]
    pub default_batch_size: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: default_check_interval_ms(),
            shutdown_grace_seconds: default_shutdown_grace_seconds(),
            default_min_processes: default_min_processes(),
            default_max_processes: default_max_processes(),
            default_batch_size: default_batch_size(),
        }
    }
}

impl SupervisorConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_directory")]
    pub directory: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_log_directory(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
broker:
  url: redis://localhost:7711
queues:
  emails:
    worker:
      kind: cli
      address: "bin/send-email"
    max_retries: 5
    failure_queue: emails.dead
  thumbnails:
    worker:
      kind: in-process
      address: thumbnailer
consumers:
  - name: email-fleet
    queues: [emails]
    min_processes: 2
    max_processes: 6
    batch_size: 20
    autoscale:
      algorithm: predictive
      short_window_seconds: 30
"#;

    #[test]
    fn parses_sample_and_applies_defaults() {
        let config: ConveyorConfig = serde_yaml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.max_retries("emails"), 5);
        assert_eq!(config.failure_queue_name("emails"), "emails.dead");
        assert_eq!(config.failure_queue_name("thumbnails"), "thumbnails.failed");
        assert_eq!(config.process_timeout("thumbnails"), Duration::from_secs(60));
        assert_eq!(config.max_retries("thumbnails"), 25);

        let fleet = &config.consumers[0];
        assert_eq!(fleet.autoscale.algorithm, AutoscaleKind::Predictive);
        assert_eq!(fleet.autoscale.short_window_seconds, 30);
        assert_eq!(fleet.autoscale.long_window_seconds, 900);
    }

    #[test]
    fn rejects_unknown_worker_kind() {
        let yaml = r#"
broker:
  url: redis://localhost:7711
queues:
  emails:
    worker:
      kind: carrier-pigeon
      address: coop
"#;
        assert!(serde_yaml::from_str::<ConveyorConfig>(yaml).is_err());
    }

    #[test]
    fn rejects_min_above_max() {
        let yaml = r#"
broker:
  url: redis://localhost:7711
queues:
  emails:
    worker:
      kind: cli
      address: "bin/send-email"
consumers:
  - name: bad
    queues: [emails]
    min_processes: 5
    max_processes: 2
"#;
        let config: ConveyorConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn undefined_queue_accessors_fall_back_to_defaults() {
        let config: ConveyorConfig = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(config.process_timeout("nope"), Duration::from_secs(60));
        assert_eq!(config.job_lifetime("nope"), Duration::from_secs(3600));
        assert_eq!(config.failure_queue_name("nope"), "nope.failed");
    }
}
