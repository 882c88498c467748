//! The top-level process: builds consumer groups from configuration and
//! keeps their fleets alive until signalled.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::broker::Broker;
use crate::config::{
    AutoscaleConfig, AutoscaleKind, ConfigResult, ConfigurationError, ConveyorConfig,
};
use crate::shutdown::ShutdownToken;

use super::autoscale::{AutoscaleAlgorithm, ConstantAutoscale, PredictiveAutoscale};
use super::group::ConsumerProcessGroup;
use super::spawner::ConsumerProcessSpawner;

/// Name of the implicit group covering queues without an explicit
/// consumer entry.
const DEFAULT_GROUP: &str = "default";

/// Supervises every consumer group: spawn, reap, scale, and shut down.
pub struct Supervisor {
    config: Arc<ConveyorConfig>,
    groups: Vec<ConsumerProcessGroup>,
    shutdown: ShutdownToken,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor").finish_non_exhaustive()
    }
}


impl Supervisor {
    /// Build groups from configuration.
    ///
    /// Every queue an explicit consumer entry references must be defined;
    /// a dangling reference is a fatal configuration error, caught here
    /// rather than when the first fetch on a ghost queue comes back empty
    /// forever. Queues no entry covers are served by a default group using
    /// the supervisor-level fleet defaults.
    pub fn build(
        config: Arc<ConveyorConfig>,
        broker: Arc<dyn Broker>,
        config_path: Option<PathBuf>,
    ) -> ConfigResult<Self> {
        config.validate()?;

        let mut covered: BTreeSet<String> = BTreeSet::new();
        let mut groups = Vec::new();

        for entry in &config.consumers {
            for queue in &entry.queues {
                if config.queue(queue).is_none() {
                    return Err(ConfigurationError::invalid(format!(
                        "consumer '{}' references undefined queue '{}'",
                        entry.name, queue
                    )));
                }
                covered.insert(queue.clone());
            }

            groups.push(ConsumerProcessGroup::new(
                entry.name.clone(),
                entry.queues.clone(),
                entry.min_processes,
                entry.max_processes,
                entry.batch_size,
                build_autoscale(
                    &entry.autoscale,
                    Arc::clone(&broker),
                    entry.queues.clone(),
                    entry.min_processes,
                    entry.max_processes,
                ),
                Box::new(ConsumerProcessSpawner::new(config_path.clone())),
            ));
        }

        let uncovered: Vec<String> = config
            .queue_names()
            .into_iter()
            .filter(|queue| !covered.contains(queue))
            .collect();
        if !uncovered.is_empty() {
            let defaults = &config.supervisor;
            groups.push(ConsumerProcessGroup::new(
                DEFAULT_GROUP,
                uncovered,
                defaults.default_min_processes,
                defaults.default_max_processes,
                defaults.default_batch_size,
                Box::new(ConstantAutoscale::new(defaults.default_min_processes)),
                Box::new(ConsumerProcessSpawner::new(config_path)),
            ));
        }

        Ok(Self {
            config,
            groups,
            shutdown: ShutdownToken::new(),
        })
    }

    pub fn groups(&self) -> &[ConsumerProcessGroup] {
        &self.groups
    }

    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    /// Run until signalled, then shut the fleet down in two phases: signal
    /// every process in every group first so they all start draining at
    /// once, then await them with the configured grace period.
    pub async fn run(mut self) -> std::io::Result<()> {
        self.shutdown.install_signal_handlers()?;
        info!(groups = self.groups.len(), "🚀 supervisor started");

        while !self.shutdown.is_shutdown() {
            for group in &mut self.groups {
                group.check_on_consumers().await;
            }
            tokio::time::sleep(self.config.supervisor.check_interval()).await;
        }

        info!("🛑 supervisor shutting down");
        for group in &mut self.groups {
            group.signal_stop_all();
        }
        let grace = self.config.supervisor.shutdown_grace();
        for group in self.groups {
            group.await_termination(grace).await;
        }
        info!("supervisor stopped");
        Ok(())
    }
}

fn build_autoscale(
    config: &AutoscaleConfig,
    broker: Arc<dyn Broker>,
    queues: Vec<String>,
    minimum: usize,
    maximum: usize,
) -> Box<dyn AutoscaleAlgorithm> {
    match config.algorithm {
        AutoscaleKind::Constant => Box::new(ConstantAutoscale::new(config.floor)),
        AutoscaleKind::Predictive => Box::new(PredictiveAutoscale::new(
            broker, queues, minimum, maximum, config,
        )),
    }
}
