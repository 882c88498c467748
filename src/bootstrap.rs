//! Composition root shared by the binary's subcommands.
//!
//! Wires configuration into routers, failure strategies, and dispatchers so
//! every subcommand (and every integration test) assembles the system the
//! same way.

use std::sync::Arc;

use crate::broker::Broker;
use crate::call::WorkerRegistry;
use crate::config::ConveyorConfig;
use crate::dispatch::{JobDispatcher, SyncDispatcher};
use crate::failure::{
    FailureStrategyCollection, MoveToFailureQueue, RetryImmediately, RetryWithBackoff,
};
use crate::routing::{CallFactory, JobRouter, QueueRoute, WorkerDirections};

/// One route per configured queue, built from its worker section.
pub fn build_router(config: Arc<ConveyorConfig>, registry: Arc<WorkerRegistry>) -> JobRouter {
    let factory = CallFactory::new(Arc::clone(&config), registry);
    let mut router = JobRouter::new(factory);
    for name in config.queue_names() {
        if let Some(queue) = config.queue(&name) {
            let directions = WorkerDirections::new(queue.worker.kind, queue.worker.address.clone())
                .with_parameters(queue.worker.parameters.clone());
            router.register_route(Box::new(QueueRoute::new(name, directions)));
        }
    }
    router
}

/// The standard strategy set. `retry` is registered first so it doubles as
/// the final fallback of the selection chain.
pub fn build_failure_strategies(
    broker: Arc<dyn Broker>,
    config: Arc<ConveyorConfig>,
) -> FailureStrategyCollection {
    let mut strategies = FailureStrategyCollection::new();
    strategies.register(
        "retry",
        Arc::new(RetryWithBackoff::new(
            Arc::clone(&broker),
            Arc::clone(&config),
        )),
    );
    strategies.register(
        "retry-immediately",
        Arc::new(RetryImmediately::new(Arc::clone(&broker))),
    );
    strategies.register(
        "failure-queue",
        Arc::new(MoveToFailureQueue::new(broker, config)),
    );
    strategies
}

pub fn build_dispatcher(
    broker: Arc<dyn Broker>,
    config: Arc<ConveyorConfig>,
    registry: Arc<WorkerRegistry>,
) -> JobDispatcher {
    let router = build_router(Arc::clone(&config), registry);
    let strategies = build_failure_strategies(Arc::clone(&broker), Arc::clone(&config));
    JobDispatcher::new(router, broker, Arc::new(strategies), config)
}

pub fn build_sync_dispatcher(
    config: Arc<ConveyorConfig>,
    registry: Arc<WorkerRegistry>,
) -> SyncDispatcher {
    SyncDispatcher::new(build_router(config, registry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MockBroker;

    #[test]
    fn strategy_set_covers_the_standard_names() {
        let broker = Arc::new(MockBroker::new());
        let config: Arc<ConveyorConfig> =
            Arc::new(serde_yaml::from_str("broker:\n  url: redis://localhost:7711\n").unwrap());
        let strategies = build_failure_strategies(broker, config);

        for name in ["retry", "retry-immediately", "failure-queue"] {
            assert!(strategies.select("q", Some(name)).is_ok());
        }
        // The unnamed default resolves too.
        assert!(strategies.select("q", None).is_ok());
    }
}
