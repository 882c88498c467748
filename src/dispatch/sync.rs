//! Synchronous single-job dispatch.
//!
//! Used by the `process` subcommand and by tests: no broker, no batch. The
//! job is routed, called, and awaited; a failure is logged and discarded
//! because there is no queue to retry against.

use std::time::Duration;

use tracing::info;

use crate::failure::{FailureStrategy, LogAndDiscard};
use crate::job::Job;
use crate::routing::JobRouter;

use super::DispatchError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runs one job through its call without a broker.
pub struct SyncDispatcher {
    router: JobRouter,
}

impl SyncDispatcher {
    pub fn new(router: JobRouter) -> Self {
        Self { router }
    }

    /// Dispatch a single job to completion. Returns whether the call
    /// succeeded; a routing failure is an error, a worker failure is not.
    pub async fn dispatch_one(&self, job: Job) -> Result<bool, DispatchError> {
        let queue = job.queue().to_string();
        let mut call = self.router.call_for(job)?;

        call.start().await;
        loop {
            call.check_timeout().await;
            if !call.is_running().await {
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        if call.was_successful().await {
            info!(queue = %queue, "✅ job processed");
            return Ok(true);
        }

        LogAndDiscard.handle(call).await?;
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::WorkerRegistry;
    use crate::config::ConveyorConfig;
    use crate::routing::{CallFactory, QueueRoute, RoutingError, WorkerDirections, WorkerKind};
    use serde_json::json;
    use std::sync::Arc;

    fn sync_dispatcher(routes: Vec<(&str, WorkerDirections)>) -> SyncDispatcher {
        let config: ConveyorConfig =
            serde_yaml::from_str("broker:\n  url: redis://localhost:7711\n").unwrap();
        let factory = CallFactory::new(Arc::new(config), Arc::new(WorkerRegistry::default()));
        let mut router = JobRouter::new(factory);
        for (queue, directions) in routes {
            router.register_route(Box::new(QueueRoute::new(queue, directions)));
        }
        SyncDispatcher::new(router)
    }

    #[tokio::test]
    async fn reports_success() {
        let dispatcher = sync_dispatcher(vec![(
            "q",
            WorkerDirections::new(WorkerKind::Cli, "true"),
        )]);
        assert!(dispatcher.dispatch_one(Job::new("q", json!(1))).await.unwrap());
    }

    #[tokio::test]
    async fn reports_failure_without_erroring() {
        let dispatcher = sync_dispatcher(vec![(
            "q",
            WorkerDirections::new(WorkerKind::Cli, "false"),
        )]);
        assert!(!dispatcher.dispatch_one(Job::new("q", json!(1))).await.unwrap());
    }

    #[tokio::test]
    async fn missing_route_is_an_error() {
        let dispatcher = sync_dispatcher(vec![]);
        let err = dispatcher
            .dispatch_one(Job::new("ghost", json!(1)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Routing(RoutingError::NoRoute { .. })
        ));
    }
}
