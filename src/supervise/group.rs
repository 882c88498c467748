//! A group of consumer processes serving one queue set.

use std::time::Duration;

use tracing::{info, warn};

use super::autoscale::AutoscaleAlgorithm;
use super::spawner::{ConsumerProcess, ProcessMode, ProcessSpawner};

/// Owns the consumer fleet for one queue set: a permanent floor of
/// `min_processes`, plus burst processes up to `max_processes` when the
/// autoscaler asks for them. Burst processes are never reaped here; they
/// exit on their own after an empty fetch.
pub struct ConsumerProcessGroup {
    name: String,
    queues: Vec<String>,
    min_processes: usize,
    max_processes: usize,
    batch_size: usize,
    autoscale: Box<dyn AutoscaleAlgorithm>,
    spawner: Box<dyn ProcessSpawner>,
    processes: Vec<ConsumerProcess>,
}

impl ConsumerProcessGroup {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        queues: Vec<String>,
        min_processes: usize,
        max_processes: usize,
        batch_size: usize,
        autoscale: Box<dyn AutoscaleAlgorithm>,
        spawner: Box<dyn ProcessSpawner>,
    ) -> Self {
        Self {
            name: name.into(),
            queues,
            min_processes: min_processes.max(1),
            max_processes: max_processes.max(min_processes.max(1)),
            batch_size,
            autoscale,
            spawner,
            processes: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queues(&self) -> &[String] {
        &self.queues
    }

    pub fn alive(&self) -> usize {
        self.processes.len()
    }

    fn alive_in_mode(&self, mode: ProcessMode) -> usize {
        self.processes.iter().filter(|p| p.mode() == mode).count()
    }

    /// One supervisor tick: reap exited children, restore the permanent
    /// floor, and spawn burst processes up to the autoscaler's target.
    pub async fn check_on_consumers(&mut self) {
        self.processes.retain_mut(|process| process.is_alive());

        let permanent = self.alive_in_mode(ProcessMode::Permanent);
        let floor_shortfall = self
            .min_processes
            .saturating_sub(permanent)
            .min(self.headroom());
        self.spawn(floor_shortfall, ProcessMode::Permanent);

        let target = self.autoscale.recommended_processes(self.alive()).await;
        // Burst demand is the autoscaler's target above the permanent
        // floor, bounded by the group ceiling.
        let desired_burst = target.min(self.max_processes).saturating_sub(self.min_processes);
        let burst_shortfall = desired_burst
            .saturating_sub(self.alive_in_mode(ProcessMode::Burst))
            .min(self.headroom());
        self.spawn(burst_shortfall, ProcessMode::Burst);
    }

    fn headroom(&self) -> usize {
        self.max_processes.saturating_sub(self.alive())
    }

    fn spawn(&mut self, count: usize, mode: ProcessMode) {
        for _ in 0..count {
            match self
                .spawner
                .spawn_consumer(&self.queues, self.batch_size, mode)
            {
                Ok(process) => self.processes.push(process),
                // Likely transient (fork limits); the next tick retries.
                Err(err) => warn!(
                    group = %self.name,
                    ?mode,
                    error = %err,
                    "failed to spawn consumer process"
                ),
            }
        }
    }

    /// Phase one of shutdown: signal every process, do not wait.
    pub fn signal_stop_all(&mut self) {
        info!(group = %self.name, processes = self.alive(), "signalling consumer group to stop");
        for process in &mut self.processes {
            process.signal_stop();
        }
    }

    /// Phase two of shutdown: await every process with a per-process grace
    /// period, hard-killing stragglers.
    pub async fn await_termination(self, grace: Duration) {
        for process in self.processes {
            process.wait_with_grace(grace).await;
        }
        info!(group = %self.name, "consumer group terminated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervise::autoscale::ConstantAutoscale;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio::process::Command;

    /// Spawns real but inert children (`sleep`) and records every request.
    struct RecordingSpawner {
        spawned: Arc<Mutex<Vec<ProcessMode>>>,
    }

    impl RecordingSpawner {
        fn new() -> (Self, Arc<Mutex<Vec<ProcessMode>>>) {
            let spawned = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    spawned: Arc::clone(&spawned),
                },
                spawned,
            )
        }
    }

    impl ProcessSpawner for RecordingSpawner {
        fn spawn_consumer(
            &self,
            _queues: &[String],
            _batch_size: usize,
            mode: ProcessMode,
        ) -> std::io::Result<ConsumerProcess> {
            self.spawned.lock().push(mode);
            let child = Command::new("sleep").arg("30").kill_on_drop(true).spawn()?;
            Ok(ConsumerProcess::new(child, mode))
        }
    }

    /// Fixed-target autoscaler for driving burst scenarios.
    struct FixedTarget(usize);

    #[async_trait]
    impl AutoscaleAlgorithm for FixedTarget {
        async fn recommended_processes(&mut self, _current: usize) -> usize {
            self.0
        }
    }

    fn group(
        min: usize,
        max: usize,
        autoscale: Box<dyn AutoscaleAlgorithm>,
    ) -> (ConsumerProcessGroup, Arc<Mutex<Vec<ProcessMode>>>) {
        let (spawner, spawned) = RecordingSpawner::new();
        (
            ConsumerProcessGroup::new(
                "emails",
                vec!["emails".to_string()],
                min,
                max,
                10,
                autoscale,
                Box::new(spawner),
            ),
            spawned,
        )
    }

    #[tokio::test]
    async fn maintains_the_permanent_floor() {
        let (mut group, spawned) = group(3, 5, Box::new(ConstantAutoscale::new(1)));

        group.check_on_consumers().await;
        assert_eq!(group.alive(), 3);
        assert_eq!(spawned.lock().len(), 3);
        assert!(spawned.lock().iter().all(|m| *m == ProcessMode::Permanent));

        // Steady state: nothing new.
        group.check_on_consumers().await;
        assert_eq!(group.alive(), 3);
        assert_eq!(spawned.lock().len(), 3);

        group.signal_stop_all();
        group.await_termination(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn an_aggressive_target_bursts_only_up_to_the_ceiling() {
        // min 3, max 5, target 20: exactly 2 burst processes.
        let (mut group, spawned) = group(3, 5, Box::new(FixedTarget(20)));

        group.check_on_consumers().await;
        assert_eq!(group.alive(), 5);
        let modes = spawned.lock().clone();
        assert_eq!(
            modes.iter().filter(|m| **m == ProcessMode::Permanent).count(),
            3
        );
        assert_eq!(modes.iter().filter(|m| **m == ProcessMode::Burst).count(), 2);

        // Live burst processes satisfy the target: no more spawns.
        group.check_on_consumers().await;
        assert_eq!(spawned.lock().len(), 5);

        group.signal_stop_all();
        group.await_termination(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn a_target_at_or_below_the_floor_spawns_no_burst() {
        let (mut group, spawned) = group(2, 6, Box::new(FixedTarget(2)));

        group.check_on_consumers().await;
        assert_eq!(group.alive(), 2);
        assert!(spawned.lock().iter().all(|m| *m == ProcessMode::Permanent));

        group.signal_stop_all();
        group.await_termination(Duration::from_secs(1)).await;
    }
}
