//! Consumer subprocess lifecycle.
//!
//! The supervisor never runs consumers in-process: each one is a child
//! process re-executing the current binary's `consume` subcommand, so a
//! crashing worker batch can never take the supervisor down with it.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::process::{Child, Command};
use tracing::{info, warn};

/// Why a process exists: part of the permanent floor, or a burst process
/// that exits on its own once its queues run dry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessMode {
    Permanent,
    Burst,
}

/// One spawned consumer child.
pub struct ConsumerProcess {
    child: Child,
    mode: ProcessMode,
    spawned_at: Instant,
}

impl ConsumerProcess {
    pub fn new(child: Child, mode: ProcessMode) -> Self {
        Self {
            child,
            mode,
            spawned_at: Instant::now(),
        }
    }

    pub fn mode(&self) -> ProcessMode {
        self.mode
    }

    pub fn age(&self) -> Duration {
        self.spawned_at.elapsed()
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Poll-reap: true while the child has not exited.
    pub fn is_alive(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                info!(mode = ?self.mode, %status, "consumer process exited");
                false
            }
            Err(err) => {
                warn!(error = %err, "could not poll consumer process, assuming dead");
                false
            }
        }
    }

    /// Ask the child to shut down gracefully (SIGTERM). The child's own
    /// signal handler trips its shutdown token and it drains its batch.
    #[cfg(unix)]
    pub fn signal_stop(&mut self) {
        if let Some(pid) = self.child.id() {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }
    }

    #[cfg(not(unix))]
    pub fn signal_stop(&mut self) {
        if let Err(err) = self.child.start_kill() {
            warn!(error = %err, "could not stop consumer process");
        }
    }

    /// Wait for the child to exit, hard-killing it after `grace`.
    pub async fn wait_with_grace(mut self, grace: Duration) {
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => info!(mode = ?self.mode, %status, "consumer process terminated"),
            Ok(Err(err)) => warn!(error = %err, "error awaiting consumer process"),
            Err(_) => {
                warn!(
                    pid = self.child.id(),
                    grace_secs = grace.as_secs(),
                    "consumer did not stop within grace period, killing"
                );
                if let Err(err) = self.child.start_kill() {
                    warn!(error = %err, "kill failed");
                }
                let _ = self.child.wait().await;
            }
        }
    }
}

/// Spawns consumer processes for a group. A trait so group logic is
/// testable without forking real consumers.
pub trait ProcessSpawner: Send {
    fn spawn_consumer(
        &self,
        queues: &[String],
        batch_size: usize,
        mode: ProcessMode,
    ) -> std::io::Result<ConsumerProcess>;
}

/// Production spawner: re-executes the current binary's `consume`
/// subcommand.
pub struct ConsumerProcessSpawner {
    config_path: Option<PathBuf>,
}

impl ConsumerProcessSpawner {
    pub fn new(config_path: Option<PathBuf>) -> Self {
        Self { config_path }
    }
}

impl ProcessSpawner for ConsumerProcessSpawner {
    fn spawn_consumer(
        &self,
        queues: &[String],
        batch_size: usize,
        mode: ProcessMode,
    ) -> std::io::Result<ConsumerProcess> {
        let executable = std::env::current_exe()?;
        let mut command = Command::new(executable);
        command.arg("consume");
        if let Some(path) = &self.config_path {
            command.arg("--config").arg(path);
        }
        for queue in queues {
            command.arg("--queue").arg(queue);
        }
        command.arg("--batch-size").arg(batch_size.to_string());
        if mode == ProcessMode::Burst {
            command.arg("--burst");
        }
        // Children are signalled individually during shutdown; if the
        // supervisor itself dies they must not linger.
        command.kill_on_drop(true);

        let child = command.spawn()?;
        info!(pid = child.id(), ?mode, ?queues, batch_size, "spawned consumer process");
        Ok(ConsumerProcess::new(child, mode))
    }
}
