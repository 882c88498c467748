//! # Shutdown Token
//!
//! Explicit cancellation token shared between signal handlers, the consumer
//! loop, and the dispatcher. A termination signal never interrupts work that
//! has already started; it only prevents new calls from starting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

/// Shared "must terminate" flag, set from a signal handler task and read
/// from the polling loops. Passed explicitly into every loop that must honor
/// it rather than living in a hidden global.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    flag: Arc<AtomicBool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a graceful shutdown. Idempotent.
    pub fn request_shutdown(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// True once a shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Install SIGINT/SIGTERM handlers that trip this token.
    ///
    /// The handler task exits after the first signal, restoring default
    /// signal disposition: a second signal hard-stops the process instead of
    /// being swallowed mid-drain.
    #[cfg(unix)]
    pub fn install_signal_handlers(&self) -> std::io::Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let token = self.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = interrupt.recv() => info!(signal = "SIGINT", "termination signal received"),
                _ = terminate.recv() => info!(signal = "SIGTERM", "termination signal received"),
            }
            token.request_shutdown();
        });

        Ok(())
    }

    /// No-op fallback for hosts without Unix signal support.
    #[cfg(not(unix))]
    pub fn install_signal_handlers(&self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_clear_and_latches() {
        let token = ShutdownToken::new();
        assert!(!token.is_shutdown());

        token.request_shutdown();
        assert!(token.is_shutdown());

        // Idempotent.
        token.request_shutdown();
        assert!(token.is_shutdown());
    }

    #[test]
    fn clones_share_state() {
        let token = ShutdownToken::new();
        let other = token.clone();

        other.request_shutdown();
        assert!(token.is_shutdown());
    }
}
