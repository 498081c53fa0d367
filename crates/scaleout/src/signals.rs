//! Shutdown signal handling.
//!
//! The simulation races its own completion against [`wait_for_shutdown`];
//! whichever finishes first ends the run.

use anyhow::{Context, Result};
use std::fmt;
use tokio::signal;

/// Which request stopped the run.
#[allow(dead_code)] // each platform constructs a subset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
    CtrlC,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::CtrlC => "Ctrl+C",
        })
    }
}

/// Resolves with the first shutdown request: SIGINT or SIGTERM on Unix,
/// Ctrl+C elsewhere.
///
/// # Returns
///
/// The signal that arrived, or an error if a handler could not be
/// installed.
pub async fn wait_for_shutdown() -> Result<ShutdownSignal> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("installing SIGTERM handler")?;

        let received = tokio::select! {
            _ = sigint.recv() => ShutdownSignal::Interrupt,
            _ = sigterm.recv() => ShutdownSignal::Terminate,
        };
        Ok(received)
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.context("installing Ctrl+C handler")?;
        Ok(ShutdownSignal::CtrlC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signals_display_their_conventional_names() {
        assert_eq!(ShutdownSignal::Interrupt.to_string(), "SIGINT");
        assert_eq!(ShutdownSignal::Terminate.to_string(), "SIGTERM");
        assert_eq!(ShutdownSignal::CtrlC.to_string(), "Ctrl+C");
    }

    #[tokio::test]
    async fn waits_until_a_signal_arrives() {
        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            wait_for_shutdown(),
        )
        .await;
        assert!(pending.is_err());
    }
}
