//! Process shutdown signals
//!
//! Handlers are installed before the long-running part of a command starts,
//! so a SIGTERM from systemd or a container runtime arrives as a graceful
//! shutdown instead of killing the process.

use std::io;

#[cfg(unix)]
use tokio::signal::unix::{signal, Signal, SignalKind};

/// Installed SIGTERM and SIGINT handlers
#[cfg(unix)]
pub struct ShutdownSignals {
    sigterm: Signal,
    sigint: Signal,
}

#[cfg(unix)]
impl ShutdownSignals {
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
        })
    }

    /// Wait for the first signal; returns its name
    pub async fn recv(mut self) -> &'static str {
        let name = tokio::select! {
            _ = self.sigterm.recv() => "SIGTERM",
            _ = self.sigint.recv() => "SIGINT",
        };
        tracing::info!(signal = name, "Shutdown signal received");
        name
    }
}

/// Ctrl+C only
#[cfg(not(unix))]
pub struct ShutdownSignals;

#[cfg(not(unix))]
impl ShutdownSignals {
    pub fn install() -> io::Result<Self> {
        Ok(Self)
    }

    pub async fn recv(self) -> &'static str {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to wait for Ctrl+C");
        }
        tracing::info!(signal = "Ctrl+C", "Shutdown signal received");
        "Ctrl+C"
    }
}
