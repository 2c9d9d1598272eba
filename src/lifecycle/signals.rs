//! OS signal handling.
//!
//! # Responsibilities
//! - Wait for SIGTERM or SIGINT (Ctrl-C elsewhere)
//! - Turn the first one into a graceful shutdown, the second into an exit

use std::sync::Arc;

use crate::lifecycle::shutdown::Shutdown;

/// Resolves with the signal name once SIGINT or SIGTERM arrives.
pub async fn wait_for_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => tokio::select! {
                _ = tokio::signal::ctrl_c() => "SIGINT",
                _ = term.recv() => "SIGTERM",
            },
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
                "SIGINT"
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "Ctrl-C"
    }
}

/// Triggers `shutdown` on the first signal and exits the process on the second.
pub fn spawn_signal_listener(shutdown: Arc<Shutdown>) {
    tokio::spawn(async move {
        let signal = wait_for_signal().await;
        tracing::info!(signal, "Graceful shutdown requested");
        shutdown.trigger();

        let signal = wait_for_signal().await;
        tracing::warn!(signal, "Second signal received, exiting immediately");
        std::process::exit(130);
    });
}
