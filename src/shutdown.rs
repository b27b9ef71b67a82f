//! Signal-driven graceful shutdown.
//!
//! A [`ShutdownCoordinator`] owns a [`CancellationToken`] that is cancelled
//! on SIGINT or SIGTERM. The HTTP server drains in-flight requests once it
//! fires; the stdio transport is cancelled outright.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Upper bound for draining in-flight HTTP requests after a signal.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    drain_timeout: Duration,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_DRAIN_TIMEOUT)
    }
}

impl ShutdownCoordinator {
    pub fn new(drain_timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            drain_timeout,
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            info!("shutdown requested");
            self.token.cancel();
        }
    }

    /// Cancels the token when SIGINT or SIGTERM arrives.
    pub fn listen_for_signals(&self) {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = wait_for_signal() => token.cancel(),
                _ = token.cancelled() => {}
            }
        });
    }

    /// Resolves once shutdown has been requested; suitable for
    /// `axum::serve(..).with_graceful_shutdown`.
    pub fn signal(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        self.token.clone().cancelled_owned()
    }
}

/// Waits for SIGINT or SIGTERM. If a handler cannot be installed the error
/// is logged and that signal is ignored.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT (Ctrl+C), initiating graceful shutdown"),
        _ = terminate => info!("received SIGTERM, initiating graceful shutdown"),
    }
}
