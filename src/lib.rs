pub mod chat;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod http;
pub mod llm;
pub mod logging;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod state;
pub mod tools;
pub mod workbook;

pub use config::{CliArgs, ServerConfig, TransportKind};
pub use error::{DispatchError, ERROR_METRICS, ErrorCode, NormalizeError, to_rmcp_error};
pub use logging::{LoggingConfig, init_logging, shutdown_telemetry};
pub use server::SheetToolsServer;
pub use shutdown::ShutdownCoordinator;

use anyhow::{Context, Result};
use state::AppState;
use std::{future::IntoFuture, sync::Arc};
use tokio::net::TcpListener;

pub async fn run_server(config: ServerConfig) -> Result<()> {
    let config = Arc::new(config);
    config.ensure_workspace_root()?;

    let state = Arc::new(AppState::new(config.clone())?);

    tracing::info!(
        transport = %config.transport,
        workspace = %config.workspace_root.display(),
        tools = ?state.registry().names(),
        provider = %config.model.provider,
        "starting sheet tools server",
    );

    let shutdown = ShutdownCoordinator::default();
    shutdown.listen_for_signals();

    match config.transport {
        TransportKind::Stdio => {
            SheetToolsServer::from_state(state)
                .run_stdio(shutdown.token())
                .await
        }
        TransportKind::Http => run_http_transport(config, state, shutdown).await,
    }
}

async fn run_http_transport(
    config: Arc<ServerConfig>,
    state: Arc<AppState>,
    shutdown: ShutdownCoordinator,
) -> Result<()> {
    let router = http::router(state);
    let listener = TcpListener::bind(config.http_bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.http_bind_address))?;
    let actual_addr = listener.local_addr()?;
    tracing::info!(transport = "http", bind = %actual_addr, "listening");

    let token = shutdown.token();
    let drain_timeout = shutdown.drain_timeout();
    let server_future = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.signal())
        .into_future();
    tokio::pin!(server_future);

    tokio::select! {
        result = &mut server_future => result.map_err(anyhow::Error::from),
        _ = async {
            token.cancelled().await;
            tokio::time::sleep(drain_timeout).await;
        } => {
            tracing::warn!(
                timeout_secs = drain_timeout.as_secs(),
                "in-flight requests still running after drain timeout; stopping"
            );
            Ok(())
        }
    }
}
