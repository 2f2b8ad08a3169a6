//! Binary entrypoint.
//!
//! Exit codes: 0 on clean shutdown, 1 on configuration or startup failure.

use locdedup_server::config::Config;
use locdedup_server::routes::build_router;
use locdedup_server::state::AppState;
use std::net::SocketAddr;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("configuração inválida: {e}");
            return ExitCode::from(1);
        }
    };

    let pipeline = match locdedup_server::build_pipeline(&config).await {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("falha ao inicializar o pipeline: {e}");
            return ExitCode::from(1);
        }
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = build_router(AppState::new(pipeline));

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("falha ao abrir {addr}: {e}");
            return ExitCode::from(1);
        }
    };

    info!("locdedup ouvindo em {addr}");
    if let Err(e) = axum::serve(listener, app).await {
        error!("servidor encerrou com erro: {e}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}
