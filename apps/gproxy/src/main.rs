use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use gproxy_common::GatewayConfig;
use gproxy_core::{Forwarder, GatewayState};

mod cli;
mod data_dir;
mod dsn;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    std::panic::set_hook(Box::new(|info| {
        tracing::error!(event = "panic", %info);
    }));

    let data_dir = data_dir::resolve_data_dir(&cli.data_dir);
    let dsn = dsn::resolve_dsn("", &data_dir)?;

    let mut config = if cli.config.trim().is_empty() {
        GatewayConfig::default()
    } else {
        GatewayConfig::load(Path::new(&cli.config))?
    };
    config.port = cli.port;

    let storage = gproxy_storage::InteractionStorage::connect(&dsn).await?;
    storage.sync().await?;
    let queue = storage.queue();

    let writer_dsn = dsn.clone();
    let writer_task = tokio::spawn(gproxy_storage::run_writer(queue, writer_dsn));

    let forwarder = Forwarder::new()?;
    let state = Arc::new(GatewayState::new(&config, storage.clone(), forwarder));

    let app = gproxy_router::proxy_router(state);
    let bind: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(event = "listening", addr = %bind);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    storage.drain().await;
    writer_task.abort();
    Ok(())
}

fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        signal.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!(event = "shutdown_signal_received");
}
