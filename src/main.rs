// Copyright 2026 The Streamtap Project
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use streamtap::api;
use streamtap::config;
use streamtap::names::CallNameIndex;
use streamtap::session::SessionRegistry;
use streamtap::store;
use streamtap::stream::PipelineDeps;
use streamtap::upstream::{ReqwestUpstreamClient, UpstreamClient};
use tracing_subscriber::EnvFilter;

use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "streamtap", about = "Chat stream tap and tool-result cache")]
struct Cli {
    /// Path to the streamtap.yaml config file
    #[arg(long, default_value = "streamtap.yaml", env = "STREAMTAP_CONFIG")]
    config: String,

    /// Port to listen on
    #[arg(long, default_value_t = 9810, env = "STREAMTAP_PORT")]
    port: u16,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("streamtap=info")),
        )
        .init();

    let cli = Cli::parse();

    let addr = SocketAddr::from(([127, 0, 0, 1], cli.port));
    tracing::info!(%addr, "streamtap starting");

    let source = config::FileSource {
        path: std::path::PathBuf::from(cli.config),
    };
    let config = match config::load_config(&source) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("failed to load config: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        environment = %config.environment,
        upstream = %config.upstream.stream_url(),
        timeout_secs = config.upstream.timeout.as_secs(),
        workers = config.pipeline.workers,
        store = ?config.store,
        config_hash = %config.config_hash,
        "config loaded"
    );

    let store = match store::open_store(&config.store) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("failed to open store: {e}");
            std::process::exit(1);
        }
    };

    let registry = Arc::new(SessionRegistry::new(&config.sessions));
    registry.start();

    let deps = PipelineDeps::new(
        registry.clone(),
        Arc::new(CallNameIndex::new()),
        store,
        &config,
    );
    let upstream: Arc<dyn UpstreamClient> =
        Arc::new(ReqwestUpstreamClient::from_config(&config.upstream));

    let app = api::build_router(api::AppState::new(deps, upstream, None));

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(%addr, "failed to bind: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(%addr, "streamtap listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("server error: {e}");
    }

    registry.stop().await;
    tracing::info!("streamtap stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
