// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use logpulse_node::config::Config;
use logpulse_node::errors::NodeError;
use logpulse_node::runtime::NodeRuntime;
use logpulse_node::telemetry;
use std::net::SocketAddr;
use tokio::net::TcpListener;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[tokio::main]
async fn main() {
    telemetry::init_telemetry();

    if let Err(e) = run().await {
        tracing::error!("logpulse-node failed: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), NodeError> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("LOGPULSE_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let cfg = Config::load(&path)?;
    tracing::info!("Initializing logpulse node with config from {}: {:?}", path, cfg);

    let addr = cfg.bind_addr()?;
    let runtime = NodeRuntime::start(cfg)?;
    let app = runtime.router();

    tracing::info!("Listening on {}", addr);
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            runtime.shutdown().await;
            return Err(e.into());
        }
    };
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    runtime.shutdown().await;
    served?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Ctrl-C received");
}
