use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pixelforge_queue::config::QueueConfig;
use pixelforge_queue::engine::SimulatedEngine;
use pixelforge_server::broadcast::run_broadcast_listener;
use pixelforge_server::config::ServerConfig;
use pixelforge_server::request::run_request_listener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pixelforge_server=info,pixelforge_queue=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();
    let queue_config = QueueConfig::from_env();
    let cancel = CancellationToken::new();

    // Simulated engine: stands in for the external diffusion service
    // so the IPC surface can run without a GPU behind it. Step delay is
    // tunable via SIM_STEP_DELAY_MS; artifacts land under OUTPUT_DIR.
    let step_delay_ms: u64 = std::env::var("SIM_STEP_DELAY_MS")
        .unwrap_or_else(|_| "200".into())
        .parse()
        .expect("SIM_STEP_DELAY_MS must be a valid u64");
    let output_dir = std::env::var("OUTPUT_DIR").unwrap_or_else(|_| "./outputs".into());
    let engine = Arc::new(SimulatedEngine::new(
        Duration::from_millis(step_delay_ms),
        output_dir,
    ));

    let queue = pixelforge_queue::manager::spawn(queue_config, engine, cancel.child_token());

    let request_listener = TcpListener::bind(&config.request_bind)
        .await
        .with_context(|| format!("binding request listener on {}", config.request_bind))?;
    let subscribe_listener = TcpListener::bind(&config.subscribe_bind)
        .await
        .with_context(|| format!("binding broadcast listener on {}", config.subscribe_bind))?;

    tracing::info!(
        request_bind = %config.request_bind,
        subscribe_bind = %config.subscribe_bind,
        "pixelforge worker started",
    );

    let request_task = tokio::spawn(run_request_listener(
        request_listener,
        queue.clone(),
        config.clone(),
        cancel.child_token(),
    ));
    let broadcast_task = tokio::spawn(run_broadcast_listener(
        subscribe_listener,
        queue,
        config,
        cancel.child_token(),
    ));

    tokio::signal::ctrl_c()
        .await
        .context("listening for shutdown signal")?;
    tracing::info!("Shutdown signal received");
    cancel.cancel();

    let _ = tokio::time::timeout(Duration::from_secs(5), request_task).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), broadcast_task).await;

    tracing::info!("pixelforge worker stopped");
    Ok(())
}
