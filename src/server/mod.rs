// src/server/mod.rs

use anyhow::Result;
use tracing::info;

use crate::config::Config;

mod context;
mod http;
mod initialization;
mod metrics_server;
mod spawner;

/// Orchestrates the controller's whole lifetime: wire up state, spawn
/// the background tasks, then serve the HTTP API until a shutdown
/// signal arrives.
pub async fn run(config: Config) -> Result<()> {
    let mut ctx = initialization::setup(config).await?;
    spawner::spawn_all(&mut ctx).await?;

    let app = http::router(ctx.controller.clone(), ctx.shutdown_ctx.clone());
    let listener = ctx.listener;
    let shutdown_tx = ctx.shutdown_tx.clone();

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(());
        })
        .await?;

    ctx.shutdown_ctx.cancel();
    while ctx.background_tasks.join_next().await.is_some() {}

    Ok(())
}
