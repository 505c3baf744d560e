// src/server/spawner.rs

//! Spawns all of the controller's long-running background tasks: the
//! shutdown bridge, the metrics server, the director, and the billing
//! event-stream handler.

use anyhow::Result;
use tracing::info;

use super::context::ServerContext;
use super::metrics_server;

/// Spawns every background task into the context's `JoinSet`.
pub async fn spawn_all(ctx: &mut ServerContext) -> Result<()> {
    let shutdown_tx = &ctx.shutdown_tx;
    let background_tasks = &mut ctx.background_tasks;

    // Bridges the broadcast-based shutdown signal every task below is
    // spawned with into the single `CancellationToken` `Director` and
    // `EventStreamHandler` thread through every internal `tokio::select!`.
    let bridge_ctx = ctx.shutdown_ctx.clone();
    let mut bridge_rx = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        let _ = bridge_rx.recv().await;
        bridge_ctx.cancel();
        Ok(())
    });

    if ctx.config.metrics.enabled {
        let metrics_port = ctx.config.metrics.port;
        let shutdown_rx_metrics = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            metrics_server::run_metrics_server(metrics_port, shutdown_rx_metrics).await;
            Ok(())
        });
    } else {
        info!("prometheus metrics server is disabled in the configuration");
    }

    if let Some(director) = ctx.director.clone() {
        let director_ctx = ctx.shutdown_ctx.clone();
        background_tasks.spawn(async move {
            director.run(director_ctx).await;
            Ok(())
        });
    } else {
        info!("director is disabled; this replica will not schedule events");
    }

    let billing = ctx.billing.clone();
    let billing_ctx = ctx.shutdown_ctx.clone();
    background_tasks.spawn(async move {
        billing.run(billing_ctx).await;
        Ok(())
    });

    info!("all background tasks have been spawned");
    Ok(())
}
