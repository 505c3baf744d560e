// src/server/context.rs

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::billing::EventStreamHandler;
use crate::config::Config;
use crate::controller::Controller;
use crate::director::Director;

/// Holds all the initialized state required to run the controller's
/// background tasks and HTTP listener.
pub struct ServerContext {
    pub config: Config,
    pub controller: Arc<Controller>,
    pub director: Option<Arc<Director>>,
    pub billing: Arc<EventStreamHandler>,
    pub listener: TcpListener,
    pub shutdown_tx: broadcast::Sender<()>,
    /// Derived from `shutdown_tx` by a bridging task (spawner::spawn_all);
    /// `Director`/`EventStreamHandler` take a cancellation token rather
    /// than a broadcast receiver since they fan a single shutdown signal
    /// out to many internal `tokio::select!` points.
    pub shutdown_ctx: CancellationToken,
    pub background_tasks: JoinSet<Result<(), anyhow::Error>>,
}
