// src/server/initialization.rs

//! Wires the config into a running controller: the distributed lock, the
//! refresh pub/sub, the server store, the instance director, and the
//! billing event-stream handler (spec.md §1, §6 "Environment").

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::context::ServerContext;
use crate::billing::EventStreamHandler;
use crate::config::Config;
use crate::controller::Controller;
use crate::core::events::{NullStatusEventSink, PubSub, StatusEventSink};
use crate::core::lock::DistributedLock;
use crate::core::pubsub::RedisPubSub;
use crate::director::Director;
use crate::instance::{InstanceDirector, InstanceManager};
use crate::store::{InMemoryServerStore, ServerStore};

/// Initializes every controller component before the HTTP listener and
/// background tasks start.
pub async fn setup(config: Config) -> Result<ServerContext> {
    log_startup_info(&config);

    let (shutdown_tx, _) = broadcast::channel(1);

    // The relational store spec.md §1 names as an external collaborator
    // has no concrete implementation in this crate; `InMemoryServerStore`
    // is the reference store the module itself documents as suitable for
    // single-replica dry runs, and is what a fresh checkout boots with.
    let store: Arc<dyn ServerStore> = Arc::new(InMemoryServerStore::new());

    // Likewise, driving a real cloud API is an external collaborator
    // (spec.md §4.E); no region has a manager wired up until a deployment
    // registers one. `POST /v1/server` will fail with `UnknownRegion`
    // for any region until that's done.
    let managers: HashMap<String, Arc<dyn InstanceManager>> = HashMap::new();
    let instances = Arc::new(InstanceDirector::new(managers));

    let pubsub: Arc<dyn PubSub> = Arc::new(RedisPubSub::new(&config.kv_store_url)?);
    let status_sink: Arc<dyn StatusEventSink> = Arc::new(NullStatusEventSink);

    let controller = Arc::new(Controller::new(
        store.clone(),
        instances,
        pubsub.clone(),
        status_sink,
        config.rcon.clone(),
    ));

    let director = if config.enable_director {
        let lock = Arc::new(DistributedLock::new(
            &config.kv_store_url,
            config.lock.key.clone(),
            config.lock.ttl,
        )?);
        Some(Arc::new(Director::new(controller.clone(), store.clone(), lock, pubsub)))
    } else {
        info!("director is disabled by configuration");
        None
    };

    let billing = Arc::new(EventStreamHandler::new(
        &config.kv_store_url,
        config.billing.clone(),
        store,
    )?);

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!("rustpm-controller listening on {}:{}", config.host, config.port);

    Ok(ServerContext {
        config,
        controller,
        director,
        billing,
        listener,
        shutdown_tx,
        shutdown_ctx: CancellationToken::new(),
        background_tasks: JoinSet::new(),
    })
}

fn log_startup_info(config: &Config) {
    info!(
        "starting rustpm-controller (director {})",
        if config.enable_director { "enabled" } else { "disabled" }
    );
}
