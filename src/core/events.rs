// src/core/events.rs

//! Server-status-change notifications the controller emits on live
//! transitions (spec.md §4.G `MakeServerLive`/`StopServer`/
//! `CaptureServerInfo`) and the `controller-refresh` pub/sub subject the
//! director rebuilds its schedule on (spec.md §4.H, §6).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The `kind` discriminant carried by this event once it lands on the
/// billing/event stream (spec.md §4.I step 2: `server_status_change` is
/// "emitted but not consumed here").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerStatusEvent {
    ServerStatusChange {
        server_id: Uuid,
        status: ServerStatus,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Live { active_players: u32, queued_players: u32 },
    Offline,
}

/// A sink for outbound status-change notifications. Kept as a trait
/// because the transport (the same Redis-compatible stream the billing
/// events arrive on) is an external collaborator per spec.md §1.
#[async_trait]
pub trait StatusEventSink: Send + Sync {
    async fn publish(&self, event: ServerStatusEvent) -> anyhow::Result<()>;
}

/// A sink that drops every event. Used where a deployment has no
/// analytics consumer wired up.
pub struct NullStatusEventSink;

#[async_trait]
impl StatusEventSink for NullStatusEventSink {
    async fn publish(&self, _event: ServerStatusEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// The pub/sub subject the director subscribes to and the controller
/// publishes on after any mutation that changes the active event set
/// (spec.md §2 "G notifies H via a pub/sub channel", §6).
pub const REFRESH_SUBJECT: &str = "controller-refresh";

/// A minimal publish/subscribe capability, implemented once over the
/// shared Redis-compatible store (`core::pubsub::RedisPubSub`) and once
/// in-memory for tests (`core::pubsub::MemoryPubSub`).
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Publish to `subject`. Payload contents are irrelevant; any arrival
    /// is a signal (spec.md §6).
    async fn publish(&self, subject: &str) -> anyhow::Result<()>;

    /// Subscribe to `subject`, returning a receiver that yields `()` on
    /// every publish.
    async fn subscribe(&self, subject: &str) -> anyhow::Result<tokio::sync::mpsc::Receiver<()>>;
}
