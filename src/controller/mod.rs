// src/controller/mod.rs

//! Component G: orchestrates `CreateServer` / `StartServer` /
//! `MakeServerLive` / `StopServer` / `WipeServer`, composing the
//! distributed lock's caller (the director), the RCON client (C), the
//! instance director (E), and the server state store (F) (spec.md §4.G).

mod time_remaining;
mod user_data;

use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use uuid::Uuid;

use crate::config::RconTimeoutsConfig;
use crate::core::events::{PubSub, REFRESH_SUBJECT, ServerStatusEvent, StatusEventSink};
pub use crate::core::events::ServerStatus;
use crate::core::metrics;
use crate::core::model::{
    DormantServer, LiveServer, Moderator, Owner, Server, StateKind, WipeKind, Wipe, WorldParams,
};
use crate::core::ControllerError;
use crate::instance::InstanceDirector;
use crate::rcon::{RconClient, until_ready};
use crate::store::{ServerChanges, ServerStore};

/// Everything needed to create a new server (spec.md §4.G `CreateServer`).
pub struct CreateServerInput {
    pub name: String,
    pub region: String,
    pub instance_kind: String,
    pub world: WorldParams,
    pub rcon_password: String,
    pub description: String,
    pub banner_url: Option<String>,
    pub background_tag: Option<String>,
    pub options: Vec<(String, String)>,
    pub owner_steam_ids: Vec<String>,
    pub moderator_steam_ids: Vec<String>,
    pub tags: Vec<String>,
}

/// A unit of work `live_server_rcon_for_each` runs against every live
/// server's freshly opened RCON client (spec.md §4.G
/// `LiveServerRconForEach`).
pub type LiveServerTask =
    Arc<dyn for<'a> Fn(&'a LiveServer, &'a RconClient) -> BoxFuture<'a, Result<(), ControllerError>> + Send + Sync>;

/// The JSON payload `global.serverinfo` returns (spec.md §4.C, §4.G
/// `CaptureServerInfo`).
#[derive(Debug, Deserialize)]
struct ServerInfoPayload {
    #[serde(rename = "Players")]
    players: u32,
    #[serde(rename = "Queued")]
    queued: u32,
}

pub struct Controller {
    store: Arc<dyn ServerStore>,
    instances: Arc<InstanceDirector>,
    pubsub: Arc<dyn PubSub>,
    status_sink: Arc<dyn StatusEventSink>,
    rcon_timeouts: RconTimeoutsConfig,
}

impl Controller {
    pub fn new(
        store: Arc<dyn ServerStore>,
        instances: Arc<InstanceDirector>,
        pubsub: Arc<dyn PubSub>,
        status_sink: Arc<dyn StatusEventSink>,
        rcon_timeouts: RconTimeoutsConfig,
    ) -> Self {
        Self {
            store,
            instances,
            pubsub,
            status_sink,
            rcon_timeouts,
        }
    }

    async fn notify_director(&self) {
        if let Err(e) = self.pubsub.publish(REFRESH_SUBJECT).await {
            warn!("failed to publish director refresh: {e}");
        }
    }

    /// Forwarded to the store; lets callers (the HTTP layer) inspect a
    /// server without reaching around the controller (spec.md §6 `GET
    /// /v1/server/{id}`).
    pub async fn get_server(&self, id: Uuid) -> Result<Server, ControllerError> {
        self.store.get_server(id).await
    }

    pub async fn get_dormant_server(&self, id: Uuid) -> Result<DormantServer, ControllerError> {
        self.store.get_dormant_server(id).await
    }

    pub async fn get_live_server(&self, id: Uuid) -> Result<LiveServer, ControllerError> {
        self.store.get_live_server(id).await
    }

    pub async fn get_archived_server(&self, id: Uuid) -> Result<crate::core::model::ArchivedServer, ControllerError> {
        self.store.get_archived_server(id).await
    }

    /// Creates the cloud instance, persists a new dormant server, and
    /// notifies the director (spec.md §4.G `CreateServer`).
    pub async fn create_server(&self, input: CreateServerInput) -> Result<DormantServer, ControllerError> {
        let manager = self.instances.manager(&input.region)?;
        let created = manager.create_instance(&input.instance_kind).await?;

        let id = Uuid::new_v4();
        let server = Server {
            id,
            name: input.name,
            region: input.region,
            instance_kind: input.instance_kind,
            instance_id: Some(created.instance_id),
            allocation_id: Some(created.allocation_id),
            public_ip: Some(created.public_ip),
            world: input.world,
            rcon_password: input.rcon_password,
            description: input.description,
            banner_url: input.banner_url,
            background_tag: input.background_tag,
            owners: input
                .owner_steam_ids
                .into_iter()
                .map(|steam_id| Owner { steam_id, server_id: id })
                .collect(),
            moderators: input
                .moderator_steam_ids
                .into_iter()
                .map(|steam_id| Moderator { steam_id, server_id: id })
                .collect(),
            vips: vec![],
            events: vec![],
            wipes: vec![],
            tags: input.tags,
            options: input.options,
            state_id: Uuid::nil(),
            state_kind: StateKind::Dormant,
        };

        let dormant = self.store.create_server(server).await?;
        self.notify_director().await;
        Ok(dormant)
    }

    /// Forwarded to the store; notifies the director (spec.md §4.G
    /// `UpdateServer`).
    pub async fn update_server(
        &self,
        id: Uuid,
        changes: ServerChanges,
    ) -> Result<DormantServer, ControllerError> {
        let dormant = self.store.update_server(id, changes).await?;
        self.notify_director().await;
        Ok(dormant)
    }

    /// Transitions to archived; notifies the director (spec.md §4.G
    /// `ArchiveServer`).
    pub async fn archive_server(&self, id: Uuid) -> Result<(), ControllerError> {
        self.store.make_server_archived(id).await?;
        self.notify_director().await;
        Ok(())
    }

    /// The complex path: renders user-data, starts the instance,
    /// re-associates its address, and waits for RCON readiness before
    /// returning the still-dormant row (spec.md §4.G `StartServer`).
    /// `MakeServerLive` completes the transition.
    pub async fn start_server(&self, ctx: CancellationToken, id: Uuid) -> Result<DormantServer, ControllerError> {
        let dormant = self.store.get_dormant_server(id).await?;

        let pending_wipe = dormant.server.current_wipe().filter(|w| w.is_pending()).cloned();
        let commands = user_data::pending_wipe_commands(pending_wipe.as_ref());
        let script = user_data::render(&dormant, &commands);

        let manager = self.instances.manager(&dormant.server.region)?;
        let instance_id = dormant
            .server
            .instance_id
            .clone()
            .ok_or_else(|| ControllerError::Instance(format!("server {id} has no instance id")))?;
        let allocation_id = dormant
            .server
            .allocation_id
            .clone()
            .ok_or_else(|| ControllerError::Instance(format!("server {id} has no allocation id")))?;

        manager.start_instance(&instance_id, &script).await?;
        let made_available = manager.make_instance_available(&instance_id, &allocation_id).await?;

        // Deferred compensation (spec.md §9): any error from here on
        // releases the elastic address we just bound.
        let outcome = self.await_start_readiness(&ctx, &dormant, pending_wipe.as_ref()).await;
        if let Err(e) = outcome {
            if let Err(compensation_err) = manager.make_instance_unavailable(&made_available.association_id).await {
                warn!(server_id = %id, "compensating make_instance_unavailable failed: {compensation_err}");
            }
            return Err(e);
        }

        self.store.get_dormant_server(id).await
    }

    async fn await_start_readiness(
        &self,
        ctx: &CancellationToken,
        dormant: &DormantServer,
        pending_wipe: Option<&Wipe>,
    ) -> Result<(), ControllerError> {
        let url = dormant
            .server
            .rcon_url()
            .ok_or_else(|| ControllerError::Instance("server has no public ip".into()))?;
        let client = until_ready(
            ctx.clone(),
            &url,
            self.rcon_timeouts.start_deadline,
            self.rcon_timeouts.ready_retry_interval,
        )
        .await?;
        client.close();

        if let Some(wipe) = pending_wipe {
            self.store.apply_wipe(wipe.id).await?;
            metrics::WIPES_APPLIED_TOTAL.inc();
        }
        Ok(())
    }

    /// Re-associates the address, re-waits for readiness, then
    /// transitions the state row to live (spec.md §4.G `MakeServerLive`).
    pub async fn make_server_live(&self, ctx: CancellationToken, id: Uuid) -> Result<LiveServer, ControllerError> {
        let dormant = self.store.get_dormant_server(id).await?;
        let manager = self.instances.manager(&dormant.server.region)?;
        let instance_id = dormant
            .server
            .instance_id
            .clone()
            .ok_or_else(|| ControllerError::Instance(format!("server {id} has no instance id")))?;
        let allocation_id = dormant
            .server
            .allocation_id
            .clone()
            .ok_or_else(|| ControllerError::Instance(format!("server {id} has no allocation id")))?;

        let made_available = manager.make_instance_available(&instance_id, &allocation_id).await?;

        let url = dormant
            .server
            .rcon_url()
            .ok_or_else(|| ControllerError::Instance("server has no public ip".into()))?;
        until_ready(
            ctx,
            &url,
            self.rcon_timeouts.make_live_deadline,
            self.rcon_timeouts.ready_retry_interval,
        )
        .await?
        .close();

        let live = self.store.make_server_live(id, made_available.association_id).await?;
        let _ = self
            .status_sink
            .publish(ServerStatusEvent::ServerStatusChange {
                server_id: id,
                status: ServerStatus::Live {
                    active_players: 0,
                    queued_players: 0,
                },
            })
            .await;
        self.notify_director().await;
        Ok(live)
    }

    /// Quits RCON with a five-minute deadline, releases the instance,
    /// and transitions to dormant (spec.md §4.G `StopServer`).
    pub async fn stop_server(&self, id: Uuid) -> Result<DormantServer, ControllerError> {
        let live = self.store.get_live_server(id).await?;
        let dormant = self.store.make_server_dormant(id).await?;

        if let Some(url) = live.server.rcon_url() {
            match RconClient::connect(&url).await {
                Ok(client) => {
                    if tokio::time::timeout(self.rcon_timeouts.stop_deadline, client.quit())
                        .await
                        .is_err()
                    {
                        warn!(server_id = %id, "rcon quit did not complete within the stop deadline");
                    }
                    client.close();
                }
                Err(e) => warn!(server_id = %id, "could not open rcon client to send quit: {e}"),
            }
        }

        let manager = self.instances.manager(&live.server.region)?;
        if let Err(e) = manager.make_instance_unavailable(&live.association_id).await {
            warn!(server_id = %id, "make_instance_unavailable failed during stop: {e}");
        }
        if let Some(instance_id) = &live.server.instance_id {
            if let Err(e) = manager.stop_instance(instance_id).await {
                warn!(server_id = %id, "stop_instance failed during stop: {e}");
            }
        }

        let _ = self
            .status_sink
            .publish(ServerStatusEvent::ServerStatusChange {
                server_id: id,
                status: ServerStatus::Offline,
            })
            .await;
        self.notify_director().await;
        Ok(dormant)
    }

    /// If dormant, queues the wipe for the next start. If live, stops,
    /// queues, restarts (which applies it), and makes live again
    /// (spec.md §4.G `WipeServer`).
    pub async fn wipe_server(
        &self,
        ctx: CancellationToken,
        id: Uuid,
        kind: WipeKind,
        seed: u32,
        salt: u32,
    ) -> Result<(), ControllerError> {
        let server = self.store.get_server(id).await?;
        let wipe = Wipe {
            id: Uuid::new_v4(),
            server_id: id,
            kind,
            seed,
            salt,
            created_at: Utc::now(),
            applied_at: None,
        };

        match server.state_kind {
            StateKind::Dormant => {
                self.store.create_wipe(id, wipe).await?;
                Ok(())
            }
            StateKind::Live => {
                self.stop_server(id).await?;
                self.store.create_wipe(id, wipe).await?;
                self.start_server(ctx.clone(), id).await?;
                self.make_server_live(ctx, id).await?;
                Ok(())
            }
            StateKind::Archived => Err(ControllerError::ServerNotDormant(id)),
        }
    }

    /// Persists; if live, pushes the changes over RCON, ignoring
    /// idempotent-reply errors (spec.md §4.G `AddServerModerators`).
    pub async fn add_server_moderators(&self, id: Uuid, steam_ids: Vec<String>) -> Result<(), ControllerError> {
        self.store.add_moderators(id, &steam_ids).await?;
        if let Some(client) = self.open_live_rcon(id, "add_moderator").await {
            for steam_id in &steam_ids {
                if let Err(e) = client.add_moderator(steam_id).await {
                    if !e.is_idempotent_reply() {
                        warn!(server_id = %id, steam_id, "add_moderator over rcon failed: {e}");
                    }
                }
            }
            client.close();
        }
        Ok(())
    }

    pub async fn add_server_owners(&self, id: Uuid, steam_ids: Vec<String>) -> Result<(), ControllerError> {
        self.store.add_owners(id, &steam_ids).await?;
        if let Some(client) = self.open_live_rcon(id, "add_owner").await {
            for steam_id in &steam_ids {
                if let Err(e) = client.add_owner(steam_id).await {
                    if !e.is_idempotent_reply() {
                        warn!(server_id = %id, steam_id, "add_owner over rcon failed: {e}");
                    }
                }
            }
            client.close();
        }
        Ok(())
    }

    /// Loads the server, persists the delete; if live, pushes removals
    /// over RCON (spec.md §4.G `RemoveServerModerators`).
    pub async fn remove_server_moderators(&self, id: Uuid, steam_ids: Vec<String>) -> Result<(), ControllerError> {
        self.store.remove_moderators(id, &steam_ids).await?;
        if let Some(client) = self.open_live_rcon(id, "remove_moderator").await {
            for steam_id in &steam_ids {
                if let Err(e) = client.remove_moderator(steam_id).await {
                    if !e.is_idempotent_reply() {
                        warn!(server_id = %id, steam_id, "remove_moderator over rcon failed: {e}");
                    }
                }
            }
            client.close();
        }
        Ok(())
    }

    pub async fn remove_server_owners(&self, id: Uuid, steam_ids: Vec<String>) -> Result<(), ControllerError> {
        self.store.remove_owners(id, &steam_ids).await?;
        if let Some(client) = self.open_live_rcon(id, "remove_owner").await {
            for steam_id in &steam_ids {
                if let Err(e) = client.remove_owner(steam_id).await {
                    if !e.is_idempotent_reply() {
                        warn!(server_id = %id, steam_id, "remove_owner over rcon failed: {e}");
                    }
                }
            }
            client.close();
        }
        Ok(())
    }

    /// Persists a server's tags (spec.md §6 `POST /v1/server/tags`).
    /// Tags have no RCON-visible effect, so there is nothing to push.
    pub async fn add_server_tags(&self, id: Uuid, tags: Vec<String>) -> Result<(), ControllerError> {
        self.store.add_tags(id, &tags).await
    }

    pub async fn remove_server_tags(&self, id: Uuid, tags: Vec<String>) -> Result<(), ControllerError> {
        self.store.remove_tags(id, &tags).await
    }

    /// Persists new events and notifies the director so it picks up the
    /// schedule change on its next refresh (spec.md §6 `POST
    /// /v1/server/events`, §4.H).
    pub async fn add_server_events(
        &self,
        id: Uuid,
        events: Vec<crate::core::model::Event>,
    ) -> Result<(), ControllerError> {
        self.store.add_events(id, events).await?;
        self.notify_director().await;
        Ok(())
    }

    pub async fn remove_server_events(&self, id: Uuid, event_ids: Vec<Uuid>) -> Result<(), ControllerError> {
        self.store.remove_events(id, &event_ids).await?;
        self.notify_director().await;
        Ok(())
    }

    /// Opens an RCON client to `id` if (and only if) it is currently
    /// live; logs and returns `None` on any failure along the way
    /// (spec.md §4.G: persist-then-push is best-effort on the push side).
    async fn open_live_rcon(&self, id: Uuid, method: &str) -> Option<RconClient> {
        let live = self.store.get_live_server(id).await.ok()?;
        let url = live.server.rcon_url()?;
        match RconClient::connect(&url).await {
            Ok(client) => Some(client),
            Err(e) => {
                warn!(server_id = %id, "could not open rcon client for {method}: {e}");
                None
            }
        }
    }

    /// Lists every live server and opens an RCON client for each,
    /// logging but not aborting on per-server errors (spec.md §4.G
    /// `LiveServerRconForEach`).
    pub async fn live_server_rcon_for_each(&self, task: LiveServerTask) {
        let live_servers = match self.store.list_live_servers().await {
            Ok(v) => v,
            Err(e) => {
                error!("failed to list live servers: {e}");
                return;
            }
        };
        for live in live_servers {
            let Some(url) = live.server.rcon_url() else {
                warn!(server_id = %live.server.id, "live server has no public ip");
                continue;
            };
            match RconClient::connect(&url).await {
                Ok(client) => {
                    if let Err(e) = task(&live, &client).await {
                        warn!(server_id = %live.server.id, "live server rcon task failed: {e}");
                    }
                    client.close();
                }
                Err(e) => warn!(server_id = %live.server.id, "could not open rcon client: {e}"),
            }
        }
    }

    /// Bound to `self`'s store and status sink, suitable for
    /// `live_server_rcon_for_each` (spec.md §4.H's fixed per-minute tick).
    pub fn capture_server_info_task(&self) -> LiveServerTask {
        let store = self.store.clone();
        let status_sink = self.status_sink.clone();
        Arc::new(move |live: &LiveServer, rcon: &RconClient| {
            let store = store.clone();
            let status_sink = status_sink.clone();
            let server_id = live.server.id;
            Box::pin(async move {
                let payload = rcon.server_info().await?;
                let info: ServerInfoPayload = serde_json::from_str(&payload)?;
                store
                    .record_player_counts(server_id, info.players, info.queued)
                    .await?;
                let _ = status_sink
                    .publish(ServerStatusEvent::ServerStatusChange {
                        server_id,
                        status: ServerStatus::Live {
                            active_players: info.players,
                            queued_players: info.queued,
                        },
                    })
                    .await;
                Ok(())
            })
        })
    }

    /// `say`s the formatted time remaining until the server's next stop
    /// event (spec.md §4.G `SayServerTimeRemaining`).
    pub async fn say_server_time_remaining(
        &self,
        live: &LiveServer,
        rcon: &RconClient,
    ) -> Result<(), ControllerError> {
        let now = Utc::now();
        let Some(next_stop) = time_remaining::next_stop_at(&live.server.events, now) else {
            return Ok(());
        };
        let remaining = next_stop - now;
        let message = time_remaining::message(&live.server.name, remaining);
        rcon.say(&message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::NullStatusEventSink;
    use crate::core::pubsub::MemoryPubSub;
    use crate::instance::{CreatedInstance, InstanceManager, MadeAvailable};
    use crate::store::InMemoryServerStore;
    use async_trait::async_trait;
    use std::collections::HashMap;

    #[derive(Debug)]
    struct StubManager;

    #[async_trait]
    impl InstanceManager for StubManager {
        async fn create_instance(&self, _kind: &str) -> Result<CreatedInstance, ControllerError> {
            Ok(CreatedInstance {
                instance_id: "i-1".into(),
                allocation_id: "eipalloc-1".into(),
                public_ip: "203.0.113.10".into(),
            })
        }
        async fn start_instance(&self, _id: &str, _user_data: &str) -> Result<(), ControllerError> {
            Ok(())
        }
        async fn stop_instance(&self, _id: &str) -> Result<(), ControllerError> {
            Ok(())
        }
        async fn make_instance_available(
            &self,
            _id: &str,
            _allocation_id: &str,
        ) -> Result<MadeAvailable, ControllerError> {
            Ok(MadeAvailable {
                association_id: "eipassoc-1".into(),
            })
        }
        async fn make_instance_unavailable(&self, _association_id: &str) -> Result<(), ControllerError> {
            Ok(())
        }
    }

    fn controller() -> Controller {
        let store: Arc<dyn ServerStore> = Arc::new(InMemoryServerStore::new());
        let mut managers: HashMap<String, Arc<dyn InstanceManager>> = HashMap::new();
        managers.insert("us-west".into(), Arc::new(StubManager));
        let instances = Arc::new(InstanceDirector::new(managers));
        let pubsub: Arc<dyn PubSub> = Arc::new(MemoryPubSub::new());
        let status_sink: Arc<dyn StatusEventSink> = Arc::new(NullStatusEventSink);
        Controller::new(store, instances, pubsub, status_sink, RconTimeoutsConfig::default())
    }

    fn input() -> CreateServerInput {
        CreateServerInput {
            name: "Rustpm US-West".into(),
            region: "us-west".into(),
            instance_kind: "m5.large".into(),
            world: WorldParams {
                max_players: 200,
                map_size: 4000,
                tick_rate: 30,
            },
            rcon_password: "hunter2".into(),
            description: String::new(),
            banner_url: None,
            background_tag: None,
            options: vec![],
            owner_steam_ids: vec![],
            moderator_steam_ids: vec![],
            tags: vec![],
        }
    }

    #[tokio::test]
    async fn create_server_persists_a_dormant_row_with_cloud_identifiers() {
        let controller = controller();
        let dormant = controller.create_server(input()).await.unwrap();
        assert_eq!(dormant.server.instance_id.as_deref(), Some("i-1"));
        assert_eq!(dormant.server.state_kind, StateKind::Dormant);
    }

    #[tokio::test]
    async fn wipe_server_on_unknown_id_fails_server_dne() {
        let controller = controller();
        let err = controller
            .wipe_server(CancellationToken::new(), Uuid::new_v4(), WipeKind::Map, 1, 2)
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::ServerDne(_)));
    }

    #[tokio::test]
    async fn wipe_server_on_dormant_server_queues_without_starting() {
        let controller = controller();
        let dormant = controller.create_server(input()).await.unwrap();
        controller
            .wipe_server(CancellationToken::new(), dormant.server.id, WipeKind::Map, 1, 2)
            .await
            .unwrap();
        let server = controller.store.get_server(dormant.server.id).await.unwrap();
        assert_eq!(server.wipes.len(), 1);
        assert_eq!(server.state_kind, StateKind::Dormant);
    }

    #[tokio::test]
    async fn archive_server_transitions_and_notifies() {
        let controller = controller();
        let dormant = controller.create_server(input()).await.unwrap();
        controller.archive_server(dormant.server.id).await.unwrap();
        let err = controller.store.get_dormant_server(dormant.server.id).await.unwrap_err();
        assert!(matches!(err, ControllerError::ServerNotDormant(_)));
    }
}
