// src/store/mod.rs

//! Component F: transactional operations over the Server aggregate and
//! its relations (spec.md §4.F). `ServerStore` is the trait the
//! controller composes against; `InMemoryServerStore` is a reference
//! implementation used by tests and single-replica dry runs. A
//! production implementation backs this with the relational store
//! spec.md §1 names as an external collaborator.

mod memory;

pub use memory::InMemoryServerStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::core::ControllerError;
use crate::core::model::{ArchivedServer, DormantServer, Event, LiveServer, Server, Vip, Wipe};

/// The subset of a dormant server's scalar fields `UpdateServer` may
/// change (spec.md §4.F "a dormant server's scalar fields are updated").
#[derive(Debug, Clone, Default)]
pub struct ServerChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub banner_url: Option<String>,
    pub background_tag: Option<String>,
    pub options: Option<Vec<(String, String)>>,
}

#[async_trait]
pub trait ServerStore: Send + Sync {
    /// Persists a freshly created server in the dormant state
    /// (spec.md §4.F `Create`, §4.G `CreateServer`).
    async fn create_server(&self, server: Server) -> Result<DormantServer, ControllerError>;

    /// Fails with `SERVER_DNE` if absent (spec.md §4.F `GetServer`).
    async fn get_server(&self, id: Uuid) -> Result<Server, ControllerError>;

    /// Fails with `SERVER_DNE` / `SERVER_NOT_DORMANT` (spec.md §4.F).
    async fn get_dormant_server(&self, id: Uuid) -> Result<DormantServer, ControllerError>;

    /// Fails with `SERVER_DNE` / `SERVER_NOT_LIVE` (spec.md §4.F).
    async fn get_live_server(&self, id: Uuid) -> Result<LiveServer, ControllerError>;

    /// Fails with `SERVER_DNE` / `SERVER_NOT_ARCHIVED` (spec.md §4.F).
    async fn get_archived_server(&self, id: Uuid) -> Result<ArchivedServer, ControllerError>;

    /// Updates scalar fields of a dormant server, returning the reloaded
    /// row (spec.md §4.F `UpdateServer`).
    async fn update_server(
        &self,
        id: Uuid,
        changes: ServerChanges,
    ) -> Result<DormantServer, ControllerError>;

    /// Deletes the current state row and creates a live one in the same
    /// transaction, carrying the embedded `Server` over (spec.md §4.F
    /// `MakeServerLive`).
    async fn make_server_live(
        &self,
        id: Uuid,
        association_id: String,
    ) -> Result<LiveServer, ControllerError>;

    /// Deletes the current state row and creates a dormant one
    /// (spec.md §4.F `MakeServerDormant`).
    async fn make_server_dormant(&self, id: Uuid) -> Result<DormantServer, ControllerError>;

    /// Deletes the current state row and creates an archived one; terminal
    /// (spec.md §4.F `MakeServerArchived`).
    async fn make_server_archived(&self, id: Uuid) -> Result<ArchivedServer, ControllerError>;

    /// Every `Event` whose owning server is live or dormant; excludes
    /// archived servers (spec.md §4.F `ListActiveServerEvents`, §3).
    async fn list_active_server_events(&self) -> Result<Vec<Event>, ControllerError>;

    /// Every server currently in the live state (used by
    /// `Controller::live_server_rcon_for_each`, spec.md §4.G).
    async fn list_live_servers(&self) -> Result<Vec<LiveServer>, ControllerError>;

    /// Fails with `SERVER_DNE` if the server is absent; otherwise inserts
    /// (spec.md §4.F `CreateWipe`).
    async fn create_wipe(&self, server_id: Uuid, wipe: Wipe) -> Result<Wipe, ControllerError>;

    /// Stamps `appliedAt = now` (spec.md §4.F `ApplyWipe`).
    async fn apply_wipe(&self, wipe_id: Uuid) -> Result<(), ControllerError>;

    /// Adds moderators, ignoring steam ids already present (spec.md §4.G
    /// `AddServerModerators`: "persist").
    async fn add_moderators(
        &self,
        server_id: Uuid,
        steam_ids: &[String],
    ) -> Result<(), ControllerError>;

    async fn remove_moderators(
        &self,
        server_id: Uuid,
        steam_ids: &[String],
    ) -> Result<(), ControllerError>;

    async fn add_owners(&self, server_id: Uuid, steam_ids: &[String]) -> Result<(), ControllerError>;

    async fn remove_owners(&self, server_id: Uuid, steam_ids: &[String]) -> Result<(), ControllerError>;

    /// Persists a VIP entitlement (spec.md §4.I step 3).
    async fn add_vip(&self, vip: Vip) -> Result<Vip, ControllerError>;

    /// Adds tags, ignoring ones already present (spec.md §6 `POST
    /// /v1/server/tags`).
    async fn add_tags(&self, server_id: Uuid, tags: &[String]) -> Result<(), ControllerError>;

    async fn remove_tags(&self, server_id: Uuid, tags: &[String]) -> Result<(), ControllerError>;

    /// Adds cron-scheduled events, picked up by the director on its next
    /// refresh (spec.md §6 `POST /v1/server/events`, §4.H).
    async fn add_events(&self, server_id: Uuid, events: Vec<Event>) -> Result<(), ControllerError>;

    async fn remove_events(&self, server_id: Uuid, event_ids: &[Uuid]) -> Result<(), ControllerError>;

    /// Records last-observed player counts on a live server's state row
    /// (spec.md §4.G `CaptureServerInfo`).
    async fn record_player_counts(
        &self,
        server_id: Uuid,
        active_players: u32,
        queued_players: u32,
    ) -> Result<(), ControllerError>;
}
