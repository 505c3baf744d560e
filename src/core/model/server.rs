// src/core/model/server.rs

//! The `Server` aggregate and its three mutually exclusive state rows.
//!
//! spec.md §3 models "one-of {live,dormant,archived}" as a pointer pair
//! `{StateId, StateKind}` on the source side. Per §9 ("Polymorphic server
//! state") we express the read path as a tagged union (`StateKind` plus
//! one row struct per variant) and leave the write path's atomicity
//! (delete-then-create in one transaction) to the `ServerStore`
//! implementation — nothing here emulates inheritance.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// World parameters the controller renders into instance user-data at
/// start time (spec.md §4.G step 3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorldParams {
    pub max_players: u32,
    pub map_size: u32,
    pub tick_rate: u32,
}

/// Which of the three exclusive lifecycle states a `Server` currently
/// occupies. Invariant (spec.md §3): exactly one at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    Dormant,
    Live,
    Archived,
}

/// Identity and configuration of a game server, independent of its
/// current lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: Uuid,
    pub name: String,
    pub region: String,
    pub instance_kind: String,

    // Cloud identifiers, populated by `InstanceDirector::create_instance`.
    pub instance_id: Option<String>,
    pub allocation_id: Option<String>,
    pub public_ip: Option<String>,

    pub world: WorldParams,
    pub rcon_password: String,

    pub description: String,
    pub banner_url: Option<String>,
    pub background_tag: Option<String>,

    pub owners: Vec<Owner>,
    pub moderators: Vec<Moderator>,
    pub vips: Vec<Vip>,
    pub events: Vec<super::Event>,
    pub wipes: Vec<super::Wipe>,

    /// Freeform labels surfaced in server listings (spec.md §6's
    /// relation table; distinct from `region` and `background_tag`,
    /// which are scalar presentation fields).
    pub tags: Vec<String>,

    /// Extra `key=value` launch options copied verbatim into user-data
    /// (spec.md §4.G step 3, "any options from the server record").
    pub options: Vec<(String, String)>,

    pub state_id: Uuid,
    pub state_kind: StateKind,
}

impl Server {
    /// The RCON endpoint this server's instance exposes once live
    /// (spec.md §6, "the only bit-exact interface the core owns").
    pub fn rcon_url(&self) -> Option<String> {
        let ip = self.public_ip.as_ref()?;
        Some(format!("ws://{ip}:28016/{}", self.rcon_password))
    }

    /// The wipe the controller treats as current: the one with the
    /// greatest `created_at` (spec.md §3).
    pub fn current_wipe(&self) -> Option<&super::Wipe> {
        self.wipes.iter().max_by_key(|w| w.created_at)
    }

    /// VIPs whose expiry lies in the future (spec.md §3, "active VIPs").
    pub fn active_vips(&self) -> impl Iterator<Item = &Vip> {
        let now = chrono::Utc::now();
        self.vips.iter().filter(move |v| v.expiry > now)
    }
}

use super::people::{Moderator, Owner, Vip};

/// State row for a server that is not currently running an instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DormantServer {
    pub state_id: Uuid,
    pub server: Server,
}

/// State row for a server with a running, joinable instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveServer {
    pub state_id: Uuid,
    pub server: Server,
    pub association_id: String,
    pub active_players: u32,
    pub queued_players: u32,
}

/// State row for a server that has been permanently retired. Terminal:
/// no transition leaves this state (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedServer {
    pub state_id: Uuid,
    pub server: Server,
    pub archived_at: chrono::DateTime<chrono::Utc>,
}
