// src/core/model/people.rs

//! The per-server relations that carry platform identities
//! (spec.md §3 "Moderator / Owner / VIP").

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A platform user granted the Oxide `moderator` role on a server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Moderator {
    pub steam_id: String,
    pub server_id: Uuid,
}

/// A platform user granted the Oxide `owner` role on a server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Owner {
    pub steam_id: String,
    pub server_id: Uuid,
}

/// A paying user with a time-bounded queue-bypass entitlement
/// (spec.md GLOSSARY "VIP").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vip {
    pub steam_id: String,
    pub server_id: Uuid,
    pub expiry: chrono::DateTime<chrono::Utc>,
    pub subscription_id: String,
}
