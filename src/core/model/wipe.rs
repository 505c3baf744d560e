// src/core/model/wipe.rs

//! World wipes (spec.md §3 "Wipe", §4.G step 2).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Whether a wipe resets the map only, or the map and blueprints both
/// (spec.md GLOSSARY "Wipe").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WipeKind {
    Map,
    Full,
}

/// A requested or applied world reset for one server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wipe {
    pub id: Uuid,
    pub server_id: Uuid,
    pub kind: WipeKind,
    pub seed: u32,
    pub salt: u32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub applied_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Wipe {
    pub fn is_pending(&self) -> bool {
        self.applied_at.is_none()
    }
}
