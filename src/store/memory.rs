// src/store/memory.rs

//! A reference `ServerStore` backed by `DashMap`-guarded maps; no
//! external transaction manager is needed because every mutation here is
//! already a single in-process step. Used by unit and integration tests;
//! a production deployment backs `ServerStore` with the relational store
//! spec.md §1 delegates to.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::core::ControllerError;
use crate::core::model::{
    ArchivedServer, DormantServer, Event, LiveServer, Server, StateKind, Vip, Wipe,
};

use super::{ServerChanges, ServerStore};

/// The fields a state row carries beyond the embedded `Server`
/// (spec.md §3 "DormantServer / LiveServer / ArchivedServer").
enum StateRow {
    Dormant,
    Live {
        association_id: String,
        active_players: u32,
        queued_players: u32,
    },
    Archived {
        archived_at: chrono::DateTime<Utc>,
    },
}

pub struct InMemoryServerStore {
    servers: DashMap<Uuid, Server>,
    state: DashMap<Uuid, StateRow>,
}

impl InMemoryServerStore {
    pub fn new() -> Self {
        Self {
            servers: DashMap::new(),
            state: DashMap::new(),
        }
    }

    fn transition(&self, id: Uuid, row: StateRow) -> Result<Server, ControllerError> {
        let mut server = self
            .servers
            .get_mut(&id)
            .ok_or(ControllerError::ServerDne(id))?;
        server.state_id = Uuid::new_v4();
        server.state_kind = match &row {
            StateRow::Dormant => StateKind::Dormant,
            StateRow::Live { .. } => StateKind::Live,
            StateRow::Archived { .. } => StateKind::Archived,
        };
        self.state.insert(id, row);
        Ok(server.clone())
    }
}

impl Default for InMemoryServerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServerStore for InMemoryServerStore {
    async fn create_server(&self, mut server: Server) -> Result<DormantServer, ControllerError> {
        server.state_id = Uuid::new_v4();
        server.state_kind = StateKind::Dormant;
        let id = server.id;
        self.servers.insert(id, server.clone());
        self.state.insert(id, StateRow::Dormant);
        Ok(DormantServer {
            state_id: server.state_id,
            server,
        })
    }

    async fn get_server(&self, id: Uuid) -> Result<Server, ControllerError> {
        self.servers
            .get(&id)
            .map(|s| s.clone())
            .ok_or(ControllerError::ServerDne(id))
    }

    async fn get_dormant_server(&self, id: Uuid) -> Result<DormantServer, ControllerError> {
        let server = self.get_server(id).await?;
        match server.state_kind {
            StateKind::Dormant => Ok(DormantServer {
                state_id: server.state_id,
                server,
            }),
            _ => Err(ControllerError::ServerNotDormant(id)),
        }
    }

    async fn get_live_server(&self, id: Uuid) -> Result<LiveServer, ControllerError> {
        let server = self.get_server(id).await?;
        if server.state_kind != StateKind::Live {
            return Err(ControllerError::ServerNotLive(id));
        }
        match self.state.get(&id).map(|r| match &*r {
            StateRow::Live {
                association_id,
                active_players,
                queued_players,
            } => Some((association_id.clone(), *active_players, *queued_players)),
            _ => None,
        }) {
            Some(Some((association_id, active_players, queued_players))) => Ok(LiveServer {
                state_id: server.state_id,
                server,
                association_id,
                active_players,
                queued_players,
            }),
            _ => Err(ControllerError::ServerNotLive(id)),
        }
    }

    async fn get_archived_server(&self, id: Uuid) -> Result<ArchivedServer, ControllerError> {
        let server = self.get_server(id).await?;
        if server.state_kind != StateKind::Archived {
            return Err(ControllerError::ServerNotArchived(id));
        }
        match self.state.get(&id).map(|r| match &*r {
            StateRow::Archived { archived_at } => Some(*archived_at),
            _ => None,
        }) {
            Some(Some(archived_at)) => Ok(ArchivedServer {
                state_id: server.state_id,
                server,
                archived_at,
            }),
            _ => Err(ControllerError::ServerNotArchived(id)),
        }
    }

    async fn update_server(
        &self,
        id: Uuid,
        changes: ServerChanges,
    ) -> Result<DormantServer, ControllerError> {
        {
            let mut server = self
                .servers
                .get_mut(&id)
                .ok_or(ControllerError::ServerDne(id))?;
            if server.state_kind != StateKind::Dormant {
                return Err(ControllerError::ServerNotDormant(id));
            }
            if let Some(name) = changes.name {
                server.name = name;
            }
            if let Some(description) = changes.description {
                server.description = description;
            }
            if let Some(banner_url) = changes.banner_url {
                server.banner_url = Some(banner_url);
            }
            if let Some(background_tag) = changes.background_tag {
                server.background_tag = Some(background_tag);
            }
            if let Some(options) = changes.options {
                server.options = options;
            }
        }
        self.get_dormant_server(id).await
    }

    async fn make_server_live(
        &self,
        id: Uuid,
        association_id: String,
    ) -> Result<LiveServer, ControllerError> {
        let server = self.transition(
            id,
            StateRow::Live {
                association_id: association_id.clone(),
                active_players: 0,
                queued_players: 0,
            },
        )?;
        Ok(LiveServer {
            state_id: server.state_id,
            server,
            association_id,
            active_players: 0,
            queued_players: 0,
        })
    }

    async fn make_server_dormant(&self, id: Uuid) -> Result<DormantServer, ControllerError> {
        let server = self.transition(id, StateRow::Dormant)?;
        Ok(DormantServer {
            state_id: server.state_id,
            server,
        })
    }

    async fn make_server_archived(&self, id: Uuid) -> Result<ArchivedServer, ControllerError> {
        let archived_at = Utc::now();
        let server = self.transition(id, StateRow::Archived { archived_at })?;
        Ok(ArchivedServer {
            state_id: server.state_id,
            server,
            archived_at,
        })
    }

    async fn list_active_server_events(&self) -> Result<Vec<Event>, ControllerError> {
        Ok(self
            .servers
            .iter()
            .filter(|e| e.value().state_kind != StateKind::Archived)
            .flat_map(|e| e.value().events.clone())
            .collect())
    }

    async fn list_live_servers(&self) -> Result<Vec<LiveServer>, ControllerError> {
        let mut out = Vec::new();
        for entry in self.servers.iter() {
            if entry.value().state_kind == StateKind::Live {
                out.push(self.get_live_server(*entry.key()).await?);
            }
        }
        Ok(out)
    }

    async fn create_wipe(&self, server_id: Uuid, wipe: Wipe) -> Result<Wipe, ControllerError> {
        let mut server = self
            .servers
            .get_mut(&server_id)
            .ok_or(ControllerError::ServerDne(server_id))?;
        server.wipes.push(wipe.clone());
        Ok(wipe)
    }

    async fn apply_wipe(&self, wipe_id: Uuid) -> Result<(), ControllerError> {
        for mut entry in self.servers.iter_mut() {
            if let Some(wipe) = entry.wipes.iter_mut().find(|w| w.id == wipe_id) {
                wipe.applied_at = Some(Utc::now());
                return Ok(());
            }
        }
        Err(ControllerError::WipeDne(wipe_id))
    }

    async fn add_moderators(
        &self,
        server_id: Uuid,
        steam_ids: &[String],
    ) -> Result<(), ControllerError> {
        let mut server = self
            .servers
            .get_mut(&server_id)
            .ok_or(ControllerError::ServerDne(server_id))?;
        for steam_id in steam_ids {
            if !server.moderators.iter().any(|m| &m.steam_id == steam_id) {
                server.moderators.push(crate::core::model::Moderator {
                    steam_id: steam_id.clone(),
                    server_id,
                });
            }
        }
        Ok(())
    }

    async fn remove_moderators(
        &self,
        server_id: Uuid,
        steam_ids: &[String],
    ) -> Result<(), ControllerError> {
        let mut server = self
            .servers
            .get_mut(&server_id)
            .ok_or(ControllerError::ServerDne(server_id))?;
        server.moderators.retain(|m| !steam_ids.contains(&m.steam_id));
        Ok(())
    }

    async fn add_owners(&self, server_id: Uuid, steam_ids: &[String]) -> Result<(), ControllerError> {
        let mut server = self
            .servers
            .get_mut(&server_id)
            .ok_or(ControllerError::ServerDne(server_id))?;
        for steam_id in steam_ids {
            if !server.owners.iter().any(|o| &o.steam_id == steam_id) {
                server.owners.push(crate::core::model::Owner {
                    steam_id: steam_id.clone(),
                    server_id,
                });
            }
        }
        Ok(())
    }

    async fn remove_owners(&self, server_id: Uuid, steam_ids: &[String]) -> Result<(), ControllerError> {
        let mut server = self
            .servers
            .get_mut(&server_id)
            .ok_or(ControllerError::ServerDne(server_id))?;
        server.owners.retain(|o| !steam_ids.contains(&o.steam_id));
        Ok(())
    }

    async fn add_vip(&self, vip: Vip) -> Result<Vip, ControllerError> {
        let mut server = self
            .servers
            .get_mut(&vip.server_id)
            .ok_or(ControllerError::ServerDne(vip.server_id))?;
        server.vips.push(vip.clone());
        Ok(vip)
    }

    async fn add_tags(&self, server_id: Uuid, tags: &[String]) -> Result<(), ControllerError> {
        let mut server = self
            .servers
            .get_mut(&server_id)
            .ok_or(ControllerError::ServerDne(server_id))?;
        for tag in tags {
            if !server.tags.contains(tag) {
                server.tags.push(tag.clone());
            }
        }
        Ok(())
    }

    async fn remove_tags(&self, server_id: Uuid, tags: &[String]) -> Result<(), ControllerError> {
        let mut server = self
            .servers
            .get_mut(&server_id)
            .ok_or(ControllerError::ServerDne(server_id))?;
        server.tags.retain(|t| !tags.contains(t));
        Ok(())
    }

    async fn add_events(&self, server_id: Uuid, events: Vec<Event>) -> Result<(), ControllerError> {
        let mut server = self
            .servers
            .get_mut(&server_id)
            .ok_or(ControllerError::ServerDne(server_id))?;
        server.events.extend(events);
        Ok(())
    }

    async fn remove_events(&self, server_id: Uuid, event_ids: &[Uuid]) -> Result<(), ControllerError> {
        let mut server = self
            .servers
            .get_mut(&server_id)
            .ok_or(ControllerError::ServerDne(server_id))?;
        server.events.retain(|e| !event_ids.contains(&e.id));
        Ok(())
    }

    async fn record_player_counts(
        &self,
        server_id: Uuid,
        active_players: u32,
        queued_players: u32,
    ) -> Result<(), ControllerError> {
        if !self.servers.contains_key(&server_id) {
            return Err(ControllerError::ServerDne(server_id));
        }
        match self.state.get_mut(&server_id).map(|mut r| {
            if let StateRow::Live {
                active_players: a,
                queued_players: q,
                ..
            } = &mut *r
            {
                *a = active_players;
                *q = queued_players;
                true
            } else {
                false
            }
        }) {
            Some(true) => Ok(()),
            _ => Err(ControllerError::ServerNotLive(server_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::WorldParams;

    fn blank_server() -> Server {
        Server {
            id: Uuid::new_v4(),
            name: "test".into(),
            region: "us-west".into(),
            instance_kind: "m5.large".into(),
            instance_id: None,
            allocation_id: None,
            public_ip: None,
            world: WorldParams {
                max_players: 100,
                map_size: 3500,
                tick_rate: 30,
            },
            rcon_password: "secret".into(),
            description: String::new(),
            banner_url: None,
            background_tag: None,
            owners: vec![],
            moderators: vec![],
            vips: vec![],
            events: vec![],
            wipes: vec![],
            tags: vec![],
            options: vec![],
            state_id: Uuid::nil(),
            state_kind: StateKind::Dormant,
        }
    }

    #[tokio::test]
    async fn create_then_transition_preserves_exactly_one_state_row() {
        let store = InMemoryServerStore::new();
        let created = store.create_server(blank_server()).await.unwrap();
        let id = created.server.id;

        assert!(store.get_dormant_server(id).await.is_ok());
        assert!(matches!(
            store.get_live_server(id).await,
            Err(ControllerError::ServerNotLive(_))
        ));

        store.make_server_live(id, "assoc-1".into()).await.unwrap();
        assert!(store.get_live_server(id).await.is_ok());
        assert!(matches!(
            store.get_dormant_server(id).await,
            Err(ControllerError::ServerNotDormant(_))
        ));

        store.make_server_archived(id).await.unwrap();
        assert!(store.get_archived_server(id).await.is_ok());
        assert!(matches!(
            store.get_live_server(id).await,
            Err(ControllerError::ServerNotLive(_))
        ));
    }

    #[tokio::test]
    async fn list_active_server_events_excludes_archived_servers() {
        let store = InMemoryServerStore::new();
        let mut server = blank_server();
        server.events.push(Event {
            id: Uuid::new_v4(),
            server_id: server.id,
            cron_expression: "0 12 * * *".into(),
            weekday_filter: None,
            kind: crate::core::model::EventKind::Start,
        });
        let created = store.create_server(server).await.unwrap();
        let id = created.server.id;

        assert_eq!(store.list_active_server_events().await.unwrap().len(), 1);
        store.make_server_archived(id).await.unwrap();
        assert_eq!(store.list_active_server_events().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn apply_wipe_stamps_applied_at() {
        let store = InMemoryServerStore::new();
        let created = store.create_server(blank_server()).await.unwrap();
        let id = created.server.id;
        let wipe = Wipe {
            id: Uuid::new_v4(),
            server_id: id,
            kind: crate::core::model::WipeKind::Map,
            seed: 1,
            salt: 2,
            created_at: Utc::now(),
            applied_at: None,
        };
        store.create_wipe(id, wipe.clone()).await.unwrap();
        store.apply_wipe(wipe.id).await.unwrap();

        let server = store.get_server(id).await.unwrap();
        assert!(server.current_wipe().unwrap().applied_at.is_some());
    }

    #[tokio::test]
    async fn add_moderators_is_idempotent_on_steam_id() {
        let store = InMemoryServerStore::new();
        let created = store.create_server(blank_server()).await.unwrap();
        let id = created.server.id;

        store.add_moderators(id, &["76561197960287930".into()]).await.unwrap();
        store.add_moderators(id, &["76561197960287930".into()]).await.unwrap();

        let server = store.get_server(id).await.unwrap();
        assert_eq!(server.moderators.len(), 1);
    }
}
