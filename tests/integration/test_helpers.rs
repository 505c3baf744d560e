// tests/integration/test_helpers.rs

//! Shared fixtures for the end-to-end scenarios: a `Controller` wired to
//! in-memory collaborators, plus a minimal WebSocket RCON endpoint
//! standing in for a real Rust dedicated server instance.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use rustpm_controller::config::RconTimeoutsConfig;
use rustpm_controller::controller::{Controller, CreateServerInput};
use rustpm_controller::core::ControllerError;
use rustpm_controller::core::events::{NullStatusEventSink, PubSub, StatusEventSink};
use rustpm_controller::core::model::WorldParams;
use rustpm_controller::core::pubsub::MemoryPubSub;
use rustpm_controller::instance::{CreatedInstance, InstanceDirector, InstanceManager, MadeAvailable};
use rustpm_controller::rcon::{Inbound, Outbound};
use rustpm_controller::store::{InMemoryServerStore, ServerStore};

/// The fixed RCON port every `Server::rcon_url` dials (spec.md §6).
const MOCK_RCON_PORT: u16 = 28016;

/// Short deadlines so a scenario fails fast instead of hanging if the
/// mock endpoint never answers.
pub fn fast_rcon_timeouts() -> RconTimeoutsConfig {
    RconTimeoutsConfig {
        start_deadline: Duration::from_secs(5),
        make_live_deadline: Duration::from_secs(5),
        stop_deadline: Duration::from_secs(5),
        ready_retry_interval: Duration::from_millis(20),
    }
}

/// Records every `user_data` script `StartInstance` was called with, and
/// always reports the `127.0.0.1` public IP the mock RCON server listens
/// on (spec.md §4.E).
pub struct CapturingInstanceManager {
    pub captured_user_data: Mutex<Vec<String>>,
}

impl CapturingInstanceManager {
    pub fn new() -> Self {
        Self {
            captured_user_data: Mutex::new(Vec::new()),
        }
    }

    pub async fn last_user_data(&self) -> String {
        self.captured_user_data
            .lock()
            .await
            .last()
            .cloned()
            .expect("start_instance was never called")
    }
}

#[async_trait]
impl InstanceManager for CapturingInstanceManager {
    async fn create_instance(&self, _kind: &str) -> Result<CreatedInstance, ControllerError> {
        Ok(CreatedInstance {
            instance_id: "i-mock".into(),
            allocation_id: "eipalloc-mock".into(),
            public_ip: "127.0.0.1".into(),
        })
    }

    async fn start_instance(&self, _id: &str, user_data: &str) -> Result<(), ControllerError> {
        self.captured_user_data.lock().await.push(user_data.to_string());
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
            association_id: "eipassoc-mock".into(),
        })
    }

    async fn make_instance_unavailable(&self, _association_id: &str) -> Result<(), ControllerError> {
        Ok(())
    }
}

/// A `Controller` wired to an `InMemoryServerStore`, a `CapturingInstanceManager`
/// registered for region `"us-west"`, and no analytics sink.
pub struct Fixture {
    pub controller: Arc<Controller>,
    pub store: Arc<dyn ServerStore>,
    pub instances: Arc<CapturingInstanceManager>,
}

pub fn fixture() -> Fixture {
    let store: Arc<dyn ServerStore> = Arc::new(InMemoryServerStore::new());
    let instances = Arc::new(CapturingInstanceManager::new());
    let mut managers: HashMap<String, Arc<dyn InstanceManager>> = HashMap::new();
    managers.insert("us-west".into(), instances.clone());
    let director = Arc::new(InstanceDirector::new(managers));
    let pubsub: Arc<dyn PubSub> = Arc::new(MemoryPubSub::new());
    let status_sink: Arc<dyn StatusEventSink> = Arc::new(NullStatusEventSink);
    let controller = Arc::new(Controller::new(
        store.clone(),
        director,
        pubsub,
        status_sink,
        fast_rcon_timeouts(),
    ));
    Fixture {
        controller,
        store,
        instances,
    }
}

pub fn create_server_input() -> CreateServerInput {
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

/// A WebSocket RCON endpoint answering `ServerInfo` immediately (so
/// `until_ready` succeeds on first dial) and tracking moderator-add
/// calls per steam id so the second call for the same id replies with
/// the idempotent "already a moderator" message (spec.md §8 scenario 5).
///
/// Every scenario dials the same fixed port (spec.md §6), and `cargo
/// test` runs test functions concurrently by default, so binding must
/// happen exactly once per process regardless of how many scenarios
/// call `spawn`.
pub struct MockRconServer;

static RCON_SERVER: tokio::sync::OnceCell<()> = tokio::sync::OnceCell::const_new();
static KNOWN_MODERATORS: once_cell::sync::Lazy<Arc<DashSet<String>>> =
    once_cell::sync::Lazy::new(|| Arc::new(DashSet::new()));

impl MockRconServer {
    /// Ensures the mock endpoint is listening; idempotent and safe to
    /// call from every scenario that needs it.
    pub async fn spawn() -> Self {
        RCON_SERVER
            .get_or_init(|| async {
                let listener = TcpListener::bind(("127.0.0.1", MOCK_RCON_PORT))
                    .await
                    .expect("bind mock rcon port");
                let accepted = Arc::new(AtomicUsize::new(0));
                let known_moderators = KNOWN_MODERATORS.clone();

                tokio::spawn(async move {
                    loop {
                        let Ok((stream, _)) = listener.accept().await else {
                            return;
                        };
                        accepted.fetch_add(1, Ordering::SeqCst);
                        tokio::spawn(Self::handle_connection(stream, known_moderators.clone()));
                    }
                });
            })
            .await;
        Self
    }

    async fn handle_connection(stream: TcpStream, known_moderators: Arc<DashSet<String>>) {
        let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
            return;
        };
        let (mut sink, mut stream) = ws.split();

        while let Some(Ok(WsMessage::Text(text))) = stream.next().await {
            let Ok(request) = serde_json::from_str::<Outbound>(&text) else {
                continue;
            };

            let reply = Self::reply_for(&request, &known_moderators);
            if let Some(reply) = reply {
                let payload = serde_json::to_string(&reply).expect("inbound always encodes");
                if sink.send(WsMessage::Text(payload.into())).await.is_err() {
                    return;
                }
            }

            if request.message == "global.quit" {
                let _ = sink.send(WsMessage::Close(None)).await;
                return;
            }
        }
    }

    fn reply_for(request: &Outbound, known_moderators: &DashSet<String>) -> Option<Inbound> {
        let generic = |message: String| {
            Some(Inbound {
                identifier: request.identifier,
                message,
                name: request.name.clone(),
                kind: "Generic".into(),
                stacktrace: None,
            })
        };

        if request.message == "global.serverinfo" {
            return generic(r#"{"Players":0,"Queued":0}"#.into());
        }
        if request.message == "global.quit" {
            return None;
        }
        if let Some(steam_id) = request.message.strip_prefix("global.moderatorid \"").and_then(|s| s.strip_suffix('"')) {
            return if known_moderators.insert(steam_id.to_string()) {
                generic(format!("Added moderator unnamed, steamid {steam_id}"))
            } else {
                generic(format!("User {steam_id} is already a Moderator"))
            };
        }

        generic("OK".into())
    }
}
