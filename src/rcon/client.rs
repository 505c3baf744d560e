// src/rcon/client.rs

//! Component C: owns the WebSocket to one game server and exposes the
//! typed RCON command surface (spec.md §4.C).
//!
//! The read/write pump split and ping/pong bookkeeping follow the same
//! shape as the `other_examples` WebSocket client
//! (`o2-exchange-sdks/.../websocket.rs`): one task per direction, a
//! shared "closed" signal, and a read deadline that resets on pong.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, warn};

use crate::core::ControllerError;
use crate::core::metrics;

use super::protocol::{Inbound, Outbound};
use super::router::Router;

/// Read deadline, reset on every pong (spec.md §6).
const READ_DEADLINE: Duration = Duration::from_secs(60);
/// Write deadline for individual frame sends (spec.md §6).
const WRITE_DEADLINE: Duration = Duration::from_secs(10);
/// Ping period = pongWait * 9/10 (spec.md §6).
const PING_PERIOD: Duration = Duration::from_secs(54);
/// Max inbound frame size (spec.md §6).
const MAX_INBOUND_SIZE: usize = 4096;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A live RCON connection to one game server.
pub struct RconClient {
    router: Arc<Router>,
    closed: Arc<Notify>,
    close_issued: Arc<AtomicBool>,
    write_pump: tokio::task::JoinHandle<()>,
    read_pump: tokio::task::JoinHandle<()>,
}

impl RconClient {
    /// Dials `url` (`ws://<publicIp>:28016/<rconPassword>`, spec.md §6)
    /// and starts the read/write pumps.
    pub async fn connect(url: &str) -> Result<Self, ControllerError> {
        let config = WebSocketConfig {
            max_message_size: Some(MAX_INBOUND_SIZE),
            ..Default::default()
        };
        let (ws, _response) = tokio_tungstenite::connect_async_with_config(url, Some(config), false)
            .await
            .map_err(ControllerError::from)?;

        let (sink, stream) = ws.split();
        let router = Arc::new(Router::new());
        let closed = Arc::new(Notify::new());
        let close_issued = Arc::new(AtomicBool::new(false));

        let outbound_rx = router
            .outbound_consumer()
            .await
            .expect("freshly constructed router always yields its outbound consumer");

        let write_pump = tokio::spawn(Self::write_pump(sink, outbound_rx, closed.clone()));
        let read_pump = tokio::spawn(Self::read_pump(
            stream,
            router.clone(),
            closed.clone(),
            close_issued.clone(),
        ));

        Ok(Self {
            router,
            closed,
            close_issued,
            write_pump,
            read_pump,
        })
    }

    /// Closes the client. Idempotent and safe to call from either pump or
    /// the owner (spec.md §4.C).
    pub fn close(&self) {
        if self
            .close_issued
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.closed.notify_waiters();
        }
    }

    pub async fn join(self) {
        let _ = self.write_pump.await;
        let _ = self.read_pump.await;
    }

    async fn write_pump(
        mut sink: futures_util::stream::SplitSink<WsStream, WsMessage>,
        mut outbound_rx: tokio::sync::mpsc::Receiver<Outbound>,
        closed: Arc<Notify>,
    ) {
        let mut ticker = tokio::time::interval(PING_PERIOD);
        ticker.tick().await; // first tick fires immediately; discard it.

        loop {
            tokio::select! {
                _ = closed.notified() => {
                    let _ = tokio::time::timeout(WRITE_DEADLINE, sink.send(WsMessage::Close(None))).await;
                    debug!("rcon write pump sent close frame");
                    return;
                }
                _ = ticker.tick() => {
                    if tokio::time::timeout(WRITE_DEADLINE, sink.send(WsMessage::Ping(Vec::new().into())))
                        .await
                        .is_err()
                    {
                        warn!("rcon ping write timed out");
                        closed.notify_waiters();
                        return;
                    }
                }
                maybe_out = outbound_rx.recv() => {
                    match maybe_out {
                        Some(out) => {
                            let payload = match serde_json::to_string(&out) {
                                Ok(p) => p,
                                Err(e) => {
                                    error!("failed to encode outbound: {e}");
                                    continue;
                                }
                            };
                            if tokio::time::timeout(WRITE_DEADLINE, sink.send(WsMessage::Text(payload.into())))
                                .await
                                .is_err()
                            {
                                warn!("rcon outbound write timed out");
                                closed.notify_waiters();
                                return;
                            }
                        }
                        None => {
                            // Router dropped: the client is being torn down.
                            let _ = tokio::time::timeout(WRITE_DEADLINE, sink.send(WsMessage::Close(None))).await;
                            closed.notify_waiters();
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Open question (spec.md §9, "readPump close coupling"): close the
    /// socket first via the write pump's close frame, then signal
    /// `closed`; a read error observed after `closed` has already fired
    /// is treated as benign rather than logged as a failure.
    async fn read_pump(
        mut stream: futures_util::stream::SplitStream<WsStream>,
        router: Arc<Router>,
        closed: Arc<Notify>,
        close_issued: Arc<AtomicBool>,
    ) {
        loop {
            let next = tokio::select! {
                _ = closed.notified() => return,
                frame = tokio::time::timeout(READ_DEADLINE, stream.next()) => frame,
            };

            let frame = match next {
                Ok(Some(Ok(f))) => f,
                Ok(Some(Err(e))) => {
                    if !close_issued.load(Ordering::SeqCst) {
                        warn!("rcon read error: {e}");
                    }
                    close_issued.store(true, Ordering::SeqCst);
                    closed.notify_waiters();
                    return;
                }
                Ok(None) => {
                    close_issued.store(true, Ordering::SeqCst);
                    closed.notify_waiters();
                    return;
                }
                Err(_) => {
                    warn!("rcon read deadline exceeded without a pong");
                    close_issued.store(true, Ordering::SeqCst);
                    closed.notify_waiters();
                    return;
                }
            };

            match frame {
                WsMessage::Text(text) => match serde_json::from_str::<Inbound>(&text) {
                    Ok(inbound) => {
                        if let Err(e) = router.injest(inbound).await {
                            debug!("rcon inbound routing failed: {e}");
                        }
                    }
                    Err(e) => warn!("rcon inbound decode failed: {e}"),
                },
                WsMessage::Pong(_) => {
                    // Deadline reset happens implicitly: the next loop
                    // iteration re-arms `READ_DEADLINE` from now.
                }
                WsMessage::Close(_) => {
                    close_issued.store(true, Ordering::SeqCst);
                    closed.notify_waiters();
                    return;
                }
                _ => {}
            }
        }
    }

    /// Races the reply against the pump's close signal: once either pump
    /// exits, `closed` fires but the dead route's sender is never dropped
    /// (it is still parked in the router), so without this race a reply
    /// that will never arrive leaves this call parked forever.
    async fn request_one(&self, out: Outbound) -> Result<Inbound, ControllerError> {
        if self.close_issued.load(Ordering::SeqCst) {
            return Err(ControllerError::RconClosed);
        }

        let identifier = out.identifier;
        let mut stream = self.router.request(out).await?;
        let result = tokio::select! {
            _ = self.closed.notified() => {
                self.router.close_route(identifier);
                return Err(ControllerError::RconClosed);
            }
            item = tokio_stream::StreamExt::next(&mut stream) => item,
        };
        self.router.close_route(identifier);
        match result {
            Some(inbound) => {
                inbound.validate_correlated(identifier)?;
                Ok(inbound)
            }
            None => Err(ControllerError::StreamEmpty),
        }
    }

    fn record(method: &str, outcome: &str) {
        metrics::RCON_COMMANDS_TOTAL
            .with_label_values(&[method, outcome])
            .inc();
    }

    pub async fn add_moderator(&self, steam_id: &str) -> Result<(), ControllerError> {
        let out = Outbound::new(format!("global.moderatorid \"{steam_id}\""));
        let reply = self.request_one(out).await?;
        if reply.message == format!("Added moderator unnamed, steamid {steam_id}") {
            Self::record("add_moderator", "success");
            Ok(())
        } else if reply.message == format!("User {steam_id} is already a Moderator") {
            Self::record("add_moderator", "idempotent");
            Err(ControllerError::ModeratorExists(steam_id.to_string()))
        } else {
            Self::record("add_moderator", "error");
            Err(ControllerError::UnexpectedInboundMessage(reply.message))
        }
    }

    pub async fn remove_moderator(&self, steam_id: &str) -> Result<(), ControllerError> {
        let out = Outbound::new(format!("global.removemoderator \"{steam_id}\""));
        let reply = self.request_one(out).await?;
        if reply.message == format!("Removed Moderator: {steam_id}") {
            Self::record("remove_moderator", "success");
            Ok(())
        } else if reply.message == format!("User {steam_id} isn't a moderator") {
            Self::record("remove_moderator", "idempotent");
            Err(ControllerError::ModeratorDne(steam_id.to_string()))
        } else {
            Self::record("remove_moderator", "error");
            Err(ControllerError::UnexpectedInboundMessage(reply.message))
        }
    }

    pub async fn add_owner(&self, steam_id: &str) -> Result<(), ControllerError> {
        let out = Outbound::new(format!("global.ownerid \"{steam_id}\""));
        let reply = self.request_one(out).await?;
        if reply.message == format!("Added owner unnamed, steamid {steam_id}") {
            Self::record("add_owner", "success");
            Ok(())
        } else if reply.message == format!("User {steam_id} is already an Owner") {
            Self::record("add_owner", "idempotent");
            Err(ControllerError::OwnerExists(steam_id.to_string()))
        } else {
            Self::record("add_owner", "error");
            Err(ControllerError::UnexpectedInboundMessage(reply.message))
        }
    }

    pub async fn remove_owner(&self, steam_id: &str) -> Result<(), ControllerError> {
        let out = Outbound::new(format!("global.removeowner \"{steam_id}\""));
        let reply = self.request_one(out).await?;
        if reply.message == format!("Removed Owner: {steam_id}") {
            Self::record("remove_owner", "success");
            Ok(())
        } else if reply.message == format!("User {steam_id} isn't an owner") {
            Self::record("remove_owner", "idempotent");
            Err(ControllerError::OwnerDne(steam_id.to_string()))
        } else {
            Self::record("remove_owner", "error");
            Err(ControllerError::UnexpectedInboundMessage(reply.message))
        }
    }

    pub async fn grant_permission(
        &self,
        steam_id: &str,
        permission: &str,
    ) -> Result<(), ControllerError> {
        let out = Outbound::new(format!("oxide.grant user {steam_id} {permission}"));
        let reply = self.request_one(out).await?;
        if reply.message == format!("Player '{steam_id} ({steam_id})' granted permission '{permission}'")
        {
            Self::record("grant_permission", "success");
            Ok(())
        } else if reply.message
            == format!("Player '{steam_id}' already has permission '{permission}'")
        {
            Self::record("grant_permission", "idempotent");
            Err(ControllerError::PermissionAlreadyGranted {
                steamid: steam_id.to_string(),
                permission: permission.to_string(),
            })
        } else {
            Self::record("grant_permission", "error");
            Err(ControllerError::UnexpectedInboundMessage(reply.message))
        }
    }

    pub async fn revoke_permission(
        &self,
        steam_id: &str,
        permission: &str,
    ) -> Result<(), ControllerError> {
        let out = Outbound::new(format!("oxide.revoke user {steam_id} {permission}"));
        let reply = self.request_one(out).await?;
        if reply.message
            == format!("Player '{steam_id} ({steam_id})' revoked permission '{permission}'")
        {
            Self::record("revoke_permission", "success");
            Ok(())
        } else {
            Self::record("revoke_permission", "error");
            Err(ControllerError::UnexpectedInboundMessage(reply.message))
        }
    }

    pub async fn create_group(&self, group: &str) -> Result<(), ControllerError> {
        let out = Outbound::new(format!("oxide.group add {group}"));
        let reply = self.request_one(out).await?;
        if reply.message == format!("Group '{group}' created") {
            Self::record("create_group", "success");
            Ok(())
        } else {
            Self::record("create_group", "error");
            Err(ControllerError::UnexpectedInboundMessage(reply.message))
        }
    }

    pub async fn add_to_group(&self, steam_id: &str, group: &str) -> Result<(), ControllerError> {
        let out = Outbound::new(format!("oxide.usergroup add {steam_id} {group}"));
        let reply = self.request_one(out).await?;
        if reply.message == format!("Player '{steam_id}' added to group: {group}") {
            Self::record("add_to_group", "success");
            Ok(())
        } else {
            Self::record("add_to_group", "error");
            Err(ControllerError::UnexpectedInboundMessage(reply.message))
        }
    }

    /// `say <msg>` (spec.md §4.C): raw message, no quoting injected
    /// (spec.md §9 "Open question — Say escaping"). Fire-and-forget.
    pub async fn say(&self, message: &str) -> Result<(), ControllerError> {
        let mut stream = self.router.request(Outbound::uncorrelated(message)).await?;
        // Drain immediately; an uncorrelated route never yields anything.
        let _ = tokio_stream::StreamExt::next(&mut stream).await;
        Self::record("say", "success");
        Ok(())
    }

    /// `global.quit`: returns when the route/connection closes (spec.md §4.C).
    pub async fn quit(&self) -> Result<(), ControllerError> {
        self.router.write(Outbound::new("global.quit")).await?;
        self.closed.notified().await;
        Self::record("quit", "success");
        Ok(())
    }

    /// `global.serverinfo`: the reply's `message` is a JSON payload (spec.md §4.C).
    pub async fn server_info(&self) -> Result<String, ControllerError> {
        let out = Outbound::new("global.serverinfo");
        let reply = self.request_one(out).await?;
        Self::record("server_info", "success");
        Ok(reply.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Accepts one connection, completes the handshake, reads the request
    /// that arrives, then vanishes without ever replying.
    async fn spawn_silent_then_closing_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                return;
            };
            let (mut sink, mut stream) = ws.split();
            let _ = stream.next().await;
            let _ = sink.close().await;
        });
        format!("ws://{addr}/hunter2")
    }

    #[tokio::test]
    async fn a_dead_connection_fails_a_pending_request_instead_of_hanging() {
        let url = spawn_silent_then_closing_server().await;
        let client = RconClient::connect(&url).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), client.server_info())
            .await
            .expect("request_one must not hang once the connection dies");
        assert!(result.is_err());
    }
}
