// src/billing/mod.rs

//! Component I: a long-running consumer-group loop over the billing
//! event stream (spec.md §4.I). Grounded in the same Redis connection
//! the lock (`core::lock`) and refresh pub/sub (`core::pubsub::redis_backed`)
//! use; streams are a distinct Redis primitive from key/value and
//! publish/subscribe, so a dedicated consumer-group loop is the concrete
//! realization of spec.md §4.I's "Claim(pending-older-than)" / "Read(next)".

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use redis::AsyncCommands;
use redis::streams::{
    StreamAutoClaimOptions, StreamAutoClaimReply, StreamId, StreamReadOptions, StreamReadReply,
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use uuid::Uuid;

use crate::config::BillingConfig;
use crate::core::metrics;
use crate::core::model::{StateKind, Vip};
use crate::rcon::RconClient;
use crate::store::ServerStore;

const BYPASS_QUEUE_PERMISSION: &str = "bypassqueue.allow";
const VIP_DURATION_DAYS: i64 = 31;
const PAYLOAD_FIELD: &str = "payload";

/// The `kind` discriminator on every event-stream message (spec.md §4.I
/// step 2).
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum BillingEvent {
    InvoicePaid {
        #[serde(rename = "subscriptionId")]
        subscription_id: String,
        #[serde(rename = "serverId")]
        server_id: Uuid,
        #[serde(rename = "steamId")]
        steam_id: String,
    },
    StripeWebhook,
    VipRefresh,
    ServerStatusChange,
}

pub struct EventStreamHandler {
    client: redis::Client,
    config: BillingConfig,
    store: Arc<dyn ServerStore>,
}

impl EventStreamHandler {
    pub fn new(redis_url: &str, config: BillingConfig, store: Arc<dyn ServerStore>) -> anyhow::Result<Self> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            config,
            store,
        })
    }

    /// Runs until `ctx` is cancelled; never stops on a bad message
    /// (spec.md §4.I: "per-message failures are logged").
    pub async fn run(&self, ctx: CancellationToken) {
        let mut conn = match self.client.get_multiplexed_async_connection().await {
            Ok(c) => c,
            Err(e) => {
                error!("billing handler could not connect to the event stream: {e}");
                return;
            }
        };

        if let Err(e) = self.ensure_group(&mut conn).await {
            warn!("billing handler consumer group setup failed: {e}");
        }

        while !ctx.is_cancelled() {
            tokio::select! {
                _ = ctx.cancelled() => return,
                _ = self.tick(&mut conn) => {}
            }
        }
    }

    async fn ensure_group(&self, conn: &mut redis::aio::MultiplexedConnection) -> redis::RedisResult<()> {
        let result: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(&self.config.stream_key, &self.config.consumer_group, "$")
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Claims anything stuck past the idle threshold first; falls back
    /// to reading the next new message (spec.md §4.I step 1).
    async fn tick(&self, conn: &mut redis::aio::MultiplexedConnection) {
        match self.claim_pending(conn).await {
            Ok(Some((id, payload))) => self.handle(conn, &id, &payload).await,
            Ok(None) => match self.read_next(conn).await {
                Ok(Some((id, payload))) => self.handle(conn, &id, &payload).await,
                Ok(None) => tokio::time::sleep(Duration::from_millis(250)).await,
                Err(e) => {
                    warn!("billing handler read failed: {e}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            },
            Err(e) => {
                warn!("billing handler claim failed: {e}");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }

    async fn claim_pending(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
    ) -> redis::RedisResult<Option<(String, String)>> {
        let min_idle_ms = self.config.claim_min_idle.as_millis() as usize;
        let reply: StreamAutoClaimReply = conn
            .xautoclaim_options(
                &self.config.stream_key,
                &self.config.consumer_group,
                &self.config.consumer_name,
                min_idle_ms,
                "0-0",
                StreamAutoClaimOptions::default(),
            )
            .await?;
        Ok(reply.claimed.into_iter().find_map(first_payload))
    }

    async fn read_next(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
    ) -> redis::RedisResult<Option<(String, String)>> {
        let options = StreamReadOptions::default()
            .group(&self.config.consumer_group, &self.config.consumer_name)
            .count(1)
            .block(1000);
        let reply: StreamReadReply = conn
            .xread_options(&[&self.config.stream_key], &[">"], &options)
            .await?;
        Ok(reply
            .keys
            .into_iter()
            .flat_map(|key| key.ids)
            .find_map(first_payload))
    }

    async fn handle(&self, conn: &mut redis::aio::MultiplexedConnection, id: &str, payload: &str) {
        let kind = match self.process(payload).await {
            Ok(label) => label,
            Err(e) => {
                warn!("billing event {id} failed: {e}");
                "error"
            }
        };
        metrics::BILLING_EVENTS_TOTAL.with_label_values(&[kind]).inc();

        let ack: redis::RedisResult<i64> = conn
            .xack(&self.config.stream_key, &self.config.consumer_group, &[id])
            .await;
        if let Err(e) = ack {
            warn!("billing event {id} ack failed: {e}");
        }
    }

    /// Parses and applies one payload, returning the metric label for
    /// the kind it matched (spec.md §4.I steps 2-3).
    async fn process(&self, payload: &str) -> anyhow::Result<&'static str> {
        let event: BillingEvent = serde_json::from_str(payload)?;
        match event {
            BillingEvent::InvoicePaid {
                server_id,
                steam_id,
                subscription_id,
            } => {
                self.apply_invoice_paid(server_id, steam_id, subscription_id).await?;
                Ok("invoice_paid")
            }
            BillingEvent::StripeWebhook => Ok("stripe_webhook"),
            BillingEvent::VipRefresh => Ok("vip_refresh"),
            BillingEvent::ServerStatusChange => Ok("server_status_change"),
        }
    }

    /// Inserts the VIP row, then if the server is live, pushes the
    /// queue-bypass grant over RCON (spec.md §4.I step 3).
    async fn apply_invoice_paid(
        &self,
        server_id: Uuid,
        steam_id: String,
        subscription_id: String,
    ) -> anyhow::Result<()> {
        let vip = Vip {
            steam_id: steam_id.clone(),
            server_id,
            expiry: Utc::now() + ChronoDuration::days(VIP_DURATION_DAYS),
            subscription_id,
        };
        self.store.add_vip(vip).await?;

        let server = self.store.get_server(server_id).await?;
        if server.state_kind != StateKind::Live {
            return Ok(());
        }
        let Some(url) = server.rcon_url() else {
            return Ok(());
        };
        match RconClient::connect(&url).await {
            Ok(client) => {
                if let Err(e) = client.grant_permission(&steam_id, BYPASS_QUEUE_PERMISSION).await {
                    if !e.is_idempotent_reply() {
                        warn!(server_id = %server_id, steam_id, "grant_permission over rcon failed: {e}");
                    }
                }
                client.close();
            }
            Err(e) => warn!(server_id = %server_id, "could not open rcon client for vip grant: {e}"),
        }
        Ok(())
    }
}

fn first_payload(entry: StreamId) -> Option<(String, String)> {
    let value = entry.map.get(PAYLOAD_FIELD)?;
    let payload: String = redis::from_redis_value(value).ok()?;
    Some((entry.id, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{Server, WorldParams};
    use crate::store::InMemoryServerStore;
    use std::collections::HashMap;

    fn blank_server(id: Uuid) -> Server {
        Server {
            id,
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

    #[test]
    fn first_payload_extracts_the_payload_field() {
        let mut map = HashMap::new();
        map.insert(
            PAYLOAD_FIELD.to_string(),
            redis::Value::BulkString(b"{\"kind\":\"vip_refresh\"}".to_vec()),
        );
        let entry = StreamId {
            id: "1-0".to_string(),
            map,
        };
        let (id, payload) = first_payload(entry).unwrap();
        assert_eq!(id, "1-0");
        assert_eq!(payload, "{\"kind\":\"vip_refresh\"}");
    }

    #[test]
    fn first_payload_is_none_without_the_field() {
        let entry = StreamId {
            id: "1-0".to_string(),
            map: HashMap::new(),
        };
        assert!(first_payload(entry).is_none());
    }

    #[tokio::test]
    async fn invoice_paid_grants_a_vip_on_a_dormant_server() {
        let store: Arc<dyn ServerStore> = Arc::new(InMemoryServerStore::new());
        let server_id = Uuid::new_v4();
        store.create_server(blank_server(server_id)).await.unwrap();

        let handler = EventStreamHandler::new("redis://127.0.0.1:6379", BillingConfig::default(), store.clone()).unwrap();
        let payload = format!(
            "{{\"kind\":\"invoice_paid\",\"subscriptionId\":\"sub_1\",\"serverId\":\"{server_id}\",\"steamId\":\"76561197960287930\"}}"
        );

        let label = handler.process(&payload).await.unwrap();
        assert_eq!(label, "invoice_paid");

        let server = store.get_server(server_id).await.unwrap();
        assert_eq!(server.vips.len(), 1);
        assert_eq!(server.vips[0].steam_id, "76561197960287930");
    }

    #[tokio::test]
    async fn unrecognized_server_status_change_is_acknowledged_without_side_effects() {
        let store: Arc<dyn ServerStore> = Arc::new(InMemoryServerStore::new());
        let handler = EventStreamHandler::new("redis://127.0.0.1:6379", BillingConfig::default(), store).unwrap();
        let label = handler
            .process("{\"kind\":\"server_status_change\"}")
            .await
            .unwrap();
        assert_eq!(label, "server_status_change");
    }
}
