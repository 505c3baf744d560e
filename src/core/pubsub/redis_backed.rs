// src/core/pubsub/redis_backed.rs

//! Production `PubSub`: Redis `PUBLISH`/`SUBSCRIBE` against the same
//! KV store that backs the distributed lock (spec.md §6's "Pub/sub
//! subject: controller-refresh").

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::warn;

use crate::core::events::PubSub;

pub struct RedisPubSub {
    client: redis::Client,
}

impl RedisPubSub {
    pub fn new(redis_url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
        })
    }
}

#[async_trait]
impl PubSub for RedisPubSub {
    async fn publish(&self, subject: &str) -> anyhow::Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = redis::cmd("PUBLISH")
            .arg(subject)
            .arg("")
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> anyhow::Result<mpsc::Receiver<()>> {
        let client = self.client.clone();
        let subject = subject.to_string();
        let (tx, rx) = mpsc::channel(128);

        tokio::spawn(async move {
            loop {
                let pubsub = match client.get_async_pubsub().await {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("refresh pub/sub connection failed, retrying: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        continue;
                    }
                };
                let mut pubsub = pubsub;
                if let Err(e) = pubsub.subscribe(&subject).await {
                    warn!("refresh pub/sub subscribe failed, retrying: {e}");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    continue;
                }

                let mut stream = pubsub.on_message();
                while stream.next().await.is_some() {
                    if tx.send(()).await.is_err() {
                        return;
                    }
                }
                // The stream ended (connection dropped); reconnect.
            }
        });

        Ok(rx)
    }
}
