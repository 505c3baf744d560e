// src/core/pubsub/memory.rs

//! An in-process `PubSub` that fans broadcast channels out by subject.
//! Used by tests and single-replica deployments that run without a
//! separate KV store for the refresh subject.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};

use crate::core::events::PubSub;

const CHANNEL_CAPACITY: usize = 128;

#[derive(Default)]
pub struct MemoryPubSub {
    subjects: DashMap<String, broadcast::Sender<()>>,
}

impl MemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PubSub for MemoryPubSub {
    async fn publish(&self, subject: &str) -> anyhow::Result<()> {
        if let Some(tx) = self.subjects.get(subject) {
            let _ = tx.send(());
        }
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> anyhow::Result<mpsc::Receiver<()>> {
        let tx = self
            .subjects
            .entry(subject.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone();
        let mut brx = tx.subscribe();

        let (mtx, mrx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            while brx.recv().await.is_ok() {
                if mtx.send(()).await.is_err() {
                    return;
                }
            }
        });
        Ok(mrx)
    }
}
