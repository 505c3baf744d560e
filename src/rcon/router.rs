// src/rcon/router.rs

//! Component B: correlates outbound RCON requests to inbound replies by
//! integer identifier (spec.md §4.B): a `DashMap`-of-channels guarding
//! the only shared mutable state this client owns (spec.md §5).

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt, wrappers::ReceiverStream};
use tracing::warn;

use crate::core::ControllerError;

use super::protocol::{Inbound, Outbound, UNCORRELATED_IDENTIFIER};

/// Depth of each per-identifier reply channel. A handful of replies can
/// arrive before the caller drains them (e.g. streamed console output);
/// one is enough for the single-reply commands spec.md §4.C enumerates.
const ROUTE_BUFFER: usize = 8;

/// The outbound queue is deliberately a single slot: back-pressure is the
/// intended behavior (spec.md §4.B "Invariants").
const OUTBOUND_BUFFER: usize = 1;

pub struct Router {
    routes: DashMap<i32, mpsc::Sender<Inbound>>,
    outbound_tx: mpsc::Sender<Outbound>,
    outbound_rx: Mutex<Option<mpsc::Receiver<Outbound>>>,
}

impl Router {
    pub fn new() -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        Self {
            routes: DashMap::new(),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
        }
    }

    /// Queues an outbound message for which no response is expected
    /// (spec.md §4.B `Write`).
    pub async fn write(&self, out: Outbound) -> Result<(), ControllerError> {
        self.outbound_tx
            .send(out)
            .await
            .map_err(|_| ControllerError::RconClosed)
    }

    /// Registers a route for `out.identifier`, queues `out`, and returns a
    /// lazy stream of correlated `Inbound` messages. Fire-and-forget
    /// messages (`identifier == -1`) bypass the route map entirely — the
    /// router must not allocate a reply slot for them (spec.md §9).
    pub async fn request(
        &self,
        out: Outbound,
    ) -> Result<std::pin::Pin<Box<dyn Stream<Item = Inbound> + Send>>, ControllerError> {
        if out.identifier == UNCORRELATED_IDENTIFIER {
            self.write(out).await?;
            let (_tx, rx) = mpsc::channel::<Inbound>(1);
            return Ok(Box::pin(ReceiverStream::new(rx)));
        }

        let (tx, rx) = mpsc::channel(ROUTE_BUFFER);
        self.routes.insert(out.identifier, tx);
        self.write(out).await?;
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    /// Routes an inbound message to the waiting request. If no route
    /// exists, fails with `RoutingDne` — the caller logs (spec.md §4.B).
    pub async fn injest(&self, inbound: Inbound) -> Result<(), ControllerError> {
        match self.routes.get(&inbound.identifier) {
            Some(tx) => {
                let identifier = inbound.identifier;
                if tx.send(inbound).await.is_err() {
                    warn!(
                        "route for identifier dropped before delivery, closing stale route"
                    );
                    self.close_route(identifier);
                }
                Ok(())
            }
            None => Err(ControllerError::RoutingDne(inbound.identifier)),
        }
    }

    /// Removes a route; buffered items are dropped (spec.md §4.B).
    pub fn close_route(&self, identifier: i32) {
        self.routes.remove(&identifier);
    }

    /// Yields the single-consumer stream of queued outbounds to the write
    /// pump (spec.md §4.B `Outboundc`). May only be taken once.
    pub async fn outbound_consumer(&self) -> Option<mpsc::Receiver<Outbound>> {
        self.outbound_rx.lock().take()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}
