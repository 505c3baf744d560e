// src/director/mod.rs

//! Component H: the lone elected replica builds and runs the cron
//! schedule for every active event, plus the fixed per-minute capture
//! tick, rebuilding whenever notified or whenever it loses the lock
//! (spec.md §4.H).

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Utc};
use rand::random;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::controller::Controller;
use crate::core::events::{PubSub, REFRESH_SUBJECT};
use crate::core::lock::DistributedLock;
use crate::core::metrics;
use crate::core::model::{Event, EventKind, StateKind, Weekday, Wipe, WipeKind};
use crate::core::ControllerError;
use crate::store::ServerStore;

/// The fixed entry that runs alongside every event-derived one
/// (spec.md §4.H step 3, §8 "|E|+1 cron entries").
const CAPTURE_TICK: &str = "0 * * * * *";

pub struct Director {
    controller: Arc<Controller>,
    store: Arc<dyn ServerStore>,
    lock: Arc<DistributedLock>,
    pubsub: Arc<dyn PubSub>,
}

impl Director {
    pub fn new(
        controller: Arc<Controller>,
        store: Arc<dyn ServerStore>,
        lock: Arc<DistributedLock>,
        pubsub: Arc<dyn PubSub>,
    ) -> Self {
        Self {
            controller,
            store,
            lock,
            pubsub,
        }
    }

    /// Runs until `ctx` is cancelled, repeatedly acquiring the lock,
    /// scheduling, and rebuilding on refresh or lock loss (spec.md §4.H
    /// steps 1-4).
    pub async fn run(&self, ctx: CancellationToken) {
        while !ctx.is_cancelled() {
            let mut guard = tokio::select! {
                _ = ctx.cancelled() => return,
                result = self.lock.lock(ctx.clone()) => match result {
                    Ok(guard) => guard,
                    Err(e) => {
                        error!("director failed to acquire the distributed lock: {e}");
                        continue;
                    }
                }
            };

            let mut refresh_rx = match self.pubsub.subscribe(REFRESH_SUBJECT).await {
                Ok(rx) => rx,
                Err(e) => {
                    error!("director failed to subscribe to the refresh subject: {e}");
                    guard.unlock().await;
                    continue;
                }
            };

            info!("director acquired the lock");

            'schedule: loop {
                let mut scheduler = match self.build_schedule().await {
                    Ok(s) => s,
                    Err(e) => {
                        error!("director failed to build its schedule: {e}");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue 'schedule;
                    }
                };
                if let Err(e) = scheduler.start().await {
                    error!("director failed to start its scheduler: {e}");
                }

                tokio::select! {
                    _ = ctx.cancelled() => {
                        let _ = scheduler.shutdown().await;
                        guard.unlock().await;
                        return;
                    }
                    _ = guard.lost() => {
                        let _ = scheduler.shutdown().await;
                        warn!("director lost the lock; surrendering");
                        break 'schedule;
                    }
                    _ = refresh_rx.recv() => {
                        let _ = scheduler.shutdown().await;
                        info!("director refresh received; rebuilding schedule");
                        continue 'schedule;
                    }
                }
            }
        }
    }

    /// Lists active events, then schedules one cron entry per event plus
    /// the fixed capture-info tick (spec.md §4.H step 3, §8).
    async fn build_schedule(&self) -> Result<JobScheduler, ControllerError> {
        let events = self.store.list_active_server_events().await?;

        let mut scheduler = JobScheduler::new()
            .await
            .map_err(|e| ControllerError::Internal(format!("scheduler init failed: {e}")))?;

        let capture_controller = self.controller.clone();
        let capture_job = Job::new_async(CAPTURE_TICK, move |_uuid, _scheduler| {
            let controller = capture_controller.clone();
            Box::pin(async move {
                let task = controller.capture_server_info_task();
                controller.live_server_rcon_for_each(task).await;
            })
        })
        .map_err(|e| ControllerError::Internal(format!("capture job build failed: {e}")))?;
        scheduler
            .add(capture_job)
            .await
            .map_err(|e| ControllerError::Internal(format!("capture job schedule failed: {e}")))?;

        for event in &events {
            let expression = six_field(&event.cron_expression);
            let controller = self.controller.clone();
            let store = self.store.clone();
            let event = event.clone();
            let job = Job::new_async(expression.as_str(), move |_uuid, _scheduler| {
                let controller = controller.clone();
                let store = store.clone();
                let event = event.clone();
                Box::pin(async move {
                    let today = Weekday::from_chrono(Utc::now().weekday());
                    if !should_run_today(event.weekday_filter, today) {
                        return;
                    }
                    direct(&controller, &store, &event).await;
                })
            })
            .map_err(|e| ControllerError::Internal(format!("event job build failed: {e}")))?;
            scheduler
                .add(job)
                .await
                .map_err(|e| ControllerError::Internal(format!("event job schedule failed: {e}")))?;
        }

        metrics::SCHEDULED_CRON_ENTRIES.set((events.len() + 1) as f64);
        Ok(scheduler)
    }
}

/// `cron` (the `tokio-cron-scheduler` crate) expects a seconds-prefixed
/// six-field expression; stored events carry the standard five-field
/// form (spec.md §9).
fn six_field(expression: &str) -> String {
    format!("0 {expression}")
}

/// An event with no filter always fires; one with a filter only fires on
/// its named weekday (spec.md §9, out-of-band weekday filter).
fn should_run_today(filter: Option<Weekday>, today: Weekday) -> bool {
    filter.is_none_or(|f| f == today)
}

/// Dispatches one fired event by kind (spec.md §4.H `Direct`). Errors are
/// logged with event and server id; the scheduler keeps running
/// regardless (spec.md §7 "the director never propagates per-event
/// errors").
async fn direct(controller: &Controller, store: &Arc<dyn ServerStore>, event: &Event) {
    let ctx = CancellationToken::new();
    let result = match event.kind {
        EventKind::Start => controller.start_server(ctx, event.server_id).await.map(|_| ()),
        EventKind::Stop => controller.stop_server(event.server_id).await.map(|_| ()),
        EventKind::Live => controller.make_server_live(ctx, event.server_id).await.map(|_| ()),
        EventKind::MapWipe => wipe_live_server(controller, store, ctx, event.server_id, WipeKind::Map).await,
        EventKind::FullWipe => wipe_live_server(controller, store, ctx, event.server_id, WipeKind::Full).await,
    };

    let kind_label = event.kind.to_string();
    match result {
        Ok(()) => {
            metrics::DIRECTOR_DISPATCH_TOTAL
                .with_label_values(&[kind_label.as_str(), "success"])
                .inc();
        }
        Err(e) => {
            error!(event_id = %event.id, server_id = %event.server_id, "director dispatch failed: {e}");
            metrics::DIRECTOR_DISPATCH_TOTAL
                .with_label_values(&[kind_label.as_str(), "error"])
                .inc();
        }
    }
}

/// Stop (skipped if already dormant), queue the wipe, start (which
/// applies it), make live again (spec.md §4.H "wipe live server" path).
async fn wipe_live_server(
    controller: &Controller,
    store: &Arc<dyn ServerStore>,
    ctx: CancellationToken,
    server_id: Uuid,
    kind: WipeKind,
) -> Result<(), ControllerError> {
    let server = store.get_server(server_id).await?;
    if server.state_kind == StateKind::Live {
        controller.stop_server(server_id).await?;
    }

    let wipe = Wipe {
        id: Uuid::new_v4(),
        server_id,
        kind,
        seed: random(),
        salt: random(),
        created_at: Utc::now(),
        applied_at: None,
    };
    store.create_wipe(server_id, wipe).await?;

    controller.start_server(ctx.clone(), server_id).await?;
    controller.make_server_live(ctx, server_id).await?;
    Ok(())
}
