// src/server/http.rs

//! Component G's HTTP surface: a thin axum layer translating requests
//! into `Controller` calls and `ControllerError` kinds into status codes
//! (spec.md §6, §7). Async endpoints validate synchronously (so 404/409
//! are reported immediately) then run the remainder on a detached task
//! bound to the server's shutdown token (spec.md §6: "Async endpoints
//! (202) run the remainder on a detached task with an internal
//! deadline").

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rand::random;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use uuid::Uuid;

use crate::controller::{Controller, CreateServerInput};
use crate::core::ControllerError;
use crate::core::model::{
    ArchivedServer, DormantServer, Event, EventKind, LiveServer, StateKind, Weekday, WipeKind,
    WorldParams,
};
use crate::store::ServerChanges;

#[derive(Clone)]
struct AppState {
    controller: Arc<Controller>,
    shutdown: CancellationToken,
}

/// Builds the router described by spec.md §6's route table.
pub fn router(controller: Arc<Controller>, shutdown: CancellationToken) -> Router {
    let state = AppState { controller, shutdown };
    Router::new()
        .route("/v1/server", post(create_server).patch(update_server).delete(archive_server))
        .route("/v1/server/{id}", get(get_server))
        .route("/v1/server/start", post(start_server))
        .route("/v1/server/stop", post(stop_server))
        .route("/v1/server/wipe", post(wipe_server))
        .route("/v1/server/tags", post(tags))
        .route("/v1/server/events", post(events))
        .route("/v1/server/moderators", post(moderators))
        .route("/v1/server/owners", post(owners))
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ControllerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ControllerError::Validation(_) => StatusCode::BAD_REQUEST,
            ControllerError::ServerDne(_) | ControllerError::WipeDne(_) => StatusCode::NOT_FOUND,
            ControllerError::ServerNotDormant(_)
            | ControllerError::ServerNotLive(_)
            | ControllerError::ServerNotArchived(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

/// Logs a detached task's failure; there is no HTTP client left to
/// report it to by the time it would surface (spec.md §6, §7).
fn log_detached_failure<T>(op: &str, server_id: Uuid, result: Result<T, ControllerError>) {
    if let Err(e) = result {
        warn!(server_id = %server_id, "detached {op} failed: {e}");
    }
}

#[derive(Deserialize)]
struct CreateServerBody {
    name: String,
    region: String,
    instance_kind: String,
    world: WorldParams,
    rcon_password: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    banner_url: Option<String>,
    #[serde(default)]
    background_tag: Option<String>,
    #[serde(default)]
    options: Vec<(String, String)>,
    #[serde(default)]
    owner_steam_ids: Vec<String>,
    #[serde(default)]
    moderator_steam_ids: Vec<String>,
    #[serde(default)]
    tags: Vec<String>,
}

/// `POST /v1/server`. Validation (role, input shape) is the routing
/// collaborator's job per spec.md §6; the instance create itself runs
/// detached.
async fn create_server(State(state): State<AppState>, Json(body): Json<CreateServerBody>) -> StatusCode {
    let input = CreateServerInput {
        name: body.name,
        region: body.region,
        instance_kind: body.instance_kind,
        world: body.world,
        rcon_password: body.rcon_password,
        description: body.description,
        banner_url: body.banner_url,
        background_tag: body.background_tag,
        options: body.options,
        owner_steam_ids: body.owner_steam_ids,
        moderator_steam_ids: body.moderator_steam_ids,
        tags: body.tags,
    };
    let controller = state.controller.clone();
    tokio::spawn(async move {
        if let Err(e) = controller.create_server(input).await {
            error!("detached create_server failed: {e}");
        }
    });
    StatusCode::ACCEPTED
}

/// `GET /v1/server/{id}`. Returns whichever state row the server is
/// currently in.
async fn get_server(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ServerView>, ControllerError> {
    let server = state.controller.get_server(id).await?;
    let view = match server.state_kind {
        StateKind::Dormant => ServerView::Dormant(state.controller.get_dormant_server(id).await?),
        StateKind::Live => ServerView::Live(state.controller.get_live_server(id).await?),
        StateKind::Archived => ServerView::Archived(state.controller.get_archived_server(id).await?),
    };
    Ok(Json(view))
}

#[derive(Serialize)]
#[serde(untagged)]
enum ServerView {
    Dormant(DormantServer),
    Live(LiveServer),
    Archived(ArchivedServer),
}

#[derive(Deserialize)]
struct UpdateServerBody {
    id: Uuid,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    banner_url: Option<String>,
    #[serde(default)]
    background_tag: Option<String>,
    #[serde(default)]
    options: Option<Vec<(String, String)>>,
}

/// `PATCH /v1/server`. Synchronous: only scalar fields of a dormant row
/// change, which the store applies in one step.
async fn update_server(
    State(state): State<AppState>,
    Json(body): Json<UpdateServerBody>,
) -> Result<(StatusCode, Json<DormantServer>), ControllerError> {
    let changes = ServerChanges {
        name: body.name,
        description: body.description,
        banner_url: body.banner_url,
        background_tag: body.background_tag,
        options: body.options,
    };
    let dormant = state.controller.update_server(body.id, changes).await?;
    Ok((StatusCode::CREATED, Json(dormant)))
}

#[derive(Deserialize)]
struct ServerIdBody {
    server_id: Uuid,
}

/// `DELETE /v1/server`. Archival is one store transition; synchronous.
async fn archive_server(
    State(state): State<AppState>,
    Json(body): Json<ServerIdBody>,
) -> Result<(StatusCode, Json<ArchivedServer>), ControllerError> {
    state.controller.archive_server(body.server_id).await?;
    let archived = state.controller.get_archived_server(body.server_id).await?;
    Ok((StatusCode::CREATED, Json(archived)))
}

/// `POST /v1/server/start`. 404/409 are decided synchronously against
/// the current row; the instance boot and readiness wait run detached.
async fn start_server(
    State(state): State<AppState>,
    Json(body): Json<ServerIdBody>,
) -> Result<StatusCode, ControllerError> {
    state.controller.get_dormant_server(body.server_id).await?;
    let controller = state.controller.clone();
    let ctx = state.shutdown.child_token();
    let server_id = body.server_id;
    tokio::spawn(async move {
        log_detached_failure("start_server", server_id, controller.start_server(ctx, server_id).await);
    });
    Ok(StatusCode::ACCEPTED)
}

/// `POST /v1/server/stop`.
async fn stop_server(
    State(state): State<AppState>,
    Json(body): Json<ServerIdBody>,
) -> Result<StatusCode, ControllerError> {
    state.controller.get_live_server(body.server_id).await?;
    let controller = state.controller.clone();
    let server_id = body.server_id;
    tokio::spawn(async move {
        log_detached_failure("stop_server", server_id, controller.stop_server(server_id).await);
    });
    Ok(StatusCode::ACCEPTED)
}

#[derive(Deserialize)]
struct WipeServerBody {
    server_id: Uuid,
    kind: WipeKind,
    #[serde(default)]
    seed: Option<u32>,
    #[serde(default)]
    salt: Option<u32>,
}

/// `POST /v1/server/wipe`. Dormant wipes are a single persist step and
/// run synchronously (201); live wipes imply a stop/start cycle and run
/// detached (202).
async fn wipe_server(
    State(state): State<AppState>,
    Json(body): Json<WipeServerBody>,
) -> Result<StatusCode, ControllerError> {
    let server = state.controller.get_server(body.server_id).await?;
    let seed = body.seed.unwrap_or_else(random);
    let salt = body.salt.unwrap_or_else(random);

    match server.state_kind {
        StateKind::Dormant => {
            let ctx = state.shutdown.child_token();
            state.controller.wipe_server(ctx, body.server_id, body.kind, seed, salt).await?;
            Ok(StatusCode::CREATED)
        }
        StateKind::Live => {
            let controller = state.controller.clone();
            let ctx = state.shutdown.child_token();
            let server_id = body.server_id;
            let kind = body.kind;
            tokio::spawn(async move {
                log_detached_failure(
                    "wipe_server",
                    server_id,
                    controller.wipe_server(ctx, server_id, kind, seed, salt).await,
                );
            });
            Ok(StatusCode::ACCEPTED)
        }
        StateKind::Archived => Err(ControllerError::ServerNotDormant(body.server_id)),
    }
}

#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum TagsBody {
    Add { server_id: Uuid, tags: Vec<String> },
    Remove { server_id: Uuid, tags: Vec<String> },
}

/// `POST /v1/server/tags`. Persist-only; no RCON-visible effect.
async fn tags(State(state): State<AppState>, Json(body): Json<TagsBody>) -> Result<StatusCode, ControllerError> {
    match body {
        TagsBody::Add { server_id, tags } => {
            state.controller.add_server_tags(server_id, tags).await?;
            Ok(StatusCode::CREATED)
        }
        TagsBody::Remove { server_id, tags } => {
            state.controller.remove_server_tags(server_id, tags).await?;
            Ok(StatusCode::NO_CONTENT)
        }
    }
}

#[derive(Deserialize)]
struct EventInput {
    cron_expression: String,
    #[serde(default)]
    weekday_filter: Option<Weekday>,
    kind: EventKind,
}

#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum EventsBody {
    Add { server_id: Uuid, events: Vec<EventInput> },
    Remove { server_id: Uuid, event_ids: Vec<Uuid> },
}

/// `POST /v1/server/events`. Persisted, then the director is notified
/// so it rebuilds its cron schedule (spec.md §4.H).
async fn events(State(state): State<AppState>, Json(body): Json<EventsBody>) -> Result<StatusCode, ControllerError> {
    match body {
        EventsBody::Add { server_id, events } => {
            let events = events
                .into_iter()
                .map(|e| Event {
                    id: Uuid::new_v4(),
                    server_id,
                    cron_expression: e.cron_expression,
                    weekday_filter: e.weekday_filter,
                    kind: e.kind,
                })
                .collect();
            state.controller.add_server_events(server_id, events).await?;
            Ok(StatusCode::CREATED)
        }
        EventsBody::Remove { server_id, event_ids } => {
            state.controller.remove_server_events(server_id, event_ids).await?;
            Ok(StatusCode::NO_CONTENT)
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum MembershipBody {
    Add { server_id: Uuid, steam_ids: Vec<String> },
    Remove { server_id: Uuid, steam_ids: Vec<String> },
}

/// `POST /v1/server/moderators`. Persisted then pushed over RCON if the
/// server is live, ignoring idempotent-reply errors (spec.md §4.G).
async fn moderators(
    State(state): State<AppState>,
    Json(body): Json<MembershipBody>,
) -> Result<StatusCode, ControllerError> {
    match body {
        MembershipBody::Add { server_id, steam_ids } => {
            state.controller.add_server_moderators(server_id, steam_ids).await?;
            Ok(StatusCode::CREATED)
        }
        MembershipBody::Remove { server_id, steam_ids } => {
            state.controller.remove_server_moderators(server_id, steam_ids).await?;
            Ok(StatusCode::NO_CONTENT)
        }
    }
}

/// `POST /v1/server/owners`.
async fn owners(
    State(state): State<AppState>,
    Json(body): Json<MembershipBody>,
) -> Result<StatusCode, ControllerError> {
    match body {
        MembershipBody::Add { server_id, steam_ids } => {
            state.controller.add_server_owners(server_id, steam_ids).await?;
            Ok(StatusCode::CREATED)
        }
        MembershipBody::Remove { server_id, steam_ids } => {
            state.controller.remove_server_owners(server_id, steam_ids).await?;
            Ok(StatusCode::NO_CONTENT)
        }
    }
}
