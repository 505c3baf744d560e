// src/core/errors.rs

//! Defines the primary error type for the entire application.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the controller.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait
/// implementations, and lets callers pattern-match on the failure *kind* rather
/// than parsing a message.
#[derive(Error, Debug, Clone)]
pub enum ControllerError {
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("server does not exist: {0}")]
    ServerDne(uuid::Uuid),

    #[error("server {0} is not dormant")]
    ServerNotDormant(uuid::Uuid),

    #[error("server {0} is not live")]
    ServerNotLive(uuid::Uuid),

    #[error("server {0} is not archived")]
    ServerNotArchived(uuid::Uuid),

    #[error("wipe does not exist: {0}")]
    WipeDne(uuid::Uuid),

    #[error("validation error: {0}")]
    Validation(String),

    // --- RCON idempotent replies, recovered locally by the controller ---
    #[error("user {0} is already a moderator")]
    ModeratorExists(String),

    #[error("user {0} isn't a moderator")]
    ModeratorDne(String),

    #[error("user {0} is already an owner")]
    OwnerExists(String),

    #[error("user {0} isn't an owner")]
    OwnerDne(String),

    #[error("player {steamid} already has permission '{permission}'")]
    PermissionAlreadyGranted { steamid: String, permission: String },

    // --- RCON protocol errors, fatal for the call ---
    #[error("identifiers not equal: expected {expected}, got {got}")]
    IdentifiersNotEqual { expected: i32, got: i32 },

    #[error("inbound type unexpected: {0}")]
    InboundTypeUnexpected(String),

    #[error("unexpected inbound message: {0}")]
    UnexpectedInboundMessage(String),

    #[error("routing dne for identifier {0}")]
    RoutingDne(i32),

    #[error("rcon transport error: {0}")]
    RconTransport(String),

    #[error("rcon client closed")]
    RconClosed,

    // --- Transient, retried by callers ---
    #[error("dial error: {0}")]
    Dial(String),

    #[error("stream empty")]
    StreamEmpty,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    // --- Fatal, the owning task must terminate ---
    #[error("distributed lock refresh failed: {0}")]
    LockLost(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("instance manager error: {0}")]
    Instance(String),

    #[error("no instance manager configured for region '{0}'")]
    UnknownRegion(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ControllerError {
    /// True for the handful of RCON replies that the controller treats as a
    /// successful no-op rather than a failure (spec.md §4.C, §7).
    pub fn is_idempotent_reply(&self) -> bool {
        matches!(
            self,
            ControllerError::ModeratorExists(_)
                | ControllerError::ModeratorDne(_)
                | ControllerError::OwnerExists(_)
                | ControllerError::OwnerDne(_)
                | ControllerError::PermissionAlreadyGranted { .. }
        )
    }
}

impl From<std::io::Error> for ControllerError {
    fn from(e: std::io::Error) -> Self {
        ControllerError::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for ControllerError {
    fn from(e: serde_json::Error) -> Self {
        ControllerError::Internal(format!("JSON error: {e}"))
    }
}

impl From<url::ParseError> for ControllerError {
    fn from(e: url::ParseError) -> Self {
        ControllerError::Internal(format!("invalid URL: {e}"))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ControllerError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match &e {
            WsError::Io(io_err) if io_err.to_string().contains("dial") => {
                ControllerError::Dial(e.to_string())
            }
            WsError::ConnectionClosed | WsError::AlreadyClosed => ControllerError::RconClosed,
            _ => ControllerError::RconTransport(e.to_string()),
        }
    }
}

impl From<redis::RedisError> for ControllerError {
    fn from(e: redis::RedisError) -> Self {
        ControllerError::Store(e.to_string())
    }
}
