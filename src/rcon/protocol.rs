// src/rcon/protocol.rs

//! The RCON wire format (spec.md §6): JSON objects exchanged as WebSocket
//! text frames over `ws://<host>:28016/<rconPassword>`.

use serde::{Deserialize, Serialize};

/// A message the controller sends to a game server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outbound {
    #[serde(rename = "Identifier")]
    pub identifier: i32,
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "Name")]
    pub name: String,
}

/// The well-known `Name` field every outbound carries (spec.md §3).
pub const OUTBOUND_NAME: &str = "rustpm-controller";

/// Identifier reserved for fire-and-forget messages such as `say`
/// (spec.md §3, §6, §9 "RCON router's fire-and-forget path").
pub const UNCORRELATED_IDENTIFIER: i32 = -1;

impl Outbound {
    /// Builds a correlated outbound with a fresh, non-negative random
    /// identifier (spec.md §6: "`NewOutbound` picks a fresh random
    /// non-negative value").
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            identifier: rand::random::<u16>() as i32,
            message: message.into(),
            name: OUTBOUND_NAME.to_string(),
        }
    }

    /// Builds an uncorrelated, fire-and-forget outbound (`say`, spec.md §4.C).
    pub fn uncorrelated(message: impl Into<String>) -> Self {
        Self {
            identifier: UNCORRELATED_IDENTIFIER,
            message: message.into(),
            name: OUTBOUND_NAME.to_string(),
        }
    }
}

/// A message received from a game server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inbound {
    #[serde(rename = "Identifier")]
    pub identifier: i32,
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "Stacktrace", skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<String>,
}

/// The only response category spec.md §4.C requires the client to check:
/// every correlated reply must have `type == "Generic"`.
pub const GENERIC_TYPE: &str = "Generic";

impl Inbound {
    /// Validates a correlated reply against the request that solicited it
    /// (spec.md §4.C: "Every correlated reply must have matching
    /// identifier and type = 'Generic'").
    pub fn validate_correlated(
        &self,
        expected_identifier: i32,
    ) -> Result<(), crate::core::ControllerError> {
        if self.identifier != expected_identifier {
            return Err(crate::core::ControllerError::IdentifiersNotEqual {
                expected: expected_identifier,
                got: self.identifier,
            });
        }
        if self.kind != GENERIC_TYPE {
            return Err(crate::core::ControllerError::InboundTypeUnexpected(
                self.kind.clone(),
            ));
        }
        Ok(())
    }
}
