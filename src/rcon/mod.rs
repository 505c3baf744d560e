// src/rcon/mod.rs

//! The RCON transport: wire types (§6), the per-client request router
//! (§4.B), the WebSocket client and its command surface (§4.C), and the
//! ready-waiter (§4.D).

pub mod client;
pub mod protocol;
pub mod ready;
pub mod router;

pub use client::RconClient;
pub use protocol::{Inbound, Outbound};
pub use ready::until_ready;
pub use router::Router;
