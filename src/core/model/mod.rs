// src/core/model/mod.rs

//! The data model shared by every component: the polymorphic server state
//! (spec.md §3, §9 "Polymorphic server state") and the relations hanging
//! off a server (events, wipes, moderators, owners, VIPs).

mod event;
mod people;
mod server;
mod wipe;

pub use event::{Event, EventKind, Weekday};
pub use people::{Owner, Moderator, Vip};
pub use server::{
    ArchivedServer, DormantServer, LiveServer, Server, StateKind, WorldParams,
};
pub use wipe::{Wipe, WipeKind};
