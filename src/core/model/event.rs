// src/core/model/event.rs

//! Cron-scheduled lifecycle events (spec.md §3 "Event", §4.H).

use serde::{Deserialize, Serialize};
use strum_macros::Display;
use uuid::Uuid;

/// The kind of lifecycle transition a fired `Event` requests (spec.md §3, §4.H).
///
/// `Display` backs the metrics label (director dispatch counters); it uses
/// the same kebab-case rendering as the wire representation below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum EventKind {
    Start,
    Stop,
    Live,
    MapWipe,
    FullWipe,
}

/// An ISO weekday, used only for the out-of-band weekday filter described
/// in spec.md §9 ("the underlying expressions are day-of-month-based").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub fn from_chrono(d: chrono::Weekday) -> Self {
        match d {
            chrono::Weekday::Mon => Weekday::Monday,
            chrono::Weekday::Tue => Weekday::Tuesday,
            chrono::Weekday::Wed => Weekday::Wednesday,
            chrono::Weekday::Thu => Weekday::Thursday,
            chrono::Weekday::Fri => Weekday::Friday,
            chrono::Weekday::Sat => Weekday::Saturday,
            chrono::Weekday::Sun => Weekday::Sunday,
        }
    }
}

/// A single scheduled lifecycle event, owned by one server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub server_id: Uuid,
    /// A standard five-field cron expression (spec.md §9).
    pub cron_expression: String,
    pub weekday_filter: Option<Weekday>,
    pub kind: EventKind,
}
