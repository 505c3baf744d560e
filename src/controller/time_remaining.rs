// src/controller/time_remaining.rs

//! `SayServerTimeRemaining` (spec.md §4.G, §8 "Boundary behaviors"):
//! finds the next `stop` event for a server and phrases the remaining
//! interval in the grammar spec.md's boundary table enumerates.

use chrono::{DateTime, Datelike, Utc};
use cron::Schedule;
use std::str::FromStr;

use crate::core::model::{Event, EventKind, Weekday};

/// Finds the earliest future fire time among `events` whose kind is
/// `Stop`, honoring each event's weekday filter (spec.md §4.G).
pub fn next_stop_at(events: &[Event], now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    events
        .iter()
        .filter(|e| e.kind == EventKind::Stop)
        .filter_map(|e| next_fire_respecting_weekday(e, now))
        .min()
}

fn next_fire_respecting_weekday(event: &Event, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let expression = six_field(&event.cron_expression);
    let schedule = Schedule::from_str(&expression).ok()?;
    schedule
        .after(&now)
        .filter(|candidate| match event.weekday_filter {
            Some(filter) => Weekday::from_chrono(candidate.weekday()) == filter,
            None => true,
        })
        .take(366) // one year of daily candidates is enough to find a weekday match
        .next()
}

/// `cron` (like most Rust cron crates) expects a seconds-prefixed
/// six-field expression; spec.md §3/§9 events carry the standard
/// five-field form.
fn six_field(expression: &str) -> String {
    format!("0 {expression}")
}

/// Renders the grammar spec.md §8 enumerates: "1 hour" vs "2 hours", "1
/// minute" vs "2 minutes", joined with " and " only when both are
/// nonzero.
fn format_remaining(total_minutes: i64) -> String {
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;

    let hour_part = match hours {
        0 => None,
        1 => Some("1 hour".to_string()),
        h => Some(format!("{h} hours")),
    };
    let minute_part = match minutes {
        0 => None,
        1 => Some("1 minute".to_string()),
        m => Some(format!("{m} minutes")),
    };

    match (hour_part, minute_part) {
        (Some(h), Some(m)) => format!("{h} and {m}"),
        (Some(h), None) => h,
        (None, Some(m)) => m,
        (None, None) => "0 minutes".to_string(),
    }
}

/// The full message `SayServerTimeRemaining` sends (spec.md §4.G).
pub fn message(server_name: &str, remaining: chrono::Duration) -> String {
    let total_minutes = (remaining.num_seconds() as f64 / 60.0).round() as i64;
    format!(
        "{server_name} will be going offline in {}. Visit rustpm.com for more scheduling information.",
        format_remaining(total_minutes)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_grammar_matches_spec_table() {
        assert_eq!(format_remaining(1), "1 minute");
        assert_eq!(format_remaining(30), "30 minutes");
        assert_eq!(format_remaining(60), "1 hour");
        assert_eq!(format_remaining(90), "1 hour and 30 minutes");
        assert_eq!(format_remaining(120), "2 hours");
        assert_eq!(format_remaining(121), "2 hours and 1 minute");
    }

    #[test]
    fn message_wraps_grammar_with_server_name_and_boilerplate() {
        let msg = message("Rustpm US-West", chrono::Duration::minutes(90));
        assert_eq!(
            msg,
            "Rustpm US-West will be going offline in 1 hour and 30 minutes. Visit rustpm.com for more scheduling information."
        );
    }

    #[test]
    fn weekday_filter_excludes_events_on_other_days() {
        let now = DateTime::parse_from_rfc3339("2026-08-03T00:00:00Z").unwrap().with_timezone(&Utc); // a Monday
        let event = Event {
            id: uuid::Uuid::new_v4(),
            server_id: uuid::Uuid::new_v4(),
            cron_expression: "0 12 * * *".into(),
            weekday_filter: Some(Weekday::Thursday),
            kind: EventKind::Stop,
        };
        let next = next_stop_at(&[event], now).unwrap();
        assert_eq!(Weekday::from_chrono(next.weekday()), Weekday::Thursday);
    }
}
