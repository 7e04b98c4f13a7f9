//! Human-facing values computed from a canonical snapshot and "now".

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::snapshot::{CanonicalSnapshot, Resource};

pub const FULL_LABEL: &str = "full";
pub const DONE_LABEL: &str = "done";
pub const NOW_LABEL: &str = "now";

/// Time until a resource caps out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "remaining", rename_all = "snake_case")]
pub enum Eta {
    /// Already at or above the cap.
    Full,
    /// Time remaining until the cap; zero when the recovery time has passed.
    In(Duration),
}

impl Eta {
    fn of(resource: &Resource, now: DateTime<Utc>) -> Self {
        if resource.is_full() {
            Eta::Full
        } else {
            Eta::In(until(resource.full_at, now))
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Eta::Full)
    }

    pub fn label(&self) -> String {
        match self {
            Eta::Full => FULL_LABEL.to_string(),
            Eta::In(remaining) => format_remaining(*remaining, FULL_LABEL),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExpeditionProgress {
    pub finished: u32,
    pub dispatched: u32,
    pub max: u32,
    /// Finished / dispatched, 0.0 when nothing is dispatched.
    pub ratio: f64,
    pub all_back_in: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedState {
    pub computed_at: DateTime<Utc>,
    pub resin_eta: Eta,
    pub realm_currency_eta: Option<Eta>,
    pub expeditions: Option<ExpeditionProgress>,
    pub weekly_reset_in: Duration,
    pub abyss_reset_in: Duration,
}

fn until(at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO)
}

/// Render a duration as `{h}h {m}m`, or `done_label` when under a minute.
pub fn format_remaining(remaining: Duration, done_label: &str) -> String {
    let minutes = remaining.as_secs() / 60;
    if minutes == 0 {
        return done_label.to_string();
    }
    format!("{}h {}m", minutes / 60, minutes % 60)
}

pub fn derive(snapshot: &CanonicalSnapshot, now: DateTime<Utc>) -> DerivedState {
    let expeditions = snapshot.expeditions.as_ref().map(|e| {
        let dispatched = e.slots.len() as u32;
        let finished = e
            .slots
            .iter()
            .filter(|slot| slot.finished || slot.completes_at <= now)
            .count() as u32;
        let ratio = if dispatched == 0 {
            0.0
        } else {
            f64::from(finished) / f64::from(dispatched)
        };
        ExpeditionProgress {
            finished,
            dispatched,
            max: e.max,
            ratio,
            all_back_in: e.all_back_at().map(|at| until(at, now)).unwrap_or_default(),
        }
    });

    DerivedState {
        computed_at: now,
        resin_eta: Eta::of(&snapshot.resin, now),
        realm_currency_eta: snapshot.realm_currency.as_ref().map(|r| Eta::of(r, now)),
        expeditions,
        weekly_reset_in: until(snapshot.weekly_reset_at, now),
        abyss_reset_in: until(snapshot.abyss_reset_at, now),
    }
}
