//! Edge-triggered resin threshold alerts.
//!
//! Each configured level carries an armed flag. A level fires when the value
//! reaches it while unarmed, then stays quiet until it is re-armed according
//! to the [`RearmPolicy`].
//!
//! ```text
//!            value >= level (emit)
//!   Unarmed ─────────────────────────► Armed
//!      ▲                                 │
//!      └──── value < level (on-drop) ────┤
//!      └──── server day rolls (daily) ───┘
//! ```
//!
//! The very first evaluation only records which levels are already reached.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use notewatch_core::calendar::server_day;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Value(u32),
    /// Value at or above the resource cap. Always the highest level.
    Full,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertLevel::Value(v) => write!(f, "{v}"),
            AlertLevel::Full => f.write_str("full"),
        }
    }
}

impl AlertLevel {
    fn reached(self, value: u32, max: u32) -> bool {
        match self {
            AlertLevel::Value(threshold) => value >= threshold,
            AlertLevel::Full => value >= max,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RearmPolicy {
    /// Re-arm once the value drops back below the level.
    #[default]
    OnDrop,
    /// Re-arm at the daily server reset; drops do not re-arm.
    Daily,
    /// Fire at most once per process.
    Once,
}

impl FromStr for RearmPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on-drop" | "on_drop" | "drop" | "hysteresis" => Ok(RearmPolicy::OnDrop),
            "daily" | "day" => Ok(RearmPolicy::Daily),
            "once" | "one-shot" => Ok(RearmPolicy::Once),
            other => Err(format!("unknown re-arm policy `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ThresholdError {
    #[error("no alert levels configured")]
    Empty,
    #[error("thresholds must be strictly ascending ({previous} then {next})")]
    NotAscending { previous: u32, next: u32 },
    #[error("threshold must be greater than zero")]
    Zero,
}

/// Validated, strictly ascending levels with `Full` last when enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thresholds {
    levels: Vec<AlertLevel>,
}

impl Thresholds {
    pub fn new(values: &[u32], alert_on_full: bool) -> Result<Self, ThresholdError> {
        if values.contains(&0) {
            return Err(ThresholdError::Zero);
        }
        for pair in values.windows(2) {
            if pair[1] <= pair[0] {
                return Err(ThresholdError::NotAscending {
                    previous: pair[0],
                    next: pair[1],
                });
            }
        }
        let mut levels: Vec<_> = values.iter().copied().map(AlertLevel::Value).collect();
        if alert_on_full {
            levels.push(AlertLevel::Full);
        }
        if levels.is_empty() {
            return Err(ThresholdError::Empty);
        }
        Ok(Self { levels })
    }

    pub fn levels(&self) -> &[AlertLevel] {
        &self.levels
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertEvent {
    pub level: AlertLevel,
    pub value: u32,
    pub max: u32,
    pub at: DateTime<Utc>,
}

/// Per-process alert memory. Only [`AlertEngine::evaluate`] mutates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertState {
    initialized: bool,
    armed: Vec<bool>,
    day: Option<NaiveDate>,
}

impl AlertState {
    fn new(levels: usize) -> Self {
        Self {
            initialized: false,
            armed: vec![false; levels],
            day: None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn armed(&self) -> &[bool] {
        &self.armed
    }
}

#[derive(Debug, Clone)]
pub struct AlertEngine {
    thresholds: Thresholds,
    rearm: RearmPolicy,
    server_offset: FixedOffset,
    state: AlertState,
}

impl AlertEngine {
    pub fn new(thresholds: Thresholds, rearm: RearmPolicy, server_offset: FixedOffset) -> Self {
        let state = AlertState::new(thresholds.levels().len());
        Self {
            thresholds,
            rearm,
            server_offset,
            state,
        }
    }

    pub fn state(&self) -> &AlertState {
        &self.state
    }

    /// Feed one observation; returns the levels crossed into, lowest first.
    pub fn evaluate(&mut self, value: u32, max: u32, at: DateTime<Utc>) -> Vec<AlertEvent> {
        let levels = self.thresholds.levels();
        let today = server_day(at, self.server_offset);

        if !self.state.initialized {
            for (armed, level) in self.state.armed.iter_mut().zip(levels) {
                *armed = level.reached(value, max);
            }
            self.state.initialized = true;
            self.state.day = Some(today);
            return Vec::new();
        }

        if self.rearm == RearmPolicy::Daily && self.state.day != Some(today) {
            self.state.armed.iter_mut().for_each(|armed| *armed = false);
        }
        self.state.day = Some(today);

        let mut events = Vec::new();
        for (armed, level) in self.state.armed.iter_mut().zip(levels) {
            if level.reached(value, max) {
                if !*armed {
                    *armed = true;
                    events.push(AlertEvent {
                        level: *level,
                        value,
                        max,
                        at,
                    });
                }
            } else if self.rearm == RearmPolicy::OnDrop {
                *armed = false;
            }
        }
        events
    }
}
