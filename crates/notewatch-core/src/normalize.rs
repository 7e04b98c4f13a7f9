//! Raw snapshot -> canonical snapshot.
//!
//! Naive provider timestamps are always resolved in the provider's offset,
//! never in the offset of the machine running the watcher.

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, Utc};
use thiserror::Error;

use crate::calendar::{next_abyss_reset, next_weekly_reset, server_time_to_utc};
use crate::snapshot::{
    CanonicalSnapshot, Commissions, Counter, Expedition, Expeditions, RawSnapshot, RawTime,
    Resource,
};

/// How far (in seconds) a recovery timestamp may lie before the fetch instant.
pub const CLOCK_SKEW_TOLERANCE_SECS: i64 = 300;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizationError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` has an unparseable timestamp `{value}`")]
    InvalidTimestamp { field: &'static str, value: String },
    #[error("field `{field}` has a negative duration ({seconds}s)")]
    NegativeDuration { field: &'static str, seconds: i64 },
    #[error("field `{field}` resolves to {at}, earlier than the fetch at {fetched_at} allows")]
    StaleTimestamp {
        field: &'static str,
        at: DateTime<Utc>,
        fetched_at: DateTime<Utc>,
    },
    #[error("field `{0}` must be greater than zero")]
    ZeroCapacity(&'static str),
    #[error("field `{field}` is out of range (`{value}`)")]
    OutOfRange { field: &'static str, value: String },
}

/// Parse offsets written as `UTC+9`, `UTC-05:00`, `+08:00`, `-0500` or `UTC`.
pub fn parse_utc_offset(input: &str) -> Option<FixedOffset> {
    let trimmed = input.trim();
    let upper = trimmed.to_ascii_uppercase();
    let rest = upper
        .strip_prefix("UTC")
        .or_else(|| upper.strip_prefix("GMT"))
        .unwrap_or(&upper);
    if rest.is_empty() || rest == "Z" {
        return FixedOffset::east_opt(0);
    }

    let (sign, digits) = match rest.as_bytes()[0] {
        b'+' => (1, &rest[1..]),
        b'-' => (-1, &rest[1..]),
        _ => return None,
    };
    if !digits.is_ascii() {
        return None;
    }
    let (hours, minutes) = match digits.split_once(':') {
        Some((h, m)) => (h.parse::<i32>().ok()?, m.parse::<i32>().ok()?),
        None if digits.len() == 4 => (digits[..2].parse().ok()?, digits[2..].parse().ok()?),
        None => (digits.parse().ok()?, 0),
    };
    if !(0..=14).contains(&hours) || !(0..60).contains(&minutes) {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Resolve one raw time value to an absolute instant.
fn resolve(
    field: &'static str,
    value: &RawTime,
    fetched_at: DateTime<Utc>,
    offset: FixedOffset,
) -> Result<DateTime<Utc>, NormalizationError> {
    let out_of_range = |value: String| NormalizationError::OutOfRange { field, value };
    let remaining = |seconds: i64| {
        if seconds < 0 {
            return Err(NormalizationError::NegativeDuration { field, seconds });
        }
        Duration::try_seconds(seconds)
            .and_then(|delta| fetched_at.checked_add_signed(delta))
            .ok_or_else(|| out_of_range(seconds.to_string()))
    };

    match value {
        RawTime::Seconds(seconds) => remaining(*seconds),
        RawTime::Remaining(parts) => remaining(
            parts
                .total_seconds()
                .ok_or_else(|| out_of_range(format!("{parts:?}")))?,
        ),
        RawTime::Text(text) => {
            let text = text.trim();
            let invalid = || NormalizationError::InvalidTimestamp {
                field,
                value: text.to_string(),
            };

            let digits = text.strip_prefix('-').unwrap_or(text);
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                return remaining(text.parse().map_err(|_| out_of_range(text.to_string()))?);
            }
            if let Ok(zoned) = DateTime::parse_from_rfc3339(text) {
                return Ok(zoned.with_timezone(&Utc));
            }
            NAIVE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
                .ok_or_else(invalid)
                .and_then(|naive| {
                    server_time_to_utc(naive, offset).ok_or_else(|| out_of_range(text.to_string()))
                })
        }
    }
}

fn resolve_checked(
    field: &'static str,
    value: &RawTime,
    fetched_at: DateTime<Utc>,
    offset: FixedOffset,
) -> Result<DateTime<Utc>, NormalizationError> {
    let at = resolve(field, value, fetched_at, offset)?;
    let earliest = fetched_at
        .checked_sub_signed(Duration::seconds(CLOCK_SKEW_TOLERANCE_SECS))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    if at < earliest {
        return Err(NormalizationError::StaleTimestamp {
            field,
            at,
            fetched_at,
        });
    }
    Ok(at)
}

fn resource(
    fields: [&'static str; 3],
    current: Option<u32>,
    max: Option<u32>,
    recovery: Option<&RawTime>,
    fetched_at: DateTime<Utc>,
    offset: FixedOffset,
) -> Result<Resource, NormalizationError> {
    let [current_field, max_field, recovery_field] = fields;
    let current = current.ok_or(NormalizationError::MissingField(current_field))?;
    let max = max.ok_or(NormalizationError::MissingField(max_field))?;
    if max == 0 {
        return Err(NormalizationError::ZeroCapacity(max_field));
    }
    let full_at = match recovery {
        Some(value) => resolve_checked(recovery_field, value, fetched_at, offset)?,
        None if current >= max => fetched_at,
        None => return Err(NormalizationError::MissingField(recovery_field)),
    };
    Ok(Resource {
        current,
        max,
        full_at,
    })
}

/// Convert a raw provider snapshot into a canonical one, resolving naive
/// timestamps in `offset`.
pub fn normalize(
    raw: &RawSnapshot,
    offset: FixedOffset,
) -> Result<CanonicalSnapshot, NormalizationError> {
    let fetched_at = raw.fetched_at;

    let resin = resource(
        ["current_resin", "max_resin", "resin_recovery_time"],
        raw.current_resin,
        raw.max_resin,
        raw.resin_recovery_time.as_ref(),
        fetched_at,
        offset,
    )?;

    let realm_currency = match (raw.current_realm_currency, raw.max_realm_currency) {
        // Realm currency is zero-capped until the teapot is unlocked.
        (Some(_), Some(0)) => None,
        (Some(current), Some(max)) => Some(resource(
            [
                "current_realm_currency",
                "max_realm_currency",
                "realm_currency_recovery_time",
            ],
            Some(current),
            Some(max),
            raw.realm_currency_recovery_time.as_ref(),
            fetched_at,
            offset,
        )?),
        _ => None,
    };

    let expeditions = match raw.max_expeditions {
        Some(max) => {
            let slots = raw
                .expeditions
                .iter()
                .map(|e| {
                    let completes_at = match &e.remaining_time {
                        Some(value) => resolve_checked(
                            "expeditions.remaining_time",
                            value,
                            fetched_at,
                            offset,
                        )?,
                        None => fetched_at,
                    };
                    Ok(Expedition {
                        character: e.character.clone(),
                        finished: e.finished || completes_at <= fetched_at,
                        completes_at,
                    })
                })
                .collect::<Result<Vec<_>, NormalizationError>>()?;
            Some(Expeditions { slots, max })
        }
        None if raw.expeditions.is_empty() => None,
        None => return Err(NormalizationError::MissingField("max_expeditions")),
    };

    let weekly_bosses = match (raw.remaining_resin_discounts, raw.max_resin_discounts) {
        (Some(remaining), Some(max)) => Some(Counter { remaining, max }),
        _ => None,
    };

    let commissions = match (raw.finished_commissions, raw.max_commissions) {
        (Some(finished), Some(total)) => Some(Commissions {
            finished,
            total,
            reward_claimed: raw.claimed_commission_reward.unwrap_or(false),
        }),
        _ => None,
    };

    let weekly_reset_at = match &raw.weekly_reset_time {
        Some(value) => resolve_checked("weekly_reset_time", value, fetched_at, offset)?,
        None => next_weekly_reset(fetched_at, offset),
    };
    let abyss_reset_at = match &raw.abyss_reset_time {
        Some(value) => resolve_checked("abyss_reset_time", value, fetched_at, offset)?,
        None => next_abyss_reset(fetched_at, offset),
    };

    Ok(CanonicalSnapshot {
        account: raw.account,
        fetched_at,
        server_offset_secs: offset.local_minus_utc(),
        resin,
        realm_currency,
        expeditions,
        weekly_bosses,
        commissions,
        weekly_reset_at,
        abyss_reset_at,
    })
}
