//! Raw provider snapshots and their canonical, timezone-resolved form.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// Game server region. Each region runs on a fixed UTC offset (no DST).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    America,
    Europe,
    Asia,
    Cht,
}

impl Region {
    /// Provider-side server identifier used in daily-note requests.
    pub fn server_id(self) -> &'static str {
        match self {
            Region::America => "os_usa",
            Region::Europe => "os_euro",
            Region::Asia => "os_asia",
            Region::Cht => "os_cht",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Region::America => "America",
            Region::Europe => "Europe",
            Region::Asia => "Asia",
            Region::Cht => "TW/HK/MO",
        }
    }

    pub fn utc_offset(self) -> FixedOffset {
        let hours = match self {
            Region::America => -5,
            Region::Europe => 1,
            Region::Asia | Region::Cht => 8,
        };
        FixedOffset::east_opt(hours * 3600).expect("region offsets are within a day")
    }

    /// Infer the region from a UID: everything but the last eight digits is
    /// the server prefix.
    pub fn from_uid(uid: u64) -> Option<Self> {
        let text = uid.to_string();
        if text.len() <= 8 {
            return None;
        }
        match &text[..text.len() - 8] {
            "6" => Some(Region::America),
            "7" => Some(Region::Europe),
            "8" | "18" => Some(Region::Asia),
            "9" => Some(Region::Cht),
            _ => None,
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "america" | "na" | "us" | "os_usa" => Ok(Region::America),
            "europe" | "eu" | "os_euro" => Ok(Region::Europe),
            "asia" | "os_asia" => Ok(Region::Asia),
            "cht" | "tw" | "hk" | "mo" | "os_cht" => Ok(Region::Cht),
            other => Err(format!("unknown region `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRef {
    pub uid: u64,
    pub region: Region,
}

/// A provider time value. Providers report recovery times either as
/// timestamps (with or without an explicit zone) or as time remaining.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTime {
    /// Seconds remaining from the fetch instant.
    Seconds(i64),
    /// `{Day, Hour, Minute, Second}` remaining from the fetch instant.
    Remaining(RawRemaining),
    /// RFC 3339 timestamp, naive provider-local timestamp, or a digit string
    /// of seconds remaining.
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRemaining {
    #[serde(rename = "Day", default)]
    pub day: i64,
    #[serde(rename = "Hour", default)]
    pub hour: i64,
    #[serde(rename = "Minute", default)]
    pub minute: i64,
    #[serde(rename = "Second", default)]
    pub second: i64,
}

impl RawRemaining {
    /// `None` on overflow.
    pub fn total_seconds(&self) -> Option<i64> {
        self.day
            .checked_mul(86_400)?
            .checked_add(self.hour.checked_mul(3_600)?)?
            .checked_add(self.minute.checked_mul(60)?)?
            .checked_add(self.second)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawExpedition {
    #[serde(default)]
    pub character: Option<String>,
    #[serde(default)]
    pub finished: bool,
    #[serde(default)]
    pub remaining_time: Option<RawTime>,
}

/// Snapshot as handed over by a status provider. Only resin is required;
/// everything else is optional and simply omitted downstream when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSnapshot {
    pub account: AccountRef,
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub current_resin: Option<u32>,
    #[serde(default)]
    pub max_resin: Option<u32>,
    #[serde(default)]
    pub resin_recovery_time: Option<RawTime>,
    #[serde(default)]
    pub expeditions: Vec<RawExpedition>,
    #[serde(default)]
    pub max_expeditions: Option<u32>,
    #[serde(default)]
    pub current_realm_currency: Option<u32>,
    #[serde(default)]
    pub max_realm_currency: Option<u32>,
    #[serde(default)]
    pub realm_currency_recovery_time: Option<RawTime>,
    #[serde(default)]
    pub remaining_resin_discounts: Option<u32>,
    #[serde(default)]
    pub max_resin_discounts: Option<u32>,
    #[serde(default)]
    pub weekly_reset_time: Option<RawTime>,
    #[serde(default)]
    pub finished_commissions: Option<u32>,
    #[serde(default)]
    pub max_commissions: Option<u32>,
    #[serde(default)]
    pub claimed_commission_reward: Option<bool>,
    #[serde(default)]
    pub abyss_reset_time: Option<RawTime>,
}

impl RawSnapshot {
    /// Empty snapshot for `account`; providers fill in what they know.
    pub fn new(account: AccountRef, fetched_at: DateTime<Utc>) -> Self {
        Self {
            account,
            fetched_at,
            current_resin: None,
            max_resin: None,
            resin_recovery_time: None,
            expeditions: Vec::new(),
            max_expeditions: None,
            current_realm_currency: None,
            max_realm_currency: None,
            realm_currency_recovery_time: None,
            remaining_resin_discounts: None,
            max_resin_discounts: None,
            weekly_reset_time: None,
            finished_commissions: None,
            max_commissions: None,
            claimed_commission_reward: None,
            abyss_reset_time: None,
        }
    }
}

/// A regenerating resource with a cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub current: u32,
    pub max: u32,
    pub full_at: DateTime<Utc>,
}

impl Resource {
    pub fn is_full(&self) -> bool {
        self.current >= self.max
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expedition {
    pub character: Option<String>,
    pub finished: bool,
    pub completes_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expeditions {
    pub slots: Vec<Expedition>,
    pub max: u32,
}

impl Expeditions {
    /// Instant the last dispatched expedition returns.
    pub fn all_back_at(&self) -> Option<DateTime<Utc>> {
        self.slots.iter().map(|s| s.completes_at).max()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    pub remaining: u32,
    pub max: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commissions {
    pub finished: u32,
    pub total: u32,
    pub reward_claimed: bool,
}

/// Validated snapshot whose timestamps are all absolute UTC instants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalSnapshot {
    pub account: AccountRef,
    pub fetched_at: DateTime<Utc>,
    /// Offset the provider's naive timestamps were resolved in.
    pub server_offset_secs: i32,
    pub resin: Resource,
    pub realm_currency: Option<Resource>,
    pub expeditions: Option<Expeditions>,
    pub weekly_bosses: Option<Counter>,
    pub commissions: Option<Commissions>,
    pub weekly_reset_at: DateTime<Utc>,
    pub abyss_reset_at: DateTime<Utc>,
}

impl CanonicalSnapshot {
    pub fn server_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.server_offset_secs).unwrap_or_else(|| self.account.region.utc_offset())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_is_inferred_from_uid_prefix() {
        assert_eq!(Region::from_uid(612_345_678), Some(Region::America));
        assert_eq!(Region::from_uid(712_345_678), Some(Region::Europe));
        assert_eq!(Region::from_uid(812_345_678), Some(Region::Asia));
        assert_eq!(Region::from_uid(1_812_345_678), Some(Region::Asia));
        assert_eq!(Region::from_uid(912_345_678), Some(Region::Cht));
        assert_eq!(Region::from_uid(112_345_678), None);
        assert_eq!(Region::from_uid(1234), None);
    }

    #[test]
    fn raw_time_accepts_provider_shapes() {
        let secs: RawTime = serde_json::from_str("3600").unwrap();
        assert_eq!(secs, RawTime::Seconds(3600));

        let text: RawTime = serde_json::from_str("\"3600\"").unwrap();
        assert_eq!(text, RawTime::Text("3600".into()));

        let map: RawTime = serde_json::from_str(r#"{"Day":1,"Hour":2}"#).unwrap();
        match map {
            RawTime::Remaining(r) => assert_eq!(r.total_seconds(), Some(86_400 + 7_200)),
            other => panic!("expected remaining map, got {other:?}"),
        }
    }

    #[test]
    fn region_parses_aliases() {
        assert_eq!("NA".parse::<Region>().unwrap(), Region::America);
        assert_eq!("os_euro".parse::<Region>().unwrap(), Region::Europe);
        assert!("mars".parse::<Region>().is_err());
    }
}
