//! Layered settings (defaults <- YAML file <- environment) resolved into one
//! immutable [`MonitorConfig`].

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::FixedOffset;
use notewatch_adapters::HoyolabCredentials;
use notewatch_core::{parse_utc_offset, AccountRef, Region};
use serde::Deserialize;
use thiserror::Error;

use crate::alert::{RearmPolicy, ThresholdError, Thresholds};

pub const DEFAULT_THRESHOLDS: &[u32] = &[120, 160];
pub const MAX_SCHEDULE_MINUTES: u64 = 7 * 24 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("invalid resin alert thresholds: {0}")]
    Thresholds(#[from] ThresholdError),
    #[error("reading config file {path}: {message}")]
    File { path: PathBuf, message: String },
}

/// Raw, partially-filled settings from one layer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub ltoken_v2: Option<String>,
    pub ltuid_v2: Option<String>,
    pub uid: Option<u64>,
    pub region: Option<String>,
    pub provider_tz: Option<String>,
    pub provider_endpoint: Option<String>,
    pub fixture_path: Option<PathBuf>,
    pub slack_webhook_url: Option<String>,
    pub schedule_minutes: Option<u64>,
    pub report_every: Option<u32>,
    pub post_on_start: Option<bool>,
    pub resin_alert_thresholds: Option<Vec<u32>>,
    pub resin_alert_full: Option<bool>,
    pub resin_alert_rearm: Option<String>,
    pub fetch_timeout_secs: Option<u64>,
    pub delivery_timeout_secs: Option<u64>,
    pub failure_notice_after: Option<u32>,
    pub user_agent: Option<String>,
    pub admin_addr: Option<String>,
}

fn parse_env<T: std::str::FromStr>(
    key: &'static str,
    value: Option<String>,
) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .map(|v| {
            v.trim().parse::<T>().map_err(|err| ConfigError::Invalid {
                key,
                reason: format!("`{v}`: {err}"),
            })
        })
        .transpose()
}

fn parse_flag(key: &'static str, value: Option<String>) -> Result<Option<bool>, ConfigError> {
    value
        .map(|v| match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                key,
                reason: format!("`{v}` is not a boolean"),
            }),
        })
        .transpose()
}

/// `"120, 160"` -> `[120, 160]`; empty entries are skipped.
pub fn parse_thresholds(input: &str) -> Result<Vec<u32>, ConfigError> {
    input
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u32>().map_err(|err| ConfigError::Invalid {
                key: "RESIN_ALERT_THRESHOLDS",
                reason: format!("`{part}`: {err}"),
            })
        })
        .collect()
}

impl Settings {
    /// Read settings from environment-style key lookups.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let schedule_minutes = match parse_env::<u64>("SCHEDULE_MINUTES", get("SCHEDULE_MINUTES"))? {
            Some(minutes) => Some(minutes),
            None => parse_env::<u64>("SCHEDULE_HOURS", get("SCHEDULE_HOURS"))?
                .map(|hours| {
                    hours.checked_mul(60).ok_or_else(|| ConfigError::Invalid {
                        key: "SCHEDULE_HOURS",
                        reason: format!("{hours} hours is out of range"),
                    })
                })
                .transpose()?,
        };

        Ok(Self {
            ltoken_v2: get("LTOKEN_V2"),
            ltuid_v2: get("LTUID_V2"),
            uid: parse_env("GENSHIN_UID", get("GENSHIN_UID"))?,
            region: get("GENSHIN_REGION"),
            provider_tz: get("PROVIDER_TZ"),
            provider_endpoint: get("HOYOLAB_ENDPOINT"),
            fixture_path: get("NOTEWATCH_FIXTURE").map(PathBuf::from),
            slack_webhook_url: get("SLACK_WEBHOOK_URL"),
            schedule_minutes,
            report_every: parse_env("REPORT_EVERY", get("REPORT_EVERY"))?,
            post_on_start: parse_flag("POST_ON_START", get("POST_ON_START"))?,
            resin_alert_thresholds: get("RESIN_ALERT_THRESHOLDS")
                .map(|v| parse_thresholds(&v))
                .transpose()?,
            resin_alert_full: parse_flag("RESIN_ALERT_FULL", get("RESIN_ALERT_FULL"))?,
            resin_alert_rearm: get("RESIN_ALERT_REARM"),
            fetch_timeout_secs: parse_env("FETCH_TIMEOUT_SECS", get("FETCH_TIMEOUT_SECS"))?,
            delivery_timeout_secs: parse_env("DELIVERY_TIMEOUT_SECS", get("DELIVERY_TIMEOUT_SECS"))?,
            failure_notice_after: parse_env("FAILURE_NOTICE_AFTER", get("FAILURE_NOTICE_AFTER"))?,
            user_agent: get("NOTEWATCH_USER_AGENT"),
            admin_addr: get("NOTEWATCH_ADMIN_ADDR"),
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let file_error = |message: String| ConfigError::File {
            path: path.to_path_buf(),
            message,
        };
        let text = std::fs::read_to_string(path).map_err(|err| file_error(err.to_string()))?;
        serde_yaml::from_str(&text).map_err(|err| file_error(err.to_string()))
    }

    /// Values set in `over` win.
    pub fn overlay(self, over: Settings) -> Settings {
        Settings {
            ltoken_v2: over.ltoken_v2.or(self.ltoken_v2),
            ltuid_v2: over.ltuid_v2.or(self.ltuid_v2),
            uid: over.uid.or(self.uid),
            region: over.region.or(self.region),
            provider_tz: over.provider_tz.or(self.provider_tz),
            provider_endpoint: over.provider_endpoint.or(self.provider_endpoint),
            fixture_path: over.fixture_path.or(self.fixture_path),
            slack_webhook_url: over.slack_webhook_url.or(self.slack_webhook_url),
            schedule_minutes: over.schedule_minutes.or(self.schedule_minutes),
            report_every: over.report_every.or(self.report_every),
            post_on_start: over.post_on_start.or(self.post_on_start),
            resin_alert_thresholds: over.resin_alert_thresholds.or(self.resin_alert_thresholds),
            resin_alert_full: over.resin_alert_full.or(self.resin_alert_full),
            resin_alert_rearm: over.resin_alert_rearm.or(self.resin_alert_rearm),
            fetch_timeout_secs: over.fetch_timeout_secs.or(self.fetch_timeout_secs),
            delivery_timeout_secs: over.delivery_timeout_secs.or(self.delivery_timeout_secs),
            failure_notice_after: over.failure_notice_after.or(self.failure_notice_after),
            user_agent: over.user_agent.or(self.user_agent),
            admin_addr: over.admin_addr.or(self.admin_addr),
        }
    }

    pub fn resolve(self) -> Result<MonitorConfig, ConfigError> {
        let uid = self.uid.ok_or(ConfigError::Missing("GENSHIN_UID"))?;
        let region = match &self.region {
            Some(region) => region.parse::<Region>().map_err(|reason| ConfigError::Invalid {
                key: "GENSHIN_REGION",
                reason,
            })?,
            None => Region::from_uid(uid).ok_or_else(|| ConfigError::Invalid {
                key: "GENSHIN_REGION",
                reason: format!("cannot infer the server region from uid {uid}; set it explicitly"),
            })?,
        };
        let provider_offset = match &self.provider_tz {
            Some(tz) => parse_utc_offset(tz).ok_or_else(|| ConfigError::Invalid {
                key: "PROVIDER_TZ",
                reason: format!("`{tz}` is not a UTC offset such as UTC+8 or -05:00"),
            })?,
            None => region.utc_offset(),
        };

        let source = match self.fixture_path {
            Some(path) => ProviderSource::Fixture(path),
            None => ProviderSource::Hoyolab {
                endpoint: self.provider_endpoint,
                credentials: HoyolabCredentials {
                    ltoken_v2: self.ltoken_v2.ok_or(ConfigError::Missing("LTOKEN_V2"))?,
                    ltuid_v2: self.ltuid_v2.ok_or(ConfigError::Missing("LTUID_V2"))?,
                },
            },
        };

        let positive = |key: &'static str, value: u64| {
            if value == 0 {
                Err(ConfigError::Invalid {
                    key,
                    reason: "must be greater than zero".to_string(),
                })
            } else {
                Ok(value)
            }
        };
        let schedule_minutes = positive("SCHEDULE_MINUTES", self.schedule_minutes.unwrap_or(60))?;
        if schedule_minutes > MAX_SCHEDULE_MINUTES {
            return Err(ConfigError::Invalid {
                key: "SCHEDULE_MINUTES",
                reason: format!("{schedule_minutes} minutes exceeds the one-week maximum"),
            });
        }
        let report_every = positive("REPORT_EVERY", u64::from(self.report_every.unwrap_or(1)))?;
        let fetch_timeout = positive("FETCH_TIMEOUT_SECS", self.fetch_timeout_secs.unwrap_or(20))?;
        let delivery_timeout =
            positive("DELIVERY_TIMEOUT_SECS", self.delivery_timeout_secs.unwrap_or(20))?;

        let thresholds = Thresholds::new(
            self.resin_alert_thresholds
                .as_deref()
                .unwrap_or(DEFAULT_THRESHOLDS),
            self.resin_alert_full.unwrap_or(true),
        )?;
        let rearm = match &self.resin_alert_rearm {
            Some(policy) => policy.parse::<RearmPolicy>().map_err(|reason| ConfigError::Invalid {
                key: "RESIN_ALERT_REARM",
                reason,
            })?,
            None => RearmPolicy::default(),
        };

        let admin_addr = self
            .admin_addr
            .map(|addr| {
                addr.parse::<SocketAddr>().map_err(|err| ConfigError::Invalid {
                    key: "NOTEWATCH_ADMIN_ADDR",
                    reason: format!("`{addr}`: {err}"),
                })
            })
            .transpose()?;

        Ok(MonitorConfig {
            account: AccountRef { uid, region },
            provider_offset,
            source,
            slack_webhook_url: self.slack_webhook_url,
            poll_interval: Duration::from_secs(schedule_minutes * 60),
            report_every: report_every as u32,
            report_on_start: self.post_on_start.unwrap_or(true),
            thresholds,
            rearm,
            fetch_timeout: Duration::from_secs(fetch_timeout),
            delivery_timeout: Duration::from_secs(delivery_timeout),
            failure_notice_after: self.failure_notice_after.unwrap_or(3),
            user_agent: self
                .user_agent
                .unwrap_or_else(|| format!("notewatch/{}", env!("CARGO_PKG_VERSION"))),
            admin_addr,
        })
    }
}

#[derive(Debug, Clone)]
pub enum ProviderSource {
    Hoyolab {
        endpoint: Option<String>,
        credentials: HoyolabCredentials,
    },
    Fixture(PathBuf),
}

/// Everything the watcher needs, fixed at startup.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub account: AccountRef,
    /// Offset naive provider timestamps are read in.
    pub provider_offset: FixedOffset,
    pub source: ProviderSource,
    pub slack_webhook_url: Option<String>,
    pub poll_interval: Duration,
    /// Emit a full report every this many scheduled cycles.
    pub report_every: u32,
    pub report_on_start: bool,
    pub thresholds: Thresholds,
    pub rearm: RearmPolicy,
    pub fetch_timeout: Duration,
    pub delivery_timeout: Duration,
    /// Consecutive failed cycles before a single outage notice; 0 disables.
    pub failure_notice_after: u32,
    pub user_agent: String,
    pub admin_addr: Option<SocketAddr>,
}

impl MonitorConfig {
    /// Defaults for `account`, reading from `source`.
    pub fn new(account: AccountRef, source: ProviderSource) -> Self {
        Self {
            account,
            provider_offset: account.region.utc_offset(),
            source,
            slack_webhook_url: None,
            poll_interval: Duration::from_secs(3600),
            report_every: 1,
            report_on_start: true,
            thresholds: Thresholds::new(DEFAULT_THRESHOLDS, true)
                .expect("default thresholds are ascending"),
            rearm: RearmPolicy::default(),
            fetch_timeout: Duration::from_secs(20),
            delivery_timeout: Duration::from_secs(20),
            failure_notice_after: 3,
            user_agent: format!("notewatch/{}", env!("CARGO_PKG_VERSION")),
            admin_addr: None,
        }
    }

    /// defaults <- optional YAML file <- environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => Settings::from_yaml_file(path)?,
            None => Settings::default(),
        };
        file.overlay(Settings::from_env()?).resolve()
    }

    pub fn require_webhook(&self) -> Result<&str, ConfigError> {
        self.slack_webhook_url
            .as_deref()
            .ok_or(ConfigError::Missing("SLACK_WEBHOOK_URL"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    use crate::alert::AlertLevel;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn base() -> Vec<(&'static str, &'static str)> {
        vec![
            ("LTOKEN_V2", "v2_token"),
            ("LTUID_V2", "1234"),
            ("GENSHIN_UID", "612345678"),
        ]
    }

    #[test]
    fn defaults_apply_when_only_credentials_are_set() {
        let config = Settings::from_lookup(lookup(&base())).unwrap().resolve().unwrap();
        assert_eq!(config.account.region, Region::America);
        assert_eq!(config.provider_offset.local_minus_utc(), -5 * 3600);
        assert_eq!(config.poll_interval, Duration::from_secs(3600));
        assert!(config.report_on_start);
        assert_eq!(config.report_every, 1);
        assert_eq!(
            config.thresholds.levels(),
            &[AlertLevel::Value(120), AlertLevel::Value(160), AlertLevel::Full]
        );
        assert_eq!(config.rearm, RearmPolicy::OnDrop);
        assert!(matches!(config.source, ProviderSource::Hoyolab { .. }));
        assert!(config.require_webhook().is_err());
    }

    #[test]
    fn env_values_are_parsed() {
        let mut pairs = base();
        pairs.extend([
            ("SCHEDULE_HOURS", "2"),
            ("POST_ON_START", "no"),
            ("RESIN_ALERT_THRESHOLDS", "100, 150,,180"),
            ("RESIN_ALERT_FULL", "false"),
            ("RESIN_ALERT_REARM", "daily"),
            ("PROVIDER_TZ", "UTC+9"),
            ("NOTEWATCH_ADMIN_ADDR", "127.0.0.1:8080"),
        ]);
        let config = Settings::from_lookup(lookup(&pairs)).unwrap().resolve().unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(2 * 3600));
        assert!(!config.report_on_start);
        assert_eq!(
            config.thresholds.levels(),
            &[AlertLevel::Value(100), AlertLevel::Value(150), AlertLevel::Value(180)]
        );
        assert_eq!(config.rearm, RearmPolicy::Daily);
        assert_eq!(config.provider_offset.local_minus_utc(), 9 * 3600);
        assert_eq!(config.admin_addr.unwrap().port(), 8080);
    }

    #[test]
    fn malformed_thresholds_are_a_config_error() {
        let mut pairs = base();
        pairs.push(("RESIN_ALERT_THRESHOLDS", "160,120"));
        let err = Settings::from_lookup(lookup(&pairs)).unwrap().resolve().unwrap_err();
        assert!(matches!(err, ConfigError::Thresholds(ThresholdError::NotAscending { .. })));

        let mut pairs = base();
        pairs.push(("RESIN_ALERT_THRESHOLDS", "12o"));
        let err = Settings::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "RESIN_ALERT_THRESHOLDS", .. }));
    }

    #[test]
    fn missing_credentials_are_reported() {
        let err = Settings::from_lookup(lookup(&[("GENSHIN_UID", "612345678")]))
            .unwrap()
            .resolve()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("LTOKEN_V2")));

        let err = Settings::default().resolve().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("GENSHIN_UID")));
    }

    #[test]
    fn unknown_region_prefix_needs_explicit_region() {
        let err = Settings::from_lookup(lookup(&[
            ("GENSHIN_UID", "112345678"),
            ("NOTEWATCH_FIXTURE", "fixtures/daily-note/sample.json"),
        ]))
        .unwrap()
        .resolve()
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "GENSHIN_REGION", .. }));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut pairs = base();
        pairs.push(("SCHEDULE_MINUTES", "0"));
        let err = Settings::from_lookup(lookup(&pairs)).unwrap().resolve().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "SCHEDULE_MINUTES", .. }));
    }

    #[test]
    fn oversized_schedules_are_config_errors() {
        let mut pairs = base();
        pairs.push(("SCHEDULE_MINUTES", "18446744073709551615"));
        let err = Settings::from_lookup(lookup(&pairs)).unwrap().resolve().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "SCHEDULE_MINUTES", .. }));

        let mut pairs = base();
        pairs.push(("SCHEDULE_HOURS", "18446744073709551615"));
        let err = Settings::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "SCHEDULE_HOURS", .. }));

        let mut pairs = base();
        pairs.push(("SCHEDULE_HOURS", "169"));
        let err = Settings::from_lookup(lookup(&pairs)).unwrap().resolve().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "SCHEDULE_MINUTES", .. }));

        let mut pairs = base();
        pairs.push(("SCHEDULE_HOURS", "168"));
        let config = Settings::from_lookup(lookup(&pairs)).unwrap().resolve().unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(7 * 24 * 3600));
    }

    #[test]
    fn non_ascii_provider_offset_is_a_config_error() {
        let mut pairs = base();
        pairs.push(("PROVIDER_TZ", "+1é1"));
        let err = Settings::from_lookup(lookup(&pairs)).unwrap().resolve().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PROVIDER_TZ", .. }));
    }

    #[test]
    fn yaml_file_is_overridden_by_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "uid: 712345678\nfixture_path: fixtures/daily-note/sample.json\nschedule_minutes: 15\nresin_alert_thresholds: [100, 140]\n"
        )
        .unwrap();

        let from_file = Settings::from_yaml_file(file.path()).unwrap();
        let env = Settings::from_lookup(lookup(&[("SCHEDULE_MINUTES", "5")])).unwrap();
        let config = from_file.overlay(env).resolve().unwrap();

        assert_eq!(config.account.region, Region::Europe);
        assert_eq!(config.poll_interval, Duration::from_secs(300));
        assert_eq!(config.thresholds.levels()[0], AlertLevel::Value(100));
        assert!(matches!(config.source, ProviderSource::Fixture(_)));
    }

    #[test]
    fn unknown_yaml_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "uid: 712345678\nshedule_minutes: 15").unwrap();
        assert!(matches!(
            Settings::from_yaml_file(file.path()),
            Err(ConfigError::File { .. })
        ));
    }
}
