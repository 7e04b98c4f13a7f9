//! HoYoLab daily-note provider.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notewatch_core::{AccountRef, RawExpedition, RawSnapshot, RawTime};
use notewatch_http::HttpClient;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::{FetchError, StatusProvider};

pub const DEFAULT_ENDPOINT: &str = "https://bbs-api-os.hoyolab.com/game_record/genshin/api/dailyNote";
const DS_SALT: &str = "6s25p5ox5y14umn1p61aqyyvbvvl3lrt";
const APP_VERSION: &str = "1.5.0";
const CLIENT_TYPE: &str = "5";

/// Cookie credentials. `Debug` never prints the token.
#[derive(Clone, PartialEq, Eq)]
pub struct HoyolabCredentials {
    pub ltoken_v2: String,
    pub ltuid_v2: String,
}

impl fmt::Debug for HoyolabCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HoyolabCredentials")
            .field("ltoken_v2", &"<redacted>")
            .field("ltuid_v2", &self.ltuid_v2)
            .finish()
    }
}

impl HoyolabCredentials {
    fn cookie(&self) -> String {
        format!("ltoken_v2={}; ltuid_v2={}", self.ltoken_v2, self.ltuid_v2)
    }
}

#[derive(Debug, Clone)]
pub struct HoyolabProviderConfig {
    pub endpoint: String,
    pub language: String,
    pub credentials: HoyolabCredentials,
}

impl HoyolabProviderConfig {
    pub fn new(credentials: HoyolabCredentials) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            language: "en-us".to_string(),
            credentials,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub retcode: i64,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DailyNote {
    pub current_resin: Option<u32>,
    pub max_resin: Option<u32>,
    pub resin_recovery_time: Option<RawTime>,
    pub finished_task_num: Option<u32>,
    pub total_task_num: Option<u32>,
    pub is_extra_task_reward_received: Option<bool>,
    pub remain_resin_discount_num: Option<u32>,
    pub resin_discount_num_limit: Option<u32>,
    pub max_expedition_num: Option<u32>,
    #[serde(default)]
    pub expeditions: Vec<DailyNoteExpedition>,
    pub current_home_coin: Option<u32>,
    pub max_home_coin: Option<u32>,
    pub home_coin_recovery_time: Option<RawTime>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DailyNoteExpedition {
    #[serde(default)]
    pub avatar_side_icon: String,
    #[serde(default)]
    pub status: String,
    pub remained_time: Option<RawTime>,
}

/// `.../UI_AvatarIcon_Side_Bennett.png` -> `Bennett`.
fn character_from_icon(icon: &str) -> Option<String> {
    let file = icon.rsplit('/').next()?;
    let name = file.strip_prefix("UI_AvatarIcon_Side_")?.split('.').next()?;
    (!name.is_empty()).then(|| name.to_string())
}

pub fn daily_note_to_raw(note: DailyNote, account: AccountRef, fetched_at: DateTime<Utc>) -> RawSnapshot {
    let mut raw = RawSnapshot::new(account, fetched_at);
    raw.current_resin = note.current_resin;
    raw.max_resin = note.max_resin;
    raw.resin_recovery_time = note.resin_recovery_time;
    raw.finished_commissions = note.finished_task_num;
    raw.max_commissions = note.total_task_num;
    raw.claimed_commission_reward = note.is_extra_task_reward_received;
    raw.remaining_resin_discounts = note.remain_resin_discount_num;
    raw.max_resin_discounts = note.resin_discount_num_limit;
    raw.max_expeditions = note.max_expedition_num;
    raw.expeditions = note
        .expeditions
        .into_iter()
        .map(|e| RawExpedition {
            character: character_from_icon(&e.avatar_side_icon),
            finished: e.status.eq_ignore_ascii_case("finished"),
            remaining_time: e.remained_time,
        })
        .collect();
    raw.current_realm_currency = note.current_home_coin;
    raw.max_realm_currency = note.max_home_coin;
    raw.realm_currency_recovery_time = note.home_coin_recovery_time;
    raw
}

/// Map a provider envelope to its payload or a typed error.
pub fn unwrap_envelope<T>(envelope: Envelope<T>) -> Result<T, FetchError> {
    let Envelope {
        retcode,
        message,
        data,
    } = envelope;
    match retcode {
        0 => data.ok_or(FetchError::EmptyResponse),
        -100 | 10001 | 10103 => Err(FetchError::Auth { retcode, message }),
        10101 | 1034 | 5003 => Err(FetchError::RateLimited { retcode, message }),
        _ => Err(FetchError::Api { retcode, message }),
    }
}

/// `DS` request signature: `t,r,md5(salt=..&t=..&r=..)`.
pub fn dynamic_secret(t: i64, r: &str) -> String {
    let digest = md5::compute(format!("salt={DS_SALT}&t={t}&r={r}"));
    format!("{t},{r},{digest:x}")
}

pub struct HoyolabProvider {
    http: HttpClient,
    config: HoyolabProviderConfig,
    cookie: HeaderValue,
}

impl HoyolabProvider {
    pub fn new(http: HttpClient, config: HoyolabProviderConfig) -> anyhow::Result<Self> {
        let mut cookie = HeaderValue::from_str(&config.credentials.cookie())
            .map_err(|_| anyhow::anyhow!("credentials contain characters not allowed in a cookie"))?;
        cookie.set_sensitive(true);
        Ok(Self {
            http,
            config,
            cookie,
        })
    }

    fn headers(&self) -> HeaderMap {
        let nonce = Uuid::new_v4().simple().to_string();
        let ds = dynamic_secret(Utc::now().timestamp(), &nonce[..6]);

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, self.cookie.clone());
        for (name, value) in [
            ("ds", ds.as_str()),
            ("x-rpc-app_version", APP_VERSION),
            ("x-rpc-client_type", CLIENT_TYPE),
            ("x-rpc-language", self.config.language.as_str()),
        ] {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.insert(name, value);
            }
        }
        headers
    }
}

#[async_trait]
impl StatusProvider for HoyolabProvider {
    fn name(&self) -> &'static str {
        "hoyolab"
    }

    async fn fetch(&self, cycle_id: Uuid, account: &AccountRef) -> Result<RawSnapshot, FetchError> {
        let url = format!(
            "{}?server={}&role_id={}",
            self.config.endpoint,
            account.region.server_id(),
            account.uid
        );
        let envelope: Envelope<DailyNote> = self
            .http
            .get_json(cycle_id, "hoyolab:dailyNote", &url, self.headers())
            .await?;
        let fetched_at = Utc::now();
        debug!(retcode = envelope.retcode, "daily note response");
        let note = unwrap_envelope(envelope)?;
        Ok(daily_note_to_raw(note, *account, fetched_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_secret_has_three_parts() {
        let ds = dynamic_secret(1_700_000_000, "abcdef");
        let parts: Vec<_> = ds.split(',').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "1700000000");
        assert_eq!(parts[1], "abcdef");
        assert_eq!(parts[2].len(), 32);
        assert_eq!(ds, dynamic_secret(1_700_000_000, "abcdef"));
    }

    #[test]
    fn character_name_comes_from_side_icon() {
        assert_eq!(
            character_from_icon("https://x/y/UI_AvatarIcon_Side_Bennett.png").as_deref(),
            Some("Bennett")
        );
        assert_eq!(character_from_icon("https://x/y/other.png"), None);
        assert_eq!(character_from_icon(""), None);
    }

    #[test]
    fn retcodes_map_to_error_kinds() {
        let env = |retcode| Envelope::<DailyNote> {
            retcode,
            message: "nope".into(),
            data: None,
        };
        assert!(matches!(unwrap_envelope(env(10001)), Err(FetchError::Auth { .. })));
        assert!(matches!(unwrap_envelope(env(10101)), Err(FetchError::RateLimited { .. })));
        assert!(matches!(unwrap_envelope(env(-1)), Err(FetchError::Api { retcode: -1, .. })));
        assert!(matches!(unwrap_envelope(env(0)), Err(FetchError::EmptyResponse)));
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let creds = HoyolabCredentials {
            ltoken_v2: "v2_secret".into(),
            ltuid_v2: "1234".into(),
        };
        let printed = format!("{creds:?}");
        assert!(!printed.contains("v2_secret"));
        assert!(printed.contains("1234"));
    }
}
