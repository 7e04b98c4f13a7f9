//! Provider that replays a saved daily-note response from disk.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notewatch_core::{AccountRef, RawSnapshot};
use uuid::Uuid;

use crate::hoyolab::{daily_note_to_raw, unwrap_envelope, DailyNote, Envelope};
use crate::{FetchError, StatusProvider};

/// Read and decode a saved response. The file is re-read on every fetch so it
/// can be edited while the watcher runs.
pub async fn load_daily_note(path: impl AsRef<Path>) -> Result<DailyNote, FetchError> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| FetchError::Fixture(format!("reading {}: {err}", path.display())))?;
    let envelope: Envelope<DailyNote> = serde_json::from_str(&text)
        .map_err(|err| FetchError::Fixture(format!("parsing {}: {err}", path.display())))?;
    unwrap_envelope(envelope)
}

#[derive(Debug, Clone)]
pub struct FixtureProvider {
    path: PathBuf,
    fetched_at: Option<DateTime<Utc>>,
}

impl FixtureProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fetched_at: None,
        }
    }

    /// Pin the fetch instant instead of stamping `Utc::now()`.
    pub fn fetched_at(mut self, at: DateTime<Utc>) -> Self {
        self.fetched_at = Some(at);
        self
    }
}

#[async_trait]
impl StatusProvider for FixtureProvider {
    fn name(&self) -> &'static str {
        "fixture"
    }

    async fn fetch(&self, _cycle_id: Uuid, account: &AccountRef) -> Result<RawSnapshot, FetchError> {
        let note = load_daily_note(&self.path).await?;
        let fetched_at = self.fetched_at.unwrap_or_else(Utc::now);
        Ok(daily_note_to_raw(note, *account, fetched_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use notewatch_core::{normalize, Region};

    fn fixture_path(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../fixtures/daily-note")
            .join(name)
    }

    fn account() -> AccountRef {
        AccountRef {
            uid: 612_345_678,
            region: Region::America,
        }
    }

    #[tokio::test]
    async fn sample_fixture_normalizes() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let provider = FixtureProvider::new(fixture_path("sample.json")).fetched_at(at);

        let raw = provider.fetch(Uuid::new_v4(), &account()).await.unwrap();
        assert_eq!(raw.current_resin, Some(100));
        assert_eq!(raw.expeditions.len(), 4);
        assert_eq!(raw.expeditions[0].character.as_deref(), Some("Bennett"));
        assert!(raw.expeditions[0].finished);

        let snapshot = normalize(&raw, Region::America.utc_offset()).unwrap();
        assert_eq!(snapshot.resin.full_at, at + chrono::Duration::seconds(115_440));
        assert_eq!(snapshot.realm_currency.unwrap().max, 2400);
        assert_eq!(snapshot.expeditions.unwrap().max, 5);
        let commissions = snapshot.commissions.unwrap();
        assert_eq!((commissions.finished, commissions.total), (3, 4));
        assert!(!commissions.reward_claimed);
    }

    #[tokio::test]
    async fn auth_error_fixture_is_typed() {
        let provider = FixtureProvider::new(fixture_path("auth-error.json"));
        let err = provider.fetch(Uuid::new_v4(), &account()).await.unwrap_err();
        assert!(matches!(err, FetchError::Auth { retcode: 10001, .. }));
    }

    #[tokio::test]
    async fn missing_fixture_is_a_fetch_error() {
        let provider = FixtureProvider::new(fixture_path("does-not-exist.json"));
        let err = provider.fetch(Uuid::new_v4(), &account()).await.unwrap_err();
        assert!(matches!(err, FetchError::Fixture(_)));
    }
}
