//! Watcher orchestration: configuration, alert engine, report formatting and
//! the polling loop, plus helpers that wire them to concrete adapters.

pub mod alert;
pub mod config;
pub mod monitor;
pub mod report;

use std::sync::Arc;

use anyhow::{Context, Result};
use notewatch_adapters::{
    FixtureProvider, HoyolabProvider, HoyolabProviderConfig, Notifier, SlackWebhookNotifier,
    StatusProvider, StdoutNotifier,
};
use notewatch_http::{BackoffPolicy, HttpClient, HttpClientConfig};
use tracing::info;

pub use alert::{AlertEngine, AlertEvent, AlertLevel, AlertState, RearmPolicy, ThresholdError, Thresholds};
pub use config::{ConfigError, MonitorConfig, ProviderSource, Settings};
pub use monitor::{
    Clock, CycleOutcome, CycleStatus, Monitor, MonitorHandle, MonitorStopped, Phase, StatusView,
    SystemClock, Trigger,
};
pub use report::{format_alert, format_report};

pub const CRATE_NAME: &str = "notewatch-sync";

fn http_client(config: &MonitorConfig, timeout: std::time::Duration, backoff: BackoffPolicy) -> Result<HttpClient> {
    HttpClient::new(HttpClientConfig {
        timeout,
        user_agent: Some(config.user_agent.clone()),
        backoff,
    })
}

pub fn build_provider(config: &MonitorConfig) -> Result<Arc<dyn StatusProvider>> {
    match &config.source {
        ProviderSource::Fixture(path) => {
            info!(path = %path.display(), "reading daily notes from fixture");
            Ok(Arc::new(FixtureProvider::new(path.clone())))
        }
        ProviderSource::Hoyolab {
            endpoint,
            credentials,
        } => {
            let mut provider_config = HoyolabProviderConfig::new(credentials.clone());
            if let Some(endpoint) = endpoint {
                provider_config.endpoint = endpoint.clone();
            }
            let http = http_client(config, config.fetch_timeout, BackoffPolicy::default())?;
            Ok(Arc::new(
                HoyolabProvider::new(http, provider_config).context("building hoyolab provider")?,
            ))
        }
    }
}

/// Slack when a webhook is configured and this is not a dry run, stdout otherwise.
pub fn build_notifier(config: &MonitorConfig, dry_run: bool) -> Result<Arc<dyn Notifier>> {
    if dry_run {
        return Ok(Arc::new(StdoutNotifier));
    }
    let webhook = config.require_webhook()?;
    // One attempt per message; the cycle's delivery timeout bounds it.
    let http = http_client(config, config.delivery_timeout, BackoffPolicy::none())?;
    Ok(Arc::new(SlackWebhookNotifier::new(http, webhook)))
}

pub fn build_monitor(config: MonitorConfig, dry_run: bool) -> Result<(Monitor, MonitorHandle)> {
    let provider = build_provider(&config)?;
    let notifier = build_notifier(&config, dry_run)?;
    Ok(Monitor::new(config, provider, notifier))
}

/// Run a single reporting cycle and return its outcome.
pub async fn run_once(config: MonitorConfig, dry_run: bool) -> Result<CycleOutcome> {
    let (mut monitor, _handle) = build_monitor(config, dry_run)?;
    Ok(monitor.run_cycle(Trigger::Manual).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use notewatch_core::{AccountRef, Region};

    fn fixture_config() -> MonitorConfig {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/daily-note/sample.json");
        MonitorConfig::new(
            AccountRef {
                uid: 612_345_678,
                region: Region::America,
            },
            ProviderSource::Fixture(path),
        )
    }

    #[test]
    fn live_delivery_needs_a_webhook() {
        let err = build_monitor(fixture_config(), false).err().unwrap();
        assert!(err.to_string().contains("SLACK_WEBHOOK_URL"));
        assert!(build_monitor(fixture_config(), true).is_ok());
    }

    #[tokio::test]
    async fn dry_run_once_reports_from_fixture() {
        let outcome = run_once(fixture_config(), true).await.unwrap();
        assert_eq!(outcome.trigger, Trigger::Manual);
        assert!(outcome.reported());
        assert!(outcome.alerts().is_empty());
        assert!(matches!(
            outcome.status,
            CycleStatus::Evaluated {
                deliveries_failed: 0,
                ..
            }
        ));
    }
}
