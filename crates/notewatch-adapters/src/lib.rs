//! Status-provider and delivery adapter contracts with their HoYoLab, fixture,
//! Slack and stdout implementations.

pub mod fixture;
pub mod hoyolab;
pub mod notify;

use std::time::Duration;

use async_trait::async_trait;
use notewatch_core::{AccountRef, RawSnapshot};
use notewatch_http::HttpError;
use thiserror::Error;
use uuid::Uuid;

pub use fixture::FixtureProvider;
pub use hoyolab::{HoyolabCredentials, HoyolabProvider, HoyolabProviderConfig};
pub use notify::{render_slack_payload, DeliveryError, Notifier, SlackWebhookNotifier, StdoutNotifier};

pub const CRATE_NAME: &str = "notewatch-adapters";

/// Why a provider could not produce a snapshot. Every variant is transient
/// from the scheduler's point of view: the cycle is skipped and retried on
/// the next tick.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Transport(#[from] HttpError),
    #[error("provider rejected the credentials (retcode {retcode}): {message}")]
    Auth { retcode: i64, message: String },
    #[error("provider rate limit hit (retcode {retcode}): {message}")]
    RateLimited { retcode: i64, message: String },
    #[error("provider error (retcode {retcode}): {message}")]
    Api { retcode: i64, message: String },
    #[error("provider response had no data")]
    EmptyResponse,
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("reading fixture: {0}")]
    Fixture(String),
}

#[async_trait]
pub trait StatusProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self, cycle_id: Uuid, account: &AccountRef) -> Result<RawSnapshot, FetchError>;
}
