//! The polling loop: fetch, normalize, derive, alert, report.
//!
//! A [`Monitor`] owns all mutable watcher state and runs one cycle at a time.
//! Scheduled ticks and manual triggers are serialized through the same task,
//! so alert state is only ever touched by one cycle. Callers talk to it through
//! a cloneable [`MonitorHandle`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use notewatch_adapters::{DeliveryError, FetchError, Notifier, StatusProvider};
use notewatch_core::{derive, normalize, CanonicalSnapshot, DerivedState, NormalizationError, StructuredMessage};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::alert::{AlertEngine, AlertEvent, AlertState};
use crate::config::MonitorConfig;
use crate::report::{format_alert, format_failure_notice, format_recovery_notice, format_report};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Fetching,
    Evaluating,
    Reporting,
    Sleeping,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Scheduled,
    Manual,
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("normalizing snapshot: {0}")]
    Normalize(#[from] NormalizationError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleStatus {
    Evaluated {
        alerts: Vec<AlertEvent>,
        reported: bool,
        deliveries_failed: u32,
    },
    Failed {
        error: String,
    },
    /// Shutdown was requested while the fetch was in flight.
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleOutcome {
    pub cycle_id: Uuid,
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    #[serde(flatten)]
    pub status: CycleStatus,
}

impl CycleOutcome {
    pub fn alerts(&self) -> &[AlertEvent] {
        match &self.status {
            CycleStatus::Evaluated { alerts, .. } => alerts,
            _ => &[],
        }
    }

    pub fn reported(&self) -> bool {
        matches!(self.status, CycleStatus::Evaluated { reported: true, .. })
    }
}

/// Read-only view published after every phase change.
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub phase: Phase,
    pub cycles: u64,
    pub consecutive_failures: u32,
    pub last_outcome: Option<CycleOutcome>,
    pub snapshot: Option<CanonicalSnapshot>,
    pub derived: Option<DerivedState>,
}

impl Default for StatusView {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            cycles: 0,
            consecutive_failures: 0,
            last_outcome: None,
            snapshot: None,
            derived: None,
        }
    }
}

enum Command {
    Trigger { reply: oneshot::Sender<CycleOutcome> },
}

#[derive(Debug, Error)]
#[error("monitor is not running")]
pub struct MonitorStopped;

#[derive(Clone)]
pub struct MonitorHandle {
    commands: mpsc::Sender<Command>,
    shutdown: Arc<watch::Sender<bool>>,
    status: watch::Receiver<StatusView>,
}

impl MonitorHandle {
    /// Ask the loop to stop. An in-flight fetch is abandoned; deliveries that
    /// already started run to their own timeout.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Run one cycle now, queued behind any cycle already running.
    pub async fn trigger(&self) -> Result<CycleOutcome, MonitorStopped> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(Command::Trigger { reply })
            .await
            .map_err(|_| MonitorStopped)?;
        outcome.await.map_err(|_| MonitorStopped)
    }

    pub fn status(&self) -> StatusView {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusView> {
        self.status.clone()
    }
}

/// Resolves once stop was requested. A dropped handle never stops the loop.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[derive(Debug, Default)]
struct FailureTracker {
    consecutive: u32,
    since: Option<DateTime<Utc>>,
    notified: bool,
}

impl FailureTracker {
    /// Returns true when the outage notice should go out now.
    fn record_failure(&mut self, at: DateTime<Utc>, notice_after: u32) -> bool {
        self.consecutive += 1;
        self.since.get_or_insert(at);
        if notice_after > 0 && !self.notified && self.consecutive >= notice_after {
            self.notified = true;
            return true;
        }
        false
    }

    /// Returns the outage to announce as recovered, if a notice went out.
    fn record_success(&mut self) -> Option<(u32, DateTime<Utc>)> {
        let recovered = match (self.notified, self.since) {
            (true, Some(since)) => Some((self.consecutive, since)),
            _ => None,
        };
        *self = Self::default();
        recovered
    }
}

pub struct Monitor {
    config: MonitorConfig,
    provider: Arc<dyn StatusProvider>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    engine: AlertEngine,
    scheduled_cycles: u64,
    failures: FailureTracker,
    status: watch::Sender<StatusView>,
    commands: mpsc::Receiver<Command>,
    shutdown: watch::Receiver<bool>,
}

impl Monitor {
    pub fn new(
        config: MonitorConfig,
        provider: Arc<dyn StatusProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> (Self, MonitorHandle) {
        let (command_tx, command_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (status_tx, status_rx) = watch::channel(StatusView::default());

        let engine = AlertEngine::new(
            config.thresholds.clone(),
            config.rearm,
            config.account.region.utc_offset(),
        );
        let monitor = Self {
            config,
            provider,
            notifier,
            clock: Arc::new(SystemClock),
            engine,
            scheduled_cycles: 0,
            failures: FailureTracker::default(),
            status: status_tx,
            commands: command_rx,
            shutdown: shutdown_rx,
        };
        let handle = MonitorHandle {
            commands: command_tx,
            shutdown: Arc::new(shutdown_tx),
            status: status_rx,
        };
        (monitor, handle)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn alert_state(&self) -> &AlertState {
        self.engine.state()
    }

    /// Poll on a fixed schedule until stopped. Ticks that fall inside a slow
    /// cycle are skipped rather than bunched up.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            account = %self.config.account.uid,
            region = %self.config.account.region,
            provider = self.provider.name(),
            notifier = %self.notifier.describe(),
            interval_secs = self.config.poll_interval.as_secs(),
            "watcher started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => break,
                Some(command) = self.commands.recv() => match command {
                    Command::Trigger { reply } => {
                        let outcome = self.run_cycle(Trigger::Manual).await;
                        let _ = reply.send(outcome);
                    }
                },
                _ = ticker.tick() => {
                    self.run_cycle(Trigger::Scheduled).await;
                }
            }
            self.set_phase(Phase::Sleeping);
        }

        self.set_phase(Phase::Stopped);
        info!("watcher stopped");
    }

    /// Run one full cycle. Failures are contained here: the returned outcome
    /// says what happened and alert state is left untouched on failure.
    pub async fn run_cycle(&mut self, trigger: Trigger) -> CycleOutcome {
        let cycle_id = Uuid::new_v4();
        let span = info_span!("poll_cycle", %cycle_id, ?trigger);
        let outcome = self.cycle(cycle_id, trigger).instrument(span).await;
        self.status.send_modify(|view| {
            view.cycles += 1;
            view.consecutive_failures = self.failures.consecutive;
            view.last_outcome = Some(outcome.clone());
        });
        outcome
    }

    fn report_due(&mut self, trigger: Trigger) -> bool {
        match trigger {
            Trigger::Manual => true,
            Trigger::Scheduled => {
                let index = self.scheduled_cycles;
                self.scheduled_cycles += 1;
                if index == 0 {
                    self.config.report_on_start
                } else {
                    index % u64::from(self.config.report_every.max(1)) == 0
                }
            }
        }
    }

    async fn cycle(&mut self, cycle_id: Uuid, trigger: Trigger) -> CycleOutcome {
        let started_at = self.clock.now();
        let report_due = self.report_due(trigger);
        let outcome = |status| CycleOutcome {
            cycle_id,
            trigger,
            started_at,
            status,
        };

        self.set_phase(Phase::Fetching);
        let snapshot = match self.fetch(cycle_id).await {
            Some(Ok(snapshot)) => snapshot,
            Some(Err(err)) => {
                let error = err.to_string();
                self.cycle_failed(cycle_id, started_at, &error).await;
                return outcome(CycleStatus::Failed { error });
            }
            None => {
                info!("fetch abandoned for shutdown");
                return outcome(CycleStatus::Aborted);
            }
        };

        self.set_phase(Phase::Evaluating);
        let now = self.clock.now();
        let derived = derive(&snapshot, now);
        let alerts = self
            .engine
            .evaluate(snapshot.resin.current, snapshot.resin.max, snapshot.fetched_at);
        let recovered = self.failures.record_success();
        debug!(
            resin = snapshot.resin.current,
            max = snapshot.resin.max,
            alerts = alerts.len(),
            report_due,
            "cycle evaluated"
        );
        self.status.send_modify(|view| {
            view.snapshot = Some(snapshot.clone());
            view.derived = Some(derived.clone());
        });

        let mut messages: Vec<(&'static str, StructuredMessage)> = alerts
            .iter()
            .map(|event| ("alert", format_alert(event, &derived)))
            .collect();
        if let Some((failures, since)) = recovered {
            messages.push(("recovery", format_recovery_notice(failures, since, now)));
        }
        if report_due {
            messages.push(("report", format_report(&snapshot, &derived)));
        }

        let mut deliveries_failed = 0;
        if !messages.is_empty() {
            self.set_phase(Phase::Reporting);
            for (kind, message) in &messages {
                if !self.deliver(cycle_id, *kind, message).await {
                    deliveries_failed += 1;
                }
            }
        }

        outcome(CycleStatus::Evaluated {
            alerts,
            reported: report_due,
            deliveries_failed,
        })
    }

    /// `None` when shutdown interrupted the fetch.
    async fn fetch(&mut self, cycle_id: Uuid) -> Option<Result<CanonicalSnapshot, CycleError>> {
        let fetch_timeout = self.config.fetch_timeout;
        let fetch = timeout(
            fetch_timeout,
            self.provider.fetch(cycle_id, &self.config.account),
        );
        let raw = tokio::select! {
            biased;
            _ = shutdown_requested(&mut self.shutdown) => return None,
            result = fetch => match result {
                Ok(Ok(raw)) => raw,
                Ok(Err(err)) => return Some(Err(err.into())),
                Err(_) => return Some(Err(FetchError::Timeout(fetch_timeout).into())),
            },
        };
        Some(normalize(&raw, self.config.provider_offset).map_err(CycleError::from))
    }

    async fn cycle_failed(&mut self, cycle_id: Uuid, started_at: DateTime<Utc>, error: &str) {
        let notify = self
            .failures
            .record_failure(started_at, self.config.failure_notice_after);
        warn!(
            error,
            consecutive_failures = self.failures.consecutive,
            "cycle failed; keeping previous alert state"
        );
        if notify {
            let since = self.failures.since.unwrap_or(started_at);
            let message = format_failure_notice(self.failures.consecutive, since, error);
            self.set_phase(Phase::Reporting);
            self.deliver(cycle_id, "failure-notice", &message).await;
        }
    }

    /// Delivery failures are logged and never fail the cycle.
    async fn deliver(&self, cycle_id: Uuid, kind: &'static str, message: &StructuredMessage) -> bool {
        let limit = self.config.delivery_timeout;
        let result = timeout(limit, self.notifier.deliver(cycle_id, message))
            .await
            .unwrap_or(Err(DeliveryError::Timeout(limit)));
        match result {
            Ok(()) => {
                debug!(kind, "message delivered");
                true
            }
            Err(err) => {
                warn!(kind, error = %err, "delivery failed");
                false
            }
        }
    }

    fn set_phase(&self, phase: Phase) {
        self.status.send_if_modified(|view| {
            if view.phase == phase {
                return false;
            }
            view.phase = phase;
            true
        });
    }
}
