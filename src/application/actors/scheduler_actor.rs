use chrono::{Duration as ChronoDuration, NaiveDate, NaiveTime};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{error, info};

use crate::application::services::scanner::{TickReport, TransitionScanner};
use crate::domain::services::clock::Clock;
use crate::task_runner::{BackoffConfig, FailureTracker};

/// Message for the scheduler actor
pub enum SchedulerMessage {
    /// Run a scanner tick immediately and reply with its report
    TickNow { reply: oneshot::Sender<TickReport> },
    /// Shutdown the actor
    Shutdown,
}

/// Cadences of the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    /// Market-local time after which the daily reminder sweep runs
    pub reminder_time: NaiveTime,
    pub reminder_lookahead: ChronoDuration,
    pub backoff: BackoffConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            reminder_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            reminder_lookahead: ChronoDuration::hours(48),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Actor that drives the transition scanner from the clock.
///
/// Every tick runs the publish and hour-bound expiry sweeps. Once per
/// market-local day it also runs the market-close sweep (after the cutoff) and
/// the reminder sweep (after the reminder time). A daily sweep that fails as a
/// whole is retried on later ticks.
pub struct SchedulerActor {
    scanner: Arc<TransitionScanner>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    scanner_failures: FailureTracker,
    daily_failures: FailureTracker,
    closed_through: Option<NaiveDate>,
    reminded_on: Option<NaiveDate>,
}

impl SchedulerActor {
    pub fn new(scanner: Arc<TransitionScanner>, clock: Arc<dyn Clock>, config: SchedulerConfig) -> Self {
        SchedulerActor {
            scanner_failures: FailureTracker::new("scanner tick", config.backoff.clone()),
            daily_failures: FailureTracker::new("daily sweeps", config.backoff.clone()),
            scanner,
            clock,
            config,
            closed_through: None,
            reminded_on: None,
        }
    }

    /// Run the scheduler actor
    pub async fn run(mut self, mut rx: mpsc::Receiver<SchedulerMessage>) {
        info!(
            "Starting scheduler actor with tick interval {:?}",
            self.config.tick_interval
        );

        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.scheduled_tick().await;
                }

                msg = rx.recv() => {
                    match msg {
                        Some(SchedulerMessage::TickNow { reply }) => {
                            let report = self.tick().await;
                            // Caller may have given up waiting
                            let _ = reply.send(report);
                        }
                        Some(SchedulerMessage::Shutdown) => {
                            info!("Scheduler actor shutting down");
                            break;
                        }
                        None => {
                            error!("Scheduler actor message channel closed");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Interval tick. A backing-off scanner sits this one out; the daily
    /// sweeps follow their own tracker.
    async fn scheduled_tick(&mut self) -> Option<TickReport> {
        let now = self.clock.now();
        let report = if self.scanner_failures.is_backing_off(Instant::now()) {
            None
        } else {
            Some(self.run_scanner(now).await)
        };
        self.maybe_run_daily_sweeps(now).await;
        report
    }

    /// Explicit `TickNow`: always runs the scanner
    async fn tick(&mut self) -> TickReport {
        let now = self.clock.now();
        let report = self.run_scanner(now).await;
        self.maybe_run_daily_sweeps(now).await;
        report
    }

    async fn run_scanner(&mut self, now: chrono::DateTime<chrono::Utc>) -> TickReport {
        let report = self.scanner.run_tick(now).await;

        if report.sweep_failed() {
            let reason = report
                .errors
                .iter()
                .filter(|e| e.is_whole_sweep())
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            self.scanner_failures.record_failure(Instant::now(), &reason);
        } else {
            self.scanner_failures.record_success();
        }
        report
    }

    async fn maybe_run_daily_sweeps(&mut self, now: chrono::DateTime<chrono::Utc>) {
        if !self.daily_failures.is_backing_off(Instant::now()) {
            self.run_daily_sweeps(now).await;
        }
    }

    async fn run_daily_sweeps(&mut self, now: chrono::DateTime<chrono::Utc>) {
        let calendar = *self.scanner.calendar();
        let mut failed = None;

        let through = self.scanner.closed_through(now);
        if through.is_some() && through != self.closed_through {
            let report = self.scanner.run_market_close_sweep(now).await;
            if report.sweep_failed() {
                failed = Some("market close sweep");
            } else {
                self.closed_through = through;
            }
        }

        let today = calendar.local_date(now);
        if calendar.local_time(now) >= self.config.reminder_time && self.reminded_on != Some(today) {
            let report = self
                .scanner
                .run_reminder_sweep(now, self.config.reminder_lookahead)
                .await;
            if report.sweep_failed() {
                failed = Some("reminder sweep");
            } else {
                self.reminded_on = Some(today);
            }
        }

        match failed {
            Some(sweep) => {
                self.daily_failures.record_failure(Instant::now(), sweep);
            }
            None => self.daily_failures.record_success(),
        }
    }
}

/// Spawn the scheduler actor
pub fn spawn_scheduler_actor(
    scanner: Arc<TransitionScanner>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
) -> (mpsc::Sender<SchedulerMessage>, tokio::task::JoinHandle<()>) {
    let (msg_tx, msg_rx) = mpsc::channel::<SchedulerMessage>(32);
    let actor = SchedulerActor::new(scanner, clock, config);

    let handle = tokio::spawn(async move {
        actor.run(msg_rx).await;
    });

    (msg_tx, handle)
}
