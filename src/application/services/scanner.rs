//! Transition Scanner
//!
//! Turns wall-clock time into lifecycle transitions. Stateless apart from the
//! store: every call takes `now` explicitly, so tests drive it with arbitrary
//! instants.
//!
//! Each sweep selects rows whose guard still holds and transitions them one
//! transaction per row, in ascending boundary order. A row that fails is
//! logged and left for the next tick; a row another writer already moved is
//! counted as skipped.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::transitions::{load_basket, load_version, supersede_published_sibling, write_transition};
use crate::domain::entities::basket::Basket;
use crate::domain::entities::history::Actor;
use crate::domain::errors::{ErrorKind, LifecycleError, LifecycleResult};
use crate::domain::repositories::notifier::{LifecycleEvent, Notifier, Recipient};
use crate::domain::services::market_calendar::MarketCalendar;
use crate::domain::services::state_machine::{self, VersionEvent};
use crate::persistence::models::DueVersionRecord;
use crate::persistence::{DatabaseError, LifecycleStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Sweep {
    Publish,
    HourBoundExpiry,
    MarketClose,
    LapsedSubscriptions,
    Reminder,
}

impl std::fmt::Display for Sweep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Sweep::Publish => "publish",
            Sweep::HourBoundExpiry => "hour-bound expiry",
            Sweep::MarketClose => "market close",
            Sweep::LapsedSubscriptions => "lapsed subscriptions",
            Sweep::Reminder => "reminder",
        };
        write!(f, "{}", name)
    }
}

/// A failure inside a sweep. `record_id` is `None` when the whole sweep failed.
#[derive(Debug, Clone, Serialize)]
pub struct SweepError {
    pub sweep: Sweep,
    pub record_id: Option<i64>,
    pub kind: ErrorKind,
    pub message: String,
}

impl SweepError {
    fn row(sweep: Sweep, record_id: i64, error: &LifecycleError) -> Self {
        Self {
            sweep,
            record_id: Some(record_id),
            kind: error.kind(),
            message: error.to_string(),
        }
    }

    fn selection(sweep: Sweep, error: DatabaseError) -> Self {
        Self {
            sweep,
            record_id: None,
            kind: ErrorKind::PersistenceError,
            message: error.to_string(),
        }
    }

    pub fn is_whole_sweep(&self) -> bool {
        self.record_id.is_none()
    }
}

/// Result of one `run_tick`
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    pub published: usize,
    pub expired: usize,
    /// Rows another writer transitioned first
    pub skipped: usize,
    pub errors: Vec<SweepError>,
}

impl TickReport {
    pub fn changed(&self) -> usize {
        self.published + self.expired
    }

    pub fn sweep_failed(&self) -> bool {
        self.errors.iter().any(SweepError::is_whole_sweep)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MarketCloseReport {
    /// Trading dates up to and including this one were swept
    pub through: Option<NaiveDate>,
    pub expired: usize,
    pub lapsed_subscriptions: u64,
    pub skipped: usize,
    pub errors: Vec<SweepError>,
}

impl MarketCloseReport {
    pub fn sweep_failed(&self) -> bool {
        self.errors.iter().any(SweepError::is_whole_sweep)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReminderReport {
    pub reminded: usize,
    pub errors: Vec<SweepError>,
}

impl ReminderReport {
    pub fn sweep_failed(&self) -> bool {
        self.errors.iter().any(SweepError::is_whole_sweep)
    }
}

enum RowOutcome {
    Applied,
    Skipped,
}

pub struct TransitionScanner {
    store: LifecycleStore,
    calendar: MarketCalendar,
    notifier: Arc<dyn Notifier>,
}

impl TransitionScanner {
    pub fn new(store: LifecycleStore, calendar: MarketCalendar, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            calendar,
            notifier,
        }
    }

    pub fn calendar(&self) -> &MarketCalendar {
        &self.calendar
    }

    /// Publish sweep followed by the hour-bound expiry sweep
    pub async fn run_tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        match self.store.slots.due_for_publish(now).await {
            Ok(rows) => {
                for row in rows {
                    match self.publish_one(&row, now).await {
                        Ok(RowOutcome::Applied) => report.published += 1,
                        Ok(RowOutcome::Skipped) => report.skipped += 1,
                        Err(e) => record_row_error(&mut report.errors, &mut report.skipped, Sweep::Publish, row.version_id, e),
                    }
                }
            }
            Err(e) => report.errors.push(sweep_failure(Sweep::Publish, e)),
        }

        match self.store.slots.due_for_expiry(now).await {
            Ok(rows) => {
                for row in rows {
                    match self.expire_one(&row, VersionEvent::WindowClosed, now).await {
                        Ok(RowOutcome::Applied) => report.expired += 1,
                        Ok(RowOutcome::Skipped) => report.skipped += 1,
                        Err(e) => record_row_error(
                            &mut report.errors,
                            &mut report.skipped,
                            Sweep::HourBoundExpiry,
                            row.version_id,
                            e,
                        ),
                    }
                }
            }
            Err(e) => report.errors.push(sweep_failure(Sweep::HourBoundExpiry, e)),
        }

        if report.changed() > 0 || !report.errors.is_empty() {
            info!(
                "Scanner tick at {}: {} published, {} expired, {} skipped, {} error(s)",
                now,
                report.published,
                report.expired,
                report.skipped,
                report.errors.len()
            );
        } else {
            debug!("Scanner tick at {}: nothing due", now);
        }
        report
    }

    /// Last trading date whose close has passed at `now`
    pub fn closed_through(&self, now: DateTime<Utc>) -> Option<NaiveDate> {
        let today = self.calendar.local_date(now);
        if self.calendar.is_after_close(now) {
            Some(today)
        } else {
            today.pred_opt()
        }
    }

    /// Expire PUBLISHED single-day versions whose trading date has closed, then
    /// expire any ACTIVE subscription whose `expires_at` has passed.
    ///
    /// Versions without a trading date are treated as trading today.
    pub async fn run_market_close_sweep(&self, now: DateTime<Utc>) -> MarketCloseReport {
        let mut report = MarketCloseReport {
            through: self.closed_through(now),
            ..MarketCloseReport::default()
        };

        if let Some(through) = report.through {
            match self.store.slots.single_day_due(through).await {
                Ok(rows) => {
                    for row in rows {
                        match self.expire_one(&row, VersionEvent::MarketClosed, now).await {
                            Ok(RowOutcome::Applied) => report.expired += 1,
                            Ok(RowOutcome::Skipped) => report.skipped += 1,
                            Err(e) => record_row_error(
                                &mut report.errors,
                                &mut report.skipped,
                                Sweep::MarketClose,
                                row.version_id,
                                e,
                            ),
                        }
                    }
                }
                Err(e) => report.errors.push(sweep_failure(Sweep::MarketClose, e)),
            }
        }

        match self.store.subscriptions.expire_lapsed(now).await {
            Ok(count) => report.lapsed_subscriptions = count,
            Err(e) => report.errors.push(sweep_failure(Sweep::LapsedSubscriptions, e)),
        }

        info!(
            "Market close sweep through {:?}: {} version(s) expired, {} lapsed subscription(s), {} error(s)",
            report.through,
            report.expired,
            report.lapsed_subscriptions,
            report.errors.len()
        );
        report
    }

    /// Notify users whose subscription expires within `lookahead`, once each.
    ///
    /// The flag is set after the notification is handed off, so a crash in
    /// between may remind twice but never skips a reminder.
    pub async fn run_reminder_sweep(&self, now: DateTime<Utc>, lookahead: Duration) -> ReminderReport {
        let mut report = ReminderReport::default();

        let due = match self.store.subscriptions.due_for_reminder(now, now + lookahead).await {
            Ok(due) => due,
            Err(e) => {
                report.errors.push(sweep_failure(Sweep::Reminder, e));
                return report;
            }
        };

        for subscription in due {
            let Some(expires_at) = subscription.expires_at else {
                continue;
            };
            self.notifier.notify(
                LifecycleEvent::SubscriptionExpiring {
                    subscription_id: subscription.id,
                    basket_id: subscription.basket_id,
                    expires_at,
                },
                vec![Recipient::User(subscription.user_id)],
            );

            match self.store.subscriptions.mark_reminded(subscription.id, now).await {
                Ok(_) => report.reminded += 1,
                Err(e) => {
                    let e = LifecycleError::from(e);
                    warn!("Failed to flag reminder for subscription {}: {}", subscription.id, e);
                    report.errors.push(SweepError::row(Sweep::Reminder, subscription.id, &e));
                }
            }
        }

        if report.reminded > 0 {
            info!("Sent {} expiry reminder(s)", report.reminded);
        }
        report
    }

    // ------------------------------------------------------------------

    /// SCHEDULED -> PUBLISHED for one hour-bound version
    async fn publish_one(&self, row: &DueVersionRecord, now: DateTime<Utc>) -> LifecycleResult<RowOutcome> {
        let mut tx = self.store.begin().await?;
        let version = load_version(&self.store, &mut tx, row.version_id).await?;
        let basket = load_basket(&self.store, &mut tx, row.basket_id).await?;
        let transition = state_machine::transition(version.status, VersionEvent::WindowOpened, basket.basket_type)?;

        let slot = self
            .store
            .slots
            .find_by_version(&mut tx, version.id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("Time slot for version", version.id))?;
        if slot.actual_publish_time.is_some() || !slot.contains(now) {
            return Ok(RowOutcome::Skipped);
        }

        let actor = Actor::system();
        let superseded = supersede_published_sibling(&self.store, &mut tx, &basket, &version, actor, now).await?;
        write_transition(
            &self.store,
            &mut tx,
            &version,
            transition,
            actor,
            now,
            Some(format!("Window {} .. {} opened", slot.start_time, slot.end_time)),
            |_| {},
        )
        .await?;
        if !self.store.slots.stamp_publish(&mut tx, slot.id, now).await? {
            return Err(LifecycleError::ConcurrentModification {
                version_id: version.id,
                expected: transition.from,
            });
        }
        self.store
            .baskets
            .set_current_version(&mut tx, basket.id, version.id, now)
            .await?;
        let subscribers = self.store.subscriptions.active_user_ids(&mut tx, version.id).await?;
        tx.commit().await.map_err(DatabaseError::from)?;

        if let Some(superseded) = superseded {
            self.notify(
                &basket,
                LifecycleEvent::BasketUnpublished {
                    basket_id: basket.id,
                    version_id: superseded.version.id,
                },
                &superseded.effects.expired_subscribers,
            );
        }
        self.notify(
            &basket,
            LifecycleEvent::BasketPublished {
                basket_id: basket.id,
                version_id: version.id,
            },
            &subscribers,
        );
        Ok(RowOutcome::Applied)
    }

    /// PUBLISHED -> EXPIRED for one version, cascading to its subscriptions
    async fn expire_one(
        &self,
        row: &DueVersionRecord,
        event: VersionEvent,
        now: DateTime<Utc>,
    ) -> LifecycleResult<RowOutcome> {
        let mut tx = self.store.begin().await?;
        let version = load_version(&self.store, &mut tx, row.version_id).await?;
        let basket = load_basket(&self.store, &mut tx, row.basket_id).await?;
        let transition = state_machine::transition(version.status, event, basket.basket_type)?;

        let slot = match row.slot_id {
            Some(_) => {
                let slot = self
                    .store
                    .slots
                    .find_by_version(&mut tx, version.id)
                    .await?
                    .ok_or_else(|| LifecycleError::not_found("Time slot for version", version.id))?;
                if slot.actual_expire_time.is_some() || !slot.has_ended(now) {
                    return Ok(RowOutcome::Skipped);
                }
                Some(slot)
            }
            None => None,
        };

        let effects = write_transition(&self.store, &mut tx, &version, transition, Actor::system(), now, None, |_| {})
            .await?;
        if let Some(slot) = &slot {
            if !self.store.slots.stamp_expire(&mut tx, slot.id, now).await? {
                return Err(LifecycleError::ConcurrentModification {
                    version_id: version.id,
                    expected: transition.from,
                });
            }
        }
        tx.commit().await.map_err(DatabaseError::from)?;

        self.notify(
            &basket,
            LifecycleEvent::BasketExpired {
                basket_id: basket.id,
                version_id: version.id,
            },
            &effects.expired_subscribers,
        );
        Ok(RowOutcome::Applied)
    }

    fn notify(&self, basket: &Basket, event: LifecycleEvent, users: &[i64]) {
        let mut recipients = vec![Recipient::Amc(basket.amc_id)];
        recipients.extend(users.iter().map(|id| Recipient::User(*id)));
        self.notifier.notify(event, recipients);
    }
}

fn record_row_error(
    errors: &mut Vec<SweepError>,
    skipped: &mut usize,
    sweep: Sweep,
    version_id: i64,
    error: LifecycleError,
) {
    if error.is_benign_for_scanner() {
        debug!("{} sweep: version {} already moved ({})", sweep, version_id, error);
        *skipped += 1;
    } else {
        warn!("{} sweep: version {} failed, will retry: {}", sweep, version_id, error);
        errors.push(SweepError::row(sweep, version_id, &error));
    }
}

fn sweep_failure(sweep: Sweep, error: DatabaseError) -> SweepError {
    warn!("{} sweep could not select due rows: {}", sweep, error);
    SweepError::selection(sweep, error)
}
