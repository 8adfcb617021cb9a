//! Basket Lifecycle Service
//!
//! Human-triggered operations: AMCs create and submit versions, admins
//! approve, reject and unpublish them, users subscribe and cancel.
//!
//! Each operation runs in a single transaction. Notifications go out only
//! after the commit succeeds, so a rolled-back operation never notifies.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use super::transitions::{
    load_basket, load_version, supersede_published_sibling, write_transition, Superseded,
};
use super::valuation::snapshot_value;
use crate::domain::entities::basket::{Basket, BasketType, NewBasket};
use crate::domain::entities::basket_version::{BasketVersion, VersionStatus};
use crate::domain::entities::history::{Actor, BasketHistory, HistoryAction, NewHistoryEntry};
use crate::domain::entities::instrument::{BasketInstrument, NewInstrument};
use crate::domain::entities::subscription::BasketSubscription;
use crate::domain::entities::time_slot::BasketTimeSlot;
use crate::domain::errors::{LifecycleError, LifecycleResult};
use crate::domain::repositories::notifier::{LifecycleEvent, Notifier, Recipient};
use crate::domain::repositories::price_lookup::PriceLookup;
use crate::domain::services::clock::Clock;
use crate::domain::services::expiry::{check_subscribable, derive_expires_at};
use crate::domain::services::market_calendar::{MarketCalendar, SlotRequest};
use crate::domain::services::state_machine::{self, VersionEvent};
use crate::persistence::subscription_repository::NewSubscription;
use crate::persistence::{DatabaseError, DbConn, LifecycleStore};

/// Admin input when approving a version
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApprovalRequest {
    /// Publication window; required for hour-bound baskets
    pub slot: Option<SlotRequest>,
    /// Trading date for single-day baskets; defaults to the version's own, then today
    pub trading_date: Option<NaiveDate>,
    pub comment: Option<String>,
}

impl ApprovalRequest {
    pub fn with_slot(slot: SlotRequest) -> Self {
        Self {
            slot: Some(slot),
            ..Self::default()
        }
    }
}

pub struct BasketLifecycleService {
    store: LifecycleStore,
    calendar: MarketCalendar,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    prices: Arc<dyn PriceLookup>,
}

impl BasketLifecycleService {
    pub fn new(
        store: LifecycleStore,
        calendar: MarketCalendar,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        prices: Arc<dyn PriceLookup>,
    ) -> Self {
        Self {
            store,
            calendar,
            clock,
            notifier,
            prices,
        }
    }

    pub fn store(&self) -> &LifecycleStore {
        &self.store
    }

    // ------------------------------------------------------------------
    // AMC operations
    // ------------------------------------------------------------------

    /// Create a basket together with its first DRAFT version
    pub async fn create_basket(&self, amc_id: i64, request: NewBasket) -> LifecycleResult<(Basket, BasketVersion)> {
        request.validate().map_err(LifecycleError::guard)?;
        let now = self.clock.now();

        let mut tx = self.store.begin().await?;
        let basket = self.store.baskets.insert_basket(&mut tx, amc_id, &request, now).await?;
        let version = self
            .create_version_on(&mut tx, &basket, amc_id, &request.instruments, request.trading_date, now)
            .await?;
        tx.commit().await.map_err(DatabaseError::from)?;

        info!(
            "AMC {} created {} basket {} '{}'",
            amc_id, basket.basket_type, basket.id, basket.name
        );
        Ok((basket, version))
    }

    /// Start a new DRAFT version, numbered one past the highest existing one.
    ///
    /// Refused while another version of the basket is still DRAFT or
    /// PENDING_APPROVAL.
    pub async fn create_draft_version(
        &self,
        basket_id: i64,
        amc_id: i64,
        instruments: Vec<NewInstrument>,
        trading_date: Option<NaiveDate>,
    ) -> LifecycleResult<BasketVersion> {
        for instrument in &instruments {
            instrument.validate().map_err(LifecycleError::guard)?;
        }
        let now = self.clock.now();

        let mut tx = self.store.begin().await?;
        let basket = load_basket(&self.store, &mut tx, basket_id).await?;
        ensure_owner(&basket, amc_id)?;

        let versions = self.store.baskets.list_versions_on(&mut tx, basket_id).await?;
        if let Some(open) = versions.iter().find(|v| v.status.is_open()) {
            return Err(LifecycleError::guard(format!(
                "Basket {} already has version {} in {}",
                basket_id, open.version_number, open.status
            )));
        }

        let version = self
            .create_version_on(&mut tx, &basket, amc_id, &instruments, trading_date, now)
            .await?;
        tx.commit().await.map_err(DatabaseError::from)?;

        Ok(version)
    }

    async fn create_version_on(
        &self,
        conn: &mut DbConn,
        basket: &Basket,
        amc_id: i64,
        instruments: &[NewInstrument],
        trading_date: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) -> LifecycleResult<BasketVersion> {
        let version = self
            .store
            .baskets
            .insert_draft_version(conn, basket.id, trading_date, now)
            .await?;
        for instrument in instruments {
            self.store.baskets.insert_instrument(conn, version.id, instrument, now).await?;
        }

        let entry = NewHistoryEntry::new(version.id, HistoryAction::Created, Actor::amc(amc_id)).with_metadata(json!({
            "basket_id": basket.id,
            "version_number": version.version_number,
            "instruments": instruments.len(),
        }));
        self.store.history.append(conn, &entry, now).await?;

        Ok(version)
    }

    /// Add a constituent to a DRAFT version
    pub async fn add_instrument(
        &self,
        version_id: i64,
        amc_id: i64,
        instrument: NewInstrument,
    ) -> LifecycleResult<BasketInstrument> {
        instrument.validate().map_err(LifecycleError::guard)?;
        let now = self.clock.now();

        let mut tx = self.store.begin().await?;
        let version = load_version(&self.store, &mut tx, version_id).await?;
        let basket = load_basket(&self.store, &mut tx, version.basket_id).await?;
        ensure_owner(&basket, amc_id)?;
        if version.status != VersionStatus::Draft {
            return Err(LifecycleError::guard(format!(
                "Version {} is {}; only DRAFT versions can be edited",
                version.version_number, version.status
            )));
        }

        let added = self
            .store
            .baskets
            .insert_instrument(&mut tx, version_id, &instrument, now)
            .await?;
        tx.commit().await.map_err(DatabaseError::from)?;

        Ok(added)
    }

    /// DRAFT -> PENDING_APPROVAL. The version must hold at least one instrument.
    pub async fn submit_version(&self, basket_id: i64, version_id: i64, amc_id: i64) -> LifecycleResult<BasketVersion> {
        let now = self.clock.now();

        let mut tx = self.store.begin().await?;
        let version = load_version(&self.store, &mut tx, version_id).await?;
        if version.basket_id != basket_id {
            return Err(LifecycleError::not_found("Basket version", version_id));
        }
        let basket = load_basket(&self.store, &mut tx, basket_id).await?;
        ensure_owner(&basket, amc_id)?;

        let transition = state_machine::transition(version.status, VersionEvent::Submit, basket.basket_type)?;
        if self.store.baskets.count_instruments(&mut tx, version_id).await? == 0 {
            return Err(LifecycleError::guard(format!(
                "Version {} has no instruments",
                version.version_number
            )));
        }

        write_transition(&self.store, &mut tx, &version, transition, Actor::amc(amc_id), now, None, |change| {
            change.submitted_at = Some(now);
        })
        .await?;
        let updated = load_version(&self.store, &mut tx, version_id).await?;
        tx.commit().await.map_err(DatabaseError::from)?;

        self.notifier.notify(
            LifecycleEvent::VersionSubmitted {
                basket_id,
                version_id,
            },
            vec![Recipient::Admins],
        );
        Ok(updated)
    }

    // ------------------------------------------------------------------
    // Admin operations
    // ------------------------------------------------------------------

    /// PENDING_APPROVAL -> SCHEDULED (hour-bound) or PUBLISHED (other types).
    ///
    /// Publishing demotes any PUBLISHED sibling and repoints the basket in the
    /// same transaction.
    pub async fn approve_version(
        &self,
        version_id: i64,
        admin_id: i64,
        request: ApprovalRequest,
    ) -> LifecycleResult<BasketVersion> {
        // Prices are fetched before the transaction opens; a failed lookup only
        // leaves the snapshot empty.
        let price_at_approval = self.price_snapshot(version_id).await;
        let now = self.clock.now();

        let mut tx = self.store.begin().await?;
        let version = load_version(&self.store, &mut tx, version_id).await?;
        let basket = load_basket(&self.store, &mut tx, version.basket_id).await?;
        let transition = state_machine::transition(version.status, VersionEvent::Approve, basket.basket_type)?;
        let actor = Actor::admin(admin_id);

        let mut slot = None;
        let mut superseded = None;
        match transition.to {
            VersionStatus::Scheduled => {
                let requested = request.slot.as_ref().ok_or_else(|| {
                    LifecycleError::guard("Hour-bound approval requires a start and end time")
                })?;
                let window = self
                    .calendar
                    .resolve_slot(requested, now)
                    .map_err(LifecycleError::guard)?;

                write_transition(&self.store, &mut tx, &version, transition, actor, now, request.comment.clone(), |change| {
                    change.approved_at = Some(now);
                    change.approved_by = Some(admin_id);
                    change.price_at_approval = price_at_approval;
                })
                .await?;
                slot = Some(
                    self.store
                        .slots
                        .insert(&mut tx, version_id, &window, admin_id, now)
                        .await?,
                );
            }
            _ => {
                let trading_date = match basket.basket_type {
                    BasketType::SingleDay => Some(
                        request
                            .trading_date
                            .or(version.trading_date)
                            .unwrap_or_else(|| self.calendar.local_date(now)),
                    ),
                    _ => None,
                };

                superseded = supersede_published_sibling(&self.store, &mut tx, &basket, &version, actor, now).await?;
                write_transition(&self.store, &mut tx, &version, transition, actor, now, request.comment.clone(), |change| {
                    change.approved_at = Some(now);
                    change.approved_by = Some(admin_id);
                    change.price_at_approval = price_at_approval;
                    change.trading_date = trading_date;
                })
                .await?;
                self.store
                    .baskets
                    .set_current_version(&mut tx, basket.id, version_id, now)
                    .await?;
            }
        }

        let updated = load_version(&self.store, &mut tx, version_id).await?;
        tx.commit().await.map_err(DatabaseError::from)?;

        self.notifier.notify(
            LifecycleEvent::VersionApproved {
                basket_id: basket.id,
                version_id,
                scheduled_start: slot.as_ref().map(|s: &BasketTimeSlot| s.start_time),
            },
            vec![Recipient::Amc(basket.amc_id)],
        );
        if let Some(superseded) = superseded {
            self.notify_unpublished(&basket, &superseded);
        }
        if updated.status == VersionStatus::Published {
            self.notifier.notify(
                LifecycleEvent::BasketPublished {
                    basket_id: basket.id,
                    version_id,
                },
                vec![Recipient::Amc(basket.amc_id)],
            );
        }
        Ok(updated)
    }

    /// PENDING_APPROVAL -> REJECTED. Terminal; the AMC retries with a new version.
    pub async fn reject_version(&self, version_id: i64, admin_id: i64, reason: &str) -> LifecycleResult<BasketVersion> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(LifecycleError::guard("Rejection requires a reason"));
        }
        let now = self.clock.now();

        let mut tx = self.store.begin().await?;
        let version = load_version(&self.store, &mut tx, version_id).await?;
        let basket = load_basket(&self.store, &mut tx, version.basket_id).await?;
        let transition = state_machine::transition(version.status, VersionEvent::Reject, basket.basket_type)?;

        write_transition(
            &self.store,
            &mut tx,
            &version,
            transition,
            Actor::admin(admin_id),
            now,
            Some(reason.to_string()),
            |change| change.rejection_reason = Some(reason.to_string()),
        )
        .await?;
        let updated = load_version(&self.store, &mut tx, version_id).await?;
        tx.commit().await.map_err(DatabaseError::from)?;

        self.notifier.notify(
            LifecycleEvent::VersionRejected {
                basket_id: basket.id,
                version_id,
                reason: reason.to_string(),
            },
            vec![Recipient::Amc(basket.amc_id)],
        );
        Ok(updated)
    }

    /// Manual PUBLISHED -> UNPUBLISHED. Active subscriptions on the version expire with it.
    pub async fn unpublish_version(
        &self,
        version_id: i64,
        admin_id: i64,
        reason: Option<String>,
    ) -> LifecycleResult<BasketVersion> {
        let now = self.clock.now();

        let mut tx = self.store.begin().await?;
        let version = load_version(&self.store, &mut tx, version_id).await?;
        let basket = load_basket(&self.store, &mut tx, version.basket_id).await?;
        let transition = state_machine::transition(version.status, VersionEvent::Unpublish, basket.basket_type)?;

        let effects = write_transition(
            &self.store,
            &mut tx,
            &version,
            transition,
            Actor::admin(admin_id),
            now,
            reason,
            |_| {},
        )
        .await?;
        let updated = load_version(&self.store, &mut tx, version_id).await?;
        tx.commit().await.map_err(DatabaseError::from)?;

        self.notify_unpublished(
            &basket,
            &Superseded {
                version: updated.clone(),
                effects,
            },
        );
        Ok(updated)
    }

    // ------------------------------------------------------------------
    // User operations
    // ------------------------------------------------------------------

    /// Subscribe a user to the basket's PUBLISHED version, or to an upcoming
    /// SCHEDULED hour-bound version when nothing is published or the published
    /// window has already closed.
    pub async fn subscribe(&self, user_id: i64, basket_id: i64) -> LifecycleResult<BasketSubscription> {
        let now = self.clock.now();

        let mut tx = self.store.begin().await?;
        let basket = load_basket(&self.store, &mut tx, basket_id).await?;

        if let Some(existing) = self.store.subscriptions.find_active(&mut tx, user_id, basket_id).await? {
            return Err(LifecycleError::AlreadySubscribed {
                user_id,
                basket_id,
                subscription_id: existing.id,
            });
        }

        let version = match self.store.baskets.find_published_version(&mut tx, basket_id).await? {
            // Window over but not yet expired by the scanner: prefer an upcoming version
            Some(published) if basket.basket_type == BasketType::HourBound => {
                let window_over = self
                    .store
                    .slots
                    .find_by_version(&mut tx, published.id)
                    .await?
                    .is_some_and(|slot| slot.has_ended(now));
                if window_over {
                    self.store
                        .baskets
                        .find_latest_with_status(&mut tx, basket_id, &[VersionStatus::Scheduled])
                        .await?
                        .unwrap_or(published)
                } else {
                    published
                }
            }
            Some(published) => published,
            None if basket.basket_type == BasketType::HourBound => self
                .store
                .baskets
                .find_latest_with_status(&mut tx, basket_id, &[VersionStatus::Scheduled])
                .await?
                .ok_or_else(|| {
                    LifecycleError::guard(format!("Basket {} has no version open for subscription", basket_id))
                })?,
            None => {
                return Err(LifecycleError::guard(format!(
                    "Basket {} has no published version",
                    basket_id
                )))
            }
        };

        let slot = if basket.basket_type.requires_time_slot() {
            self.store.slots.find_by_version(&mut tx, version.id).await?
        } else {
            None
        };

        check_subscribable(basket.basket_type, &version, slot.as_ref(), now).map_err(LifecycleError::guard)?;
        if basket.basket_type == BasketType::SingleDay && self.calendar.is_after_close(now) {
            return Err(LifecycleError::guard(format!(
                "Market has closed for {}",
                self.calendar.local_date(now)
            )));
        }
        let expires_at =
            derive_expires_at(basket.basket_type, slot.as_ref(), now, &self.calendar).map_err(LifecycleError::guard)?;

        let grant = NewSubscription {
            user_id,
            basket_id,
            basket_version_id: version.id,
            subscribed_at: now,
            expires_at,
        };
        let subscription = match self.store.subscriptions.insert(&mut tx, &grant).await {
            Ok(subscription) => subscription,
            Err(DatabaseError::UniqueViolation(_)) => {
                let existing = self.store.subscriptions.find_active(&mut tx, user_id, basket_id).await?;
                return Err(LifecycleError::AlreadySubscribed {
                    user_id,
                    basket_id,
                    subscription_id: existing.map(|s| s.id).unwrap_or_default(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let entry = NewHistoryEntry::new(version.id, HistoryAction::Subscribed, Actor::user(user_id)).with_metadata(json!({
            "subscription_id": subscription.id,
            "expires_at": subscription.expires_at,
        }));
        self.store.history.append(&mut tx, &entry, now).await?;
        tx.commit().await.map_err(DatabaseError::from)?;

        info!(
            "User {} subscribed to basket {} v{} (expires {:?})",
            user_id, basket_id, version.version_number, subscription.expires_at
        );
        Ok(subscription)
    }

    /// ACTIVE -> CANCELLED
    pub async fn cancel_subscription(&self, subscription_id: i64, user_id: i64) -> LifecycleResult<BasketSubscription> {
        let now = self.clock.now();

        let mut tx = self.store.begin().await?;
        let subscription = self
            .store
            .subscriptions
            .find(&mut tx, subscription_id)
            .await?
            .filter(|s| s.user_id == user_id)
            .ok_or_else(|| LifecycleError::not_found("Subscription", subscription_id))?;

        if !self.store.subscriptions.cancel(&mut tx, subscription_id, now).await? {
            return Err(LifecycleError::guard(format!(
                "Subscription {} is {}, not ACTIVE",
                subscription_id, subscription.status
            )));
        }

        let entry = NewHistoryEntry::new(
            subscription.basket_version_id,
            HistoryAction::SubscriptionCancelled,
            Actor::user(user_id),
        )
        .with_metadata(json!({ "subscription_id": subscription_id }));
        self.store.history.append(&mut tx, &entry, now).await?;

        let updated = self
            .store
            .subscriptions
            .find(&mut tx, subscription_id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("Subscription", subscription_id))?;
        tx.commit().await.map_err(DatabaseError::from)?;

        Ok(updated)
    }

    // ------------------------------------------------------------------
    // Read models
    // ------------------------------------------------------------------

    pub async fn get_basket(&self, basket_id: i64) -> LifecycleResult<Basket> {
        self.store
            .baskets
            .get_basket(basket_id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("Basket", basket_id))
    }

    pub async fn get_version(&self, version_id: i64) -> LifecycleResult<BasketVersion> {
        self.store
            .baskets
            .get_version(version_id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("Basket version", version_id))
    }

    pub async fn get_time_slot(&self, version_id: i64) -> LifecycleResult<BasketTimeSlot> {
        self.store
            .slots
            .get_by_version(version_id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("Time slot for version", version_id))
    }

    pub async fn list_versions(&self, basket_id: i64) -> LifecycleResult<Vec<BasketVersion>> {
        Ok(self.store.baskets.list_versions(basket_id).await?)
    }

    pub async fn list_instruments(&self, version_id: i64) -> LifecycleResult<Vec<BasketInstrument>> {
        Ok(self.store.baskets.list_instruments(version_id).await?)
    }

    pub async fn history(&self, version_id: i64) -> LifecycleResult<Vec<BasketHistory>> {
        Ok(self.store.history.list_for_version(version_id).await?)
    }

    pub async fn user_subscriptions(&self, user_id: i64) -> LifecycleResult<Vec<BasketSubscription>> {
        Ok(self.store.subscriptions.list_for_user(user_id).await?)
    }

    // ------------------------------------------------------------------

    async fn price_snapshot(&self, version_id: i64) -> Option<f64> {
        let instruments = match self.store.baskets.list_instruments(version_id).await {
            Ok(instruments) if !instruments.is_empty() => instruments,
            Ok(_) => return None,
            Err(e) => {
                warn!("Could not load instruments of version {} for pricing: {}", version_id, e);
                return None;
            }
        };

        match snapshot_value(self.prices.as_ref(), &instruments).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Approval price snapshot for version {} unavailable: {}", version_id, e);
                None
            }
        }
    }

    fn notify_unpublished(&self, basket: &Basket, unpublished: &Superseded) {
        let mut recipients = vec![Recipient::Amc(basket.amc_id)];
        recipients.extend(unpublished.effects.expired_subscribers.iter().map(|id| Recipient::User(*id)));
        self.notifier.notify(
            LifecycleEvent::BasketUnpublished {
                basket_id: basket.id,
                version_id: unpublished.version.id,
            },
            recipients,
        );
    }
}

fn ensure_owner(basket: &Basket, amc_id: i64) -> LifecycleResult<()> {
    if basket.is_owned_by(amc_id) {
        Ok(())
    } else {
        Err(LifecycleError::guard(format!(
            "Basket {} is not owned by AMC {}",
            basket.id, amc_id
        )))
    }
}
