//! Database Models
//!
//! Row shapes as stored in SQLite. Enumerations are stored as text and parsed
//! back into domain types on the way out.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::DatabaseError;
use crate::domain::entities::basket::{Basket, BasketType};
use crate::domain::entities::basket_version::{BasketVersion, VersionStatus};
use crate::domain::entities::history::{Actor, ActorKind, BasketHistory, HistoryAction};
use crate::domain::entities::instrument::BasketInstrument;
use crate::domain::entities::subscription::{BasketSubscription, SubscriptionStatus};
use crate::domain::entities::time_slot::BasketTimeSlot;

fn corrupt(table: &'static str) -> impl FnOnce(String) -> DatabaseError {
    move |reason| DatabaseError::CorruptRow { table, reason }
}

/// Basket record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BasketRecord {
    pub id: i64,
    pub amc_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub basket_type: String, // "hour_bound", "single_day" or "perpetual"
    pub current_version_id: Option<i64>,
    pub subscription_fee: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<BasketRecord> for Basket {
    type Error = DatabaseError;

    fn try_from(record: BasketRecord) -> Result<Self, Self::Error> {
        Ok(Basket {
            id: record.id,
            amc_id: record.amc_id,
            name: record.name,
            description: record.description,
            basket_type: record.basket_type.parse::<BasketType>().map_err(corrupt("baskets"))?,
            current_version_id: record.current_version_id,
            subscription_fee: record.subscription_fee,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

/// Basket version record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BasketVersionRecord {
    pub id: i64,
    pub basket_id: i64,
    pub version_number: i64,
    pub status: String,
    pub submitted_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<i64>,
    pub rejection_reason: Option<String>,
    pub price_at_approval: Option<f64>,
    pub trading_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<BasketVersionRecord> for BasketVersion {
    type Error = DatabaseError;

    fn try_from(record: BasketVersionRecord) -> Result<Self, Self::Error> {
        Ok(BasketVersion {
            id: record.id,
            basket_id: record.basket_id,
            version_number: record.version_number,
            status: record.status.parse::<VersionStatus>().map_err(corrupt("basket_versions"))?,
            submitted_at: record.submitted_at,
            approved_at: record.approved_at,
            approved_by: record.approved_by,
            rejection_reason: record.rejection_reason,
            price_at_approval: record.price_at_approval,
            trading_date: record.trading_date,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

/// Constituent record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InstrumentRecord {
    pub id: i64,
    pub basket_version_id: i64,
    pub instrument_token: String,
    pub symbol: String,
    pub exchange: String,
    pub quantity: f64,
    pub weight: f64,
}

impl From<InstrumentRecord> for BasketInstrument {
    fn from(record: InstrumentRecord) -> Self {
        BasketInstrument {
            id: record.id,
            basket_version_id: record.basket_version_id,
            instrument_token: record.instrument_token,
            symbol: record.symbol,
            exchange: record.exchange,
            quantity: record.quantity,
            weight: record.weight,
        }
    }
}

/// Time slot record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TimeSlotRecord {
    pub id: i64,
    pub basket_version_id: i64,
    pub scheduled_date: NaiveDate,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_minutes: i64,
    pub timezone: String,
    pub set_by: i64,
    pub actual_publish_time: Option<DateTime<Utc>>,
    pub actual_expire_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl From<TimeSlotRecord> for BasketTimeSlot {
    fn from(record: TimeSlotRecord) -> Self {
        BasketTimeSlot {
            id: record.id,
            basket_version_id: record.basket_version_id,
            scheduled_date: record.scheduled_date,
            start_time: record.start_time,
            end_time: record.end_time,
            duration_minutes: record.duration_minutes,
            timezone: record.timezone,
            set_by: record.set_by,
            actual_publish_time: record.actual_publish_time,
            actual_expire_time: record.actual_expire_time,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Subscription record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SubscriptionRecord {
    pub id: i64,
    pub user_id: i64,
    pub basket_id: i64,
    pub basket_version_id: i64,
    pub subscribed_at: DateTime<Utc>,
    pub status: String, // "ACTIVE", "EXPIRED" or "CANCELLED"
    pub expires_at: Option<DateTime<Utc>>,
    pub reminder_sent: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<SubscriptionRecord> for BasketSubscription {
    type Error = DatabaseError;

    fn try_from(record: SubscriptionRecord) -> Result<Self, Self::Error> {
        Ok(BasketSubscription {
            id: record.id,
            user_id: record.user_id,
            basket_id: record.basket_id,
            basket_version_id: record.basket_version_id,
            subscribed_at: record.subscribed_at,
            status: record.status.parse::<SubscriptionStatus>().map_err(corrupt("basket_subscriptions"))?,
            expires_at: record.expires_at,
            reminder_sent: record.reminder_sent,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

/// History record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct HistoryRecord {
    pub id: i64,
    pub basket_version_id: i64,
    pub action: String,
    pub actor_kind: String,
    pub actor_id: i64,
    pub comment: Option<String>,
    pub metadata: String, // JSON string
    pub created_at: DateTime<Utc>,
}

impl TryFrom<HistoryRecord> for BasketHistory {
    type Error = DatabaseError;

    fn try_from(record: HistoryRecord) -> Result<Self, Self::Error> {
        let metadata = serde_json::from_str(&record.metadata)
            .map_err(|e| DatabaseError::CorruptRow {
                table: "basket_history",
                reason: format!("invalid metadata: {}", e),
            })?;

        Ok(BasketHistory {
            id: record.id,
            basket_version_id: record.basket_version_id,
            action: record.action.parse::<HistoryAction>().map_err(corrupt("basket_history"))?,
            actor: Actor {
                kind: record.actor_kind.parse::<ActorKind>().map_err(corrupt("basket_history"))?,
                id: record.actor_id,
            },
            comment: record.comment,
            metadata,
            created_at: record.created_at,
        })
    }
}

/// Version joined with its basket's type, as selected by the sweeps
#[derive(Debug, Clone, FromRow)]
pub struct DueVersionRecord {
    pub version_id: i64,
    pub basket_id: i64,
    pub basket_type: String,
    pub slot_id: Option<i64>,
    pub boundary: Option<DateTime<Utc>>,
}
