//! Notification Dispatcher Trait
//!
//! Lifecycle events are handed to an external dispatcher which renders and
//! delivers user-facing messages. Delivery is fire-and-forget: `notify` never
//! blocks and its outcome never affects a transition. Callers only notify
//! after the owning transaction has committed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Events emitted by the lifecycle core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    VersionSubmitted {
        basket_id: i64,
        version_id: i64,
    },
    VersionApproved {
        basket_id: i64,
        version_id: i64,
        scheduled_start: Option<DateTime<Utc>>,
    },
    VersionRejected {
        basket_id: i64,
        version_id: i64,
        reason: String,
    },
    BasketPublished {
        basket_id: i64,
        version_id: i64,
    },
    BasketExpired {
        basket_id: i64,
        version_id: i64,
    },
    BasketUnpublished {
        basket_id: i64,
        version_id: i64,
    },
    SubscriptionExpiring {
        subscription_id: i64,
        basket_id: i64,
        expires_at: DateTime<Utc>,
    },
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::VersionSubmitted { .. } => "version_submitted",
            LifecycleEvent::VersionApproved { .. } => "version_approved",
            LifecycleEvent::VersionRejected { .. } => "version_rejected",
            LifecycleEvent::BasketPublished { .. } => "basket_published",
            LifecycleEvent::BasketExpired { .. } => "basket_expired",
            LifecycleEvent::BasketUnpublished { .. } => "basket_unpublished",
            LifecycleEvent::SubscriptionExpiring { .. } => "subscription_expiring",
        }
    }
}

/// Who should hear about an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    Amc(i64),
    Admins,
    User(i64),
}

pub trait Notifier: Send + Sync {
    /// Hand off an event. Must not block and must not fail the caller.
    fn notify(&self, event: LifecycleEvent, recipients: Vec<Recipient>);
}
