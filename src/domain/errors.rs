use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::entities::basket_version::VersionStatus;
use crate::domain::services::state_machine::VersionEvent;

/// Stable error kinds handed to callers alongside the message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotFound,
    InvalidTransition,
    GuardFailed,
    ConcurrentModification,
    AlreadySubscribed,
    PersistenceError,
}

#[derive(Debug, Error, Clone)]
pub enum LifecycleError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Cannot {event} a version in {from} state")]
    InvalidTransition {
        from: VersionStatus,
        event: VersionEvent,
    },

    #[error("{0}")]
    GuardFailed(String),

    #[error("Basket version {version_id} is no longer {expected}")]
    ConcurrentModification {
        version_id: i64,
        expected: VersionStatus,
    },

    #[error("User {user_id} already holds active subscription {subscription_id} to basket {basket_id}")]
    AlreadySubscribed {
        user_id: i64,
        basket_id: i64,
        subscription_id: i64,
    },

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl LifecycleError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        LifecycleError::NotFound { entity, id }
    }

    pub fn guard(reason: impl Into<String>) -> Self {
        LifecycleError::GuardFailed(reason.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LifecycleError::NotFound { .. } => ErrorKind::NotFound,
            LifecycleError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            LifecycleError::GuardFailed(_) => ErrorKind::GuardFailed,
            LifecycleError::ConcurrentModification { .. } => ErrorKind::ConcurrentModification,
            LifecycleError::AlreadySubscribed { .. } => ErrorKind::AlreadySubscribed,
            LifecycleError::Persistence(_) => ErrorKind::PersistenceError,
        }
    }

    /// Errors the scanner treats as "someone else already moved this row"
    pub fn is_benign_for_scanner(&self) -> bool {
        matches!(
            self,
            LifecycleError::ConcurrentModification { .. } | LifecycleError::InvalidTransition { .. }
        )
    }
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PriceLookupError {
    #[error("No price available for instrument {0}")]
    Unavailable(String),

    #[error("Price source error: {0}")]
    Source(String),

    #[error("Invalid price {price} for instrument {token}")]
    InvalidPrice { token: String, price: f64 },
}
