//! Transactional building blocks shared by human-triggered operations and the scanner.
//!
//! Every function here runs on a connection the caller owns, normally an open
//! transaction, and never commits.

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::info;

use crate::domain::entities::basket::Basket;
use crate::domain::entities::basket_version::BasketVersion;
use crate::domain::entities::history::{Actor, NewHistoryEntry};
use crate::domain::errors::{LifecycleError, LifecycleResult};
use crate::domain::services::state_machine::{self, Transition, VersionEvent};
use crate::persistence::basket_repository::StatusChange;
use crate::persistence::{DatabaseError, DbConn, LifecycleStore};

/// Outcome of writing one transition
#[derive(Debug, Clone, Default)]
pub struct TransitionEffects {
    /// Users whose subscriptions were expired by the cascade
    pub expired_subscribers: Vec<i64>,
}

/// A sibling pushed out of PUBLISHED by a newer version
#[derive(Debug, Clone)]
pub struct Superseded {
    pub version: BasketVersion,
    pub effects: TransitionEffects,
}

/// Write a resolved transition: guarded status update, subscription cascade
/// when leaving PUBLISHED, and the history row.
///
/// `fill` sets the optional columns (submitted_at, approved_by, ...).
#[allow(clippy::too_many_arguments)]
pub async fn write_transition(
    store: &LifecycleStore,
    conn: &mut DbConn,
    version: &BasketVersion,
    transition: Transition,
    actor: Actor,
    now: DateTime<Utc>,
    comment: Option<String>,
    fill: impl FnOnce(&mut StatusChange),
) -> LifecycleResult<TransitionEffects> {
    let mut change = StatusChange::new(version.id, transition.from, transition.to, now);
    fill(&mut change);

    // Contention left over despite the write lock still means another writer got there first
    let changed = match store.baskets.change_status(conn, &change).await {
        Ok(changed) => changed,
        Err(DatabaseError::Busy(_)) => false,
        Err(e) => return Err(e.into()),
    };
    if !changed {
        return Err(LifecycleError::ConcurrentModification {
            version_id: version.id,
            expected: transition.from,
        });
    }

    let mut effects = TransitionEffects::default();
    if transition.leaves_published() {
        effects.expired_subscribers = store.subscriptions.active_user_ids(conn, version.id).await?;
        store.subscriptions.expire_for_version(conn, version.id, now).await?;
    }

    let mut entry = NewHistoryEntry::new(version.id, transition.history_action(), actor)
        .with_metadata(json!({
            "from": transition.from,
            "to": transition.to,
            "event": transition.event,
            "basket_id": version.basket_id,
            "version_number": version.version_number,
            "expired_subscriptions": effects.expired_subscribers.len(),
        }));
    if let Some(comment) = comment {
        entry = entry.with_comment(comment);
    }
    store.history.append(conn, &entry, now).await?;

    info!(
        "Basket {} v{} (version {}): {} -> {} by {}",
        version.basket_id,
        version.version_number,
        version.id,
        transition.from,
        transition.to,
        actor
    );
    Ok(effects)
}

/// Demote whichever sibling of `incoming` still holds PUBLISHED.
///
/// Must run before `incoming` is written as PUBLISHED, otherwise the
/// one-published-per-basket index rejects the write.
pub async fn supersede_published_sibling(
    store: &LifecycleStore,
    conn: &mut DbConn,
    basket: &Basket,
    incoming: &BasketVersion,
    actor: Actor,
    now: DateTime<Utc>,
) -> LifecycleResult<Option<Superseded>> {
    let sibling = match store.baskets.find_published_version(conn, basket.id).await? {
        Some(sibling) if sibling.id != incoming.id => sibling,
        _ => return Ok(None),
    };

    let transition = state_machine::transition(sibling.status, VersionEvent::Superseded, basket.basket_type)?;
    let effects = write_transition(
        store,
        conn,
        &sibling,
        transition,
        actor,
        now,
        Some(format!("Superseded by version {}", incoming.version_number)),
        |_| {},
    )
    .await?;

    Ok(Some(Superseded {
        version: sibling,
        effects,
    }))
}

/// Reload a version inside the transaction, or fail with `NotFound`
pub async fn load_version(
    store: &LifecycleStore,
    conn: &mut DbConn,
    version_id: i64,
) -> LifecycleResult<BasketVersion> {
    store
        .baskets
        .find_version(conn, version_id)
        .await?
        .ok_or_else(|| LifecycleError::not_found("Basket version", version_id))
}

pub async fn load_basket(store: &LifecycleStore, conn: &mut DbConn, basket_id: i64) -> LifecycleResult<Basket> {
    store
        .baskets
        .find_basket(conn, basket_id)
        .await?
        .ok_or_else(|| LifecycleError::not_found("Basket", basket_id))
}
