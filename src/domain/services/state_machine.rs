//! Basket Version State Machine
//!
//! Authoritative transition table for basket versions. Both human actions
//! (AMC submit, admin approve/reject/unpublish) and the scanner resolve their
//! target status here before touching storage.
//!
//! ```text
//!  DRAFT ──submit──▶ PENDING_APPROVAL ──approve(hour-bound)──▶ SCHEDULED ──window opens──▶ PUBLISHED
//!                         │   └──────approve(single-day / perpetual)─────────────────────▶ PUBLISHED
//!                         └──reject──▶ REJECTED
//!
//!  PUBLISHED ──window ends (hour-bound)──▶ EXPIRED
//!  PUBLISHED ──market close (single-day)──▶ EXPIRED
//!  PUBLISHED ──unpublish / superseded──▶ UNPUBLISHED
//! ```
//!
//! A rejected version is never resurrected: the AMC retries with a new DRAFT
//! version numbered max + 1.

use serde::{Deserialize, Serialize};

use crate::domain::entities::basket::BasketType;
use crate::domain::entities::basket_version::VersionStatus;
use crate::domain::entities::history::{ActorKind, HistoryAction};
use crate::domain::errors::{LifecycleError, LifecycleResult};

/// Everything that may move a basket version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionEvent {
    Submit,
    Approve,
    Reject,
    /// Scanner observed `now` inside the slot window
    WindowOpened,
    /// Scanner observed `now` at or past the slot end
    WindowClosed,
    /// Daily market-close sweep
    MarketClosed,
    /// Manual admin unpublish
    Unpublish,
    /// A sibling version was published over this one
    Superseded,
}

impl VersionEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionEvent::Submit => "submit",
            VersionEvent::Approve => "approve",
            VersionEvent::Reject => "reject",
            VersionEvent::WindowOpened => "publish at window start",
            VersionEvent::WindowClosed => "expire at window end",
            VersionEvent::MarketClosed => "expire at market close",
            VersionEvent::Unpublish => "unpublish",
            VersionEvent::Superseded => "supersede",
        }
    }

    /// Who is allowed to trigger the event
    pub fn actor_kind(&self) -> ActorKind {
        match self {
            VersionEvent::Submit => ActorKind::Amc,
            VersionEvent::Approve | VersionEvent::Reject | VersionEvent::Unpublish => {
                ActorKind::Admin
            }
            VersionEvent::WindowOpened | VersionEvent::WindowClosed | VersionEvent::MarketClosed => {
                ActorKind::System
            }
            // Inherits the actor of the transition that published the sibling
            VersionEvent::Superseded => ActorKind::System,
        }
    }
}

impl std::fmt::Display for VersionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A resolved, legal transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: VersionStatus,
    pub to: VersionStatus,
    pub event: VersionEvent,
}

impl Transition {
    /// History action recorded for this transition
    pub fn history_action(&self) -> HistoryAction {
        match self.event {
            VersionEvent::Submit => HistoryAction::Submitted,
            VersionEvent::Approve => HistoryAction::Approved,
            VersionEvent::Reject => HistoryAction::Rejected,
            VersionEvent::WindowOpened => HistoryAction::Published,
            VersionEvent::WindowClosed | VersionEvent::MarketClosed => HistoryAction::Expired,
            VersionEvent::Unpublish | VersionEvent::Superseded => HistoryAction::Unpublished,
        }
    }

    /// Whether the version stops being PUBLISHED, which expires its subscriptions
    pub fn leaves_published(&self) -> bool {
        self.from == VersionStatus::Published && self.to != VersionStatus::Published
    }

    /// Whether the version becomes the basket's published version
    pub fn enters_published(&self) -> bool {
        self.to == VersionStatus::Published && self.from != VersionStatus::Published
    }
}

/// Resolve the next status for `event`, or fail with `InvalidTransition`
pub fn transition(
    from: VersionStatus,
    event: VersionEvent,
    basket_type: BasketType,
) -> LifecycleResult<Transition> {
    use BasketType::*;
    use VersionEvent::*;
    use VersionStatus::*;

    let to = match (from, event, basket_type) {
        (Draft, Submit, _) => PendingApproval,
        (PendingApproval, Approve, HourBound) => Scheduled,
        (PendingApproval, Approve, SingleDay | Perpetual) => Published,
        (PendingApproval, Reject, _) => Rejected,
        (Scheduled, WindowOpened, HourBound) => Published,
        (Published, WindowClosed, HourBound) => Expired,
        (Published, MarketClosed, SingleDay) => Expired,
        (Published, Unpublish | Superseded, _) => Unpublished,
        _ => return Err(LifecycleError::InvalidTransition { from, event }),
    };

    Ok(Transition { from, to, event })
}

/// Events that are legal from `from` for a basket of `basket_type`
pub fn allowed_events(from: VersionStatus, basket_type: BasketType) -> Vec<VersionEvent> {
    [
        VersionEvent::Submit,
        VersionEvent::Approve,
        VersionEvent::Reject,
        VersionEvent::WindowOpened,
        VersionEvent::WindowClosed,
        VersionEvent::MarketClosed,
        VersionEvent::Unpublish,
        VersionEvent::Superseded,
    ]
    .into_iter()
    .filter(|event| transition(from, *event, basket_type).is_ok())
    .collect()
}

/// Position of a status along any root-to-leaf path of the transition graph.
/// Every legal transition strictly increases the rank.
pub fn rank(status: VersionStatus) -> u8 {
    match status {
        VersionStatus::Draft => 0,
        VersionStatus::PendingApproval => 1,
        VersionStatus::Scheduled => 2,
        VersionStatus::Published => 3,
        VersionStatus::Expired | VersionStatus::Unpublished | VersionStatus::Rejected => 4,
    }
}
