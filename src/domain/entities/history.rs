//! Append-only audit trail of basket version transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorKind {
    Amc,
    Admin,
    System,
    User,
}

impl ActorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorKind::Amc => "AMC",
            ActorKind::Admin => "ADMIN",
            ActorKind::System => "SYSTEM",
            ActorKind::User => "USER",
        }
    }
}

impl FromStr for ActorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AMC" => Ok(ActorKind::Amc),
            "ADMIN" => Ok(ActorKind::Admin),
            "SYSTEM" => Ok(ActorKind::System),
            "USER" => Ok(ActorKind::User),
            other => Err(format!("Unknown actor kind: {}", other)),
        }
    }
}

/// Whoever caused a transition. The id lives in the identity space named by the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub kind: ActorKind,
    pub id: i64,
}

impl Actor {
    pub fn amc(id: i64) -> Self {
        Self { kind: ActorKind::Amc, id }
    }

    pub fn admin(id: i64) -> Self {
        Self { kind: ActorKind::Admin, id }
    }

    pub fn user(id: i64) -> Self {
        Self { kind: ActorKind::User, id }
    }

    /// The scanner and daily sweeps
    pub fn system() -> Self {
        Self { kind: ActorKind::System, id: 0 }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.kind.as_str(), self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryAction {
    Created,
    Submitted,
    Approved,
    Rejected,
    Published,
    Expired,
    Unpublished,
    Subscribed,
    SubscriptionCancelled,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Created => "CREATED",
            HistoryAction::Submitted => "SUBMITTED",
            HistoryAction::Approved => "APPROVED",
            HistoryAction::Rejected => "REJECTED",
            HistoryAction::Published => "PUBLISHED",
            HistoryAction::Expired => "EXPIRED",
            HistoryAction::Unpublished => "UNPUBLISHED",
            HistoryAction::Subscribed => "SUBSCRIBED",
            HistoryAction::SubscriptionCancelled => "SUBSCRIPTION_CANCELLED",
        }
    }
}

impl FromStr for HistoryAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(HistoryAction::Created),
            "SUBMITTED" => Ok(HistoryAction::Submitted),
            "APPROVED" => Ok(HistoryAction::Approved),
            "REJECTED" => Ok(HistoryAction::Rejected),
            "PUBLISHED" => Ok(HistoryAction::Published),
            "EXPIRED" => Ok(HistoryAction::Expired),
            "UNPUBLISHED" => Ok(HistoryAction::Unpublished),
            "SUBSCRIBED" => Ok(HistoryAction::Subscribed),
            "SUBSCRIPTION_CANCELLED" => Ok(HistoryAction::SubscriptionCancelled),
            other => Err(format!("Unknown history action: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasketHistory {
    pub id: i64,
    pub basket_version_id: i64,
    pub action: HistoryAction,
    pub actor: Actor,
    pub comment: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// History row to append
#[derive(Debug, Clone)]
pub struct NewHistoryEntry {
    pub basket_version_id: i64,
    pub action: HistoryAction,
    pub actor: Actor,
    pub comment: Option<String>,
    pub metadata: serde_json::Value,
}

impl NewHistoryEntry {
    pub fn new(basket_version_id: i64, action: HistoryAction, actor: Actor) -> Self {
        Self {
            basket_version_id,
            action,
            actor,
            comment: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
