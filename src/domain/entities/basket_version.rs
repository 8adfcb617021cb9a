use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Lifecycle state of a basket version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VersionStatus {
    Draft,
    PendingApproval,
    Scheduled,
    Published,
    Expired,
    Unpublished,
    Rejected,
}

impl VersionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionStatus::Draft => "DRAFT",
            VersionStatus::PendingApproval => "PENDING_APPROVAL",
            VersionStatus::Scheduled => "SCHEDULED",
            VersionStatus::Published => "PUBLISHED",
            VersionStatus::Expired => "EXPIRED",
            VersionStatus::Unpublished => "UNPUBLISHED",
            VersionStatus::Rejected => "REJECTED",
        }
    }

    /// No event leads out of a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            VersionStatus::Expired | VersionStatus::Unpublished | VersionStatus::Rejected
        )
    }

    /// The version has left DRAFT and may be referenced as the basket's current version
    pub fn has_left_draft(&self) -> bool {
        !matches!(self, VersionStatus::Draft)
    }

    /// Statuses under which the AMC still works on the version
    pub fn is_open(&self) -> bool {
        matches!(self, VersionStatus::Draft | VersionStatus::PendingApproval)
    }
}

impl std::fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VersionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(VersionStatus::Draft),
            "PENDING_APPROVAL" => Ok(VersionStatus::PendingApproval),
            "SCHEDULED" => Ok(VersionStatus::Scheduled),
            "PUBLISHED" => Ok(VersionStatus::Published),
            "EXPIRED" => Ok(VersionStatus::Expired),
            "UNPUBLISHED" => Ok(VersionStatus::Unpublished),
            "REJECTED" => Ok(VersionStatus::Rejected),
            other => Err(format!("Unknown version status: {}", other)),
        }
    }
}

/// One snapshot of a basket's composition and its lifecycle status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasketVersion {
    pub id: i64,
    pub basket_id: i64,
    /// Contiguous per basket, starting at 1, never reused
    pub version_number: i64,
    pub status: VersionStatus,
    pub submitted_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<i64>,
    pub rejection_reason: Option<String>,
    pub price_at_approval: Option<f64>,
    /// Single-day baskets only
    pub trading_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
