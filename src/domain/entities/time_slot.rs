use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Publication window of an hour-bound basket version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasketTimeSlot {
    pub id: i64,
    pub basket_version_id: i64,
    pub scheduled_date: NaiveDate,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Stored redundantly for audit
    pub duration_minutes: i64,
    pub timezone: String,
    pub set_by: i64,
    /// Stamped by the scanner when the version is published
    pub actual_publish_time: Option<DateTime<Utc>>,
    /// Stamped by the scanner when the version is expired
    pub actual_expire_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BasketTimeSlot {
    /// Half-open window check: `[start, end)`
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now && now < self.end_time
    }

    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        now >= self.end_time
    }

    pub fn duration(&self) -> Duration {
        self.end_time - self.start_time
    }
}

/// A validated window, ready to be persisted alongside an approval
#[derive(Debug, Clone, PartialEq)]
pub struct SlotWindow {
    pub scheduled_date: NaiveDate,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub timezone: String,
}

impl SlotWindow {
    pub fn new(
        scheduled_date: NaiveDate,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        timezone: String,
    ) -> Result<Self, String> {
        if end_time <= start_time {
            return Err(format!(
                "Slot end {} must be after start {}",
                end_time, start_time
            ));
        }
        Ok(Self {
            scheduled_date,
            start_time,
            end_time,
            timezone,
        })
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }
}
