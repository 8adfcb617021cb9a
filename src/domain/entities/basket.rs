use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Temporal policy of a basket, fixed when the basket is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BasketType {
    /// Published inside an explicit start/end window on a given date
    HourBound,
    /// Published for one trading day, expires at the market-close cutoff
    SingleDay,
    /// Never expires through time
    Perpetual,
}

impl BasketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BasketType::HourBound => "hour_bound",
            BasketType::SingleDay => "single_day",
            BasketType::Perpetual => "perpetual",
        }
    }

    /// Whether versions of this type need a time slot to be approved
    pub fn requires_time_slot(&self) -> bool {
        matches!(self, BasketType::HourBound)
    }

    /// Whether subscriptions to this type carry an expiry timestamp
    pub fn expires(&self) -> bool {
        !matches!(self, BasketType::Perpetual)
    }
}

impl std::fmt::Display for BasketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BasketType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hour_bound" => Ok(BasketType::HourBound),
            "single_day" => Ok(BasketType::SingleDay),
            "perpetual" => Ok(BasketType::Perpetual),
            other => Err(format!("Unknown basket type: {}", other)),
        }
    }
}

/// Stable identity of a product line owned by one AMC
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Basket {
    pub id: i64,
    pub amc_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub basket_type: BasketType,
    /// Only ever points at a version that has left DRAFT
    pub current_version_id: Option<i64>,
    pub subscription_fee: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Basket {
    pub fn is_owned_by(&self, amc_id: i64) -> bool {
        self.amc_id == amc_id
    }
}

/// Input for creating a basket together with its first draft version
#[derive(Debug, Clone)]
pub struct NewBasket {
    pub name: String,
    pub description: Option<String>,
    pub basket_type: BasketType,
    pub subscription_fee: f64,
    pub instruments: Vec<super::instrument::NewInstrument>,
    /// Only meaningful for single-day baskets
    pub trading_date: Option<chrono::NaiveDate>,
}

impl NewBasket {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Basket name must not be empty".to_string());
        }
        if !self.subscription_fee.is_finite() || self.subscription_fee < 0.0 {
            return Err("Subscription fee must be a non-negative amount".to_string());
        }
        for instrument in &self.instruments {
            instrument.validate()?;
        }
        Ok(())
    }
}
