use serde::{Deserialize, Serialize};

/// A constituent instrument of a basket version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasketInstrument {
    pub id: i64,
    pub basket_version_id: i64,
    /// Broker token used for price lookups
    pub instrument_token: String,
    pub symbol: String,
    pub exchange: String,
    pub quantity: f64,
    pub weight: f64,
}

#[derive(Debug, Clone)]
pub struct NewInstrument {
    pub instrument_token: String,
    pub symbol: String,
    pub exchange: String,
    pub quantity: f64,
    pub weight: f64,
}

impl NewInstrument {
    pub fn new(instrument_token: &str, symbol: &str, exchange: &str, quantity: f64, weight: f64) -> Self {
        Self {
            instrument_token: instrument_token.to_string(),
            symbol: symbol.to_string(),
            exchange: exchange.to_string(),
            quantity,
            weight,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.instrument_token.trim().is_empty() {
            return Err("Instrument token must not be empty".to_string());
        }
        if !self.quantity.is_finite() || self.quantity <= 0.0 {
            return Err(format!(
                "Quantity for {} must be positive",
                self.symbol
            ));
        }
        if !self.weight.is_finite() || !(0.0..=100.0).contains(&self.weight) {
            return Err(format!(
                "Weight for {} must be between 0 and 100",
                self.symbol
            ));
        }
        Ok(())
    }
}
