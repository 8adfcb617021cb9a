pub mod clock;
pub mod expiry;
pub mod market_calendar;
pub mod state_machine;
