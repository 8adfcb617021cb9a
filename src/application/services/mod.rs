pub mod lifecycle_service;
pub mod scanner;
pub mod transitions;
pub mod valuation;

pub use lifecycle_service::{ApprovalRequest, BasketLifecycleService};
pub use scanner::{MarketCloseReport, ReminderReport, Sweep, SweepError, TickReport, TransitionScanner};
pub use valuation::{Valuation, ValuationService};
