//! Basket Lifecycle Library
//!
//! Versioned investment baskets: the version state machine, the time-windowed
//! transition scanner and its scheduler, subscription expiry and the history
//! audit log, stored in SQLite.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
pub mod task_runner;
