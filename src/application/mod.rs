pub mod actors;
pub mod runtime;
pub mod services;
