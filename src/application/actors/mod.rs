pub mod scheduler_actor;

pub use scheduler_actor::*;
