//! State reconciliation for private user data

pub mod engine;
pub mod state;

pub use engine::{EngineConfig, Unsubscribe, UserDataEngine};
pub use state::{OrderChange, UserDataState};
