//! Persistence layer for crash recovery
//!
//! Strategy counters, stop-loss flags and open orders are checkpointed to a
//! JSON file and restored on start.

pub mod state_store;

pub use state_store::{roll_daily, roll_monthly, PersistedState, StateStore};
