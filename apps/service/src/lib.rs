//! Vigil: self-hosted uptime monitoring engine.
//!
//! One task per monitor runs a pluggable check, folds the outcome into the
//! retry/importance state machine, records a heartbeat and notifies on state
//! changes.

pub mod bus;
pub mod config;
pub mod database;
pub mod monitoring;
pub mod notification;
pub mod orchestrator;
pub mod pool;
pub mod stats;
