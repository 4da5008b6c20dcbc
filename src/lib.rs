//! Signal Arbiter Library
//!
//! Admission and decision core for an automated trading agent: scores each
//! incoming signal against a portfolio snapshot, arbitrates conflicting
//! objectives and decides whether, and how large, to trade.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod strategy;
pub mod telemetry;

// Re-export commonly used types
pub use cache::{CacheMaintenance, TieredCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, ConfigSource, SharedConfig};
pub use error::{Error, Result};
pub use strategy::{ConflictResolver, DecisionEngine, DecisionResult, Signal, TradingState};
