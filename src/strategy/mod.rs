//! Decision strategy
//!
//! ## Gates
//! - `circuit_breaker` - Systemic halt with timeout-based recovery
//! - `safety` - Hard preconditions (margin, positions, cooldown, rate, health)
//!
//! ## Analysis
//! - `zones` - Price-zone clustering analysis
//! - `scoring` - Five factor scores and weighted aggregation
//!
//! ## Arbitration
//! - `resolution` - The six two-option strategies
//! - `resolver` - Category routing, history and outcome feedback
//!
//! ## Decision
//! - `engine` - Pipeline coordinator
//! - `sizing` - Lot size calculator
//! - `ledger` - Bounded decision history

// Shared types
pub mod types;

// Gates
pub mod circuit_breaker;
pub mod safety;

// Analysis
pub mod scoring;
pub mod zones;

// Arbitration
pub mod resolution;
pub mod resolver;

// Decision
pub mod engine;
pub mod ledger;
pub mod sizing;

// Re-exports
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
pub use engine::{DecisionEngine, DecisionStatistics};
pub use ledger::{DecisionLedger, DecisionRecord, StateSummary};
pub use resolution::{arbiter_for, Arbiter, Arbitration, ArbitrationInput};
pub use resolver::{CategoryStats, ConflictResolver, ResolverStatistics};
pub use safety::SafetyBlock;
pub use scoring::{weighted_score, FactorScorer};
pub use sizing::{LotSizingConfig, PositionSizer, SizeExplanation, SizingContext};
pub use types::*;
pub use zones::ZoneAnalysis;
