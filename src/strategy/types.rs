//! Shared types for the decision core
//!
//! Inputs (signal, state snapshot), per-decision scores, the conflict model and
//! the decision result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::error::{ensure_finite, Result};
use crate::strategy::sizing::SizeExplanation;

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Buy,
    Sell,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Buy => write!(f, "buy"),
            Direction::Sell => write!(f, "sell"),
        }
    }
}

/// External trade suggestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub direction: Direction,
    /// Unbounded positive strength, typically 0-3
    pub strength: f64,
    pub rationale: String,
    /// Reference price
    pub price: f64,
}

impl Signal {
    pub fn validate(&self) -> Result<()> {
        ensure_finite("signal.strength", self.strength)?;
        ensure_finite("signal.price", self.price)?;
        Ok(())
    }
}

/// Open position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub ticket: u64,
    pub direction: Direction,
    pub volume: f64,
    pub open_price: f64,
    /// Running profit in account currency
    pub profit: f64,
}

/// Portfolio and risk snapshot supplied with every signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingState {
    pub positions: Vec<Position>,
    pub buy_volume: f64,
    pub sell_volume: f64,
    /// Margin level in percent
    pub margin_level: f64,
    /// Portfolio health, 0-100
    pub portfolio_health: f64,
    pub last_signal_time: Option<DateTime<Utc>>,
    pub signals_this_hour: u32,
    /// Caller's content hash of `positions`; empty when not supplied
    #[serde(default)]
    pub positions_hash: String,
    /// Price distance of net exposure
    #[serde(default)]
    pub exposure_distance: f64,
    #[serde(default)]
    pub market_volatility: Option<f64>,
}

impl Default for TradingState {
    fn default() -> Self {
        Self {
            positions: Vec::new(),
            buy_volume: 0.0,
            sell_volume: 0.0,
            margin_level: 1000.0,
            portfolio_health: 100.0,
            last_signal_time: None,
            signals_this_hour: 0,
            positions_hash: String::new(),
            exposure_distance: 0.0,
            market_volatility: None,
        }
    }
}

impl TradingState {
    pub fn total_volume(&self) -> f64 {
        self.buy_volume + self.sell_volume
    }

    /// Buy share of total volume, `None` without volume
    pub fn buy_ratio(&self) -> Option<f64> {
        let total = self.total_volume();
        if total > 0.0 {
            Some(self.buy_volume / total)
        } else {
            None
        }
    }

    /// Stable hash over ticket, side, volume and open price of every position
    pub fn compute_positions_hash(positions: &[Position]) -> String {
        let mut hasher = Sha256::new();
        for p in positions {
            hasher.update(p.ticket.to_le_bytes());
            hasher.update(p.direction.to_string().as_bytes());
            hasher.update(p.volume.to_le_bytes());
            hasher.update(p.open_price.to_le_bytes());
        }
        let digest = hasher.finalize();
        digest.iter().take(16).map(|b| format!("{:02x}", b)).collect()
    }

    /// Reject non-finite numbers before any comparison sees them
    pub fn validate(&self) -> Result<()> {
        ensure_finite("state.margin_level", self.margin_level)?;
        ensure_finite("state.portfolio_health", self.portfolio_health)?;
        ensure_finite("state.buy_volume", self.buy_volume)?;
        ensure_finite("state.sell_volume", self.sell_volume)?;
        ensure_finite("state.exposure_distance", self.exposure_distance)?;
        if let Some(v) = self.market_volatility {
            ensure_finite("state.market_volatility", v)?;
        }
        for p in &self.positions {
            ensure_finite("position.volume", p.volume)?;
            ensure_finite("position.open_price", p.open_price)?;
            ensure_finite("position.profit", p.profit)?;
        }
        Ok(())
    }
}

/// The five independent decision factors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    Safety,
    Portfolio,
    Zone,
    Balance,
    Signal,
}

impl Factor {
    pub const ALL: [Factor; 5] = [
        Factor::Safety,
        Factor::Portfolio,
        Factor::Zone,
        Factor::Balance,
        Factor::Signal,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Factor::Safety => "safety",
            Factor::Portfolio => "portfolio",
            Factor::Zone => "zone",
            Factor::Balance => "balance",
            Factor::Signal => "signal",
        }
    }

    /// Name of the factor's `decision_weights` key
    pub fn weight_key(&self) -> &'static str {
        match self {
            Factor::Safety => "safety_check",
            Factor::Portfolio => "portfolio_health",
            Factor::Zone => "zone_distribution",
            Factor::Balance => "balance_optimization",
            Factor::Signal => "signal_quality",
        }
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Per-decision factor scores, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FactorScores {
    pub safety: f64,
    pub portfolio: f64,
    pub zone: f64,
    pub balance: f64,
    pub signal: f64,
}

impl FactorScores {
    /// Substitute used when scoring fails
    pub fn neutral() -> Self {
        Self {
            safety: 0.5,
            portfolio: 0.5,
            zone: 0.5,
            balance: 0.5,
            signal: 0.5,
        }
    }

    pub fn get(&self, factor: Factor) -> f64 {
        match factor {
            Factor::Safety => self.safety,
            Factor::Portfolio => self.portfolio,
            Factor::Zone => self.zone,
            Factor::Balance => self.balance,
            Factor::Signal => self.signal,
        }
    }

    pub fn get_mut(&mut self, factor: Factor) -> &mut f64 {
        match factor {
            Factor::Safety => &mut self.safety,
            Factor::Portfolio => &mut self.portfolio,
            Factor::Zone => &mut self.zone,
            Factor::Balance => &mut self.balance,
            Factor::Signal => &mut self.signal,
        }
    }

    /// Multiply one score, keeping it in [0, 1]
    pub fn scale(&mut self, factor: Factor, by: f64) {
        let score = self.get_mut(factor);
        *score = clamp_unit(*score * by);
    }
}

/// Clamp to [0, 1]; NaN becomes 0
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Final action for a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Execute,
    Redirect,
    Skip,
    Close,
    Hedge,
}

impl fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionAction::Execute => write!(f, "execute"),
            DecisionAction::Redirect => write!(f, "redirect"),
            DecisionAction::Skip => write!(f, "skip"),
            DecisionAction::Close => write!(f, "close"),
            DecisionAction::Hedge => write!(f, "hedge"),
        }
    }
}

/// Pipeline phase a decision reached or failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionPhase {
    CircuitBreaker,
    Validation,
    Safety,
    Scoring,
    Sizing,
    Complete,
}

impl fmt::Display for DecisionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DecisionPhase::CircuitBreaker => "circuit_breaker",
            DecisionPhase::Validation => "validation",
            DecisionPhase::Safety => "safety",
            DecisionPhase::Scoring => "scoring",
            DecisionPhase::Sizing => "sizing",
            DecisionPhase::Complete => "complete",
        };
        write!(f, "{}", name)
    }
}

/// Kind of competing objectives in a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictCategory {
    SafetyVsOpportunity,
    PortfolioVsZone,
    ImmediateVsLongterm,
    PerformanceVsAccuracy,
    VolumeVsBalance,
    ZoneClustering,
}

impl ConflictCategory {
    pub const ALL: [ConflictCategory; 6] = [
        ConflictCategory::SafetyVsOpportunity,
        ConflictCategory::PortfolioVsZone,
        ConflictCategory::ImmediateVsLongterm,
        ConflictCategory::PerformanceVsAccuracy,
        ConflictCategory::VolumeVsBalance,
        ConflictCategory::ZoneClustering,
    ];

    pub fn default_strategy(&self) -> ResolutionStrategy {
        match self {
            ConflictCategory::SafetyVsOpportunity => ResolutionStrategy::SafetyAlways,
            ConflictCategory::PortfolioVsZone => ResolutionStrategy::AdaptiveWeighted,
            ConflictCategory::ImmediateVsLongterm => ResolutionStrategy::Balanced6040,
            ConflictCategory::PerformanceVsAccuracy => ResolutionStrategy::AccuracyFirst,
            ConflictCategory::VolumeVsBalance => ResolutionStrategy::PortfolioPriority,
            ConflictCategory::ZoneClustering => ResolutionStrategy::ZonePriority,
        }
    }
}

impl fmt::Display for ConflictCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConflictCategory::SafetyVsOpportunity => "safety_vs_opportunity",
            ConflictCategory::PortfolioVsZone => "portfolio_vs_zone",
            ConflictCategory::ImmediateVsLongterm => "immediate_vs_longterm",
            ConflictCategory::PerformanceVsAccuracy => "performance_vs_accuracy",
            ConflictCategory::VolumeVsBalance => "volume_vs_balance",
            ConflictCategory::ZoneClustering => "zone_clustering",
        };
        write!(f, "{}", name)
    }
}

/// Arbitration strategy for a conflict category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolutionStrategy {
    #[serde(rename = "safety_always")]
    SafetyAlways,
    #[serde(rename = "adaptive_weighted")]
    AdaptiveWeighted,
    #[serde(rename = "balanced_60_40")]
    Balanced6040,
    #[serde(rename = "accuracy_first")]
    AccuracyFirst,
    #[serde(rename = "portfolio_priority")]
    PortfolioPriority,
    #[serde(rename = "zone_priority")]
    ZonePriority,
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResolutionStrategy::SafetyAlways => "safety_always",
            ResolutionStrategy::AdaptiveWeighted => "adaptive_weighted",
            ResolutionStrategy::Balanced6040 => "balanced_60_40",
            ResolutionStrategy::AccuracyFirst => "accuracy_first",
            ResolutionStrategy::PortfolioPriority => "portfolio_priority",
            ResolutionStrategy::ZonePriority => "zone_priority",
        };
        write!(f, "{}", name)
    }
}

/// Named score carried by a conflict option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreKind {
    Safety,
    Portfolio,
    Zone,
    Balance,
    Signal,
    Immediate,
    Longterm,
    Accuracy,
    Performance,
}

impl From<Factor> for ScoreKind {
    fn from(factor: Factor) -> Self {
        match factor {
            Factor::Safety => ScoreKind::Safety,
            Factor::Portfolio => ScoreKind::Portfolio,
            Factor::Zone => ScoreKind::Zone,
            Factor::Balance => ScoreKind::Balance,
            Factor::Signal => ScoreKind::Signal,
        }
    }
}

/// One side of a conflict
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConflictOption {
    pub label: String,
    pub scores: BTreeMap<ScoreKind, f64>,
}

impl ConflictOption {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            scores: BTreeMap::new(),
        }
    }

    pub fn with(mut self, kind: ScoreKind, value: f64) -> Self {
        self.scores.insert(kind, value);
        self
    }

    /// Score of the given kind, zero when absent
    pub fn score(&self, kind: ScoreKind) -> f64 {
        self.scores.get(&kind).copied().unwrap_or(0.0)
    }
}

/// Situational inputs some strategies consult
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConflictContext {
    pub portfolio_health: Option<f64>,
    pub zone_distribution_score: Option<f64>,
    pub market_volatility: Option<f64>,
}

/// Which option an arbitration picked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChosenSide {
    A,
    B,
    /// Resolution failed; nothing was chosen
    Fallback,
}

/// Outcome of one arbitration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictDecision {
    pub category: ConflictCategory,
    pub strategy: ResolutionStrategy,
    pub chosen: ChosenSide,
    pub chosen_label: String,
    pub alternative: Option<String>,
    pub confidence: f64,
    pub reasoning: String,
    pub impact: f64,
    pub timestamp: DateTime<Utc>,
}

/// Engine output for one signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionResult {
    pub id: Uuid,
    pub action: DecisionAction,
    pub size: f64,
    pub confidence: f64,
    pub reasoning: String,
    pub scores: FactorScores,
    pub weighted_score: f64,
    pub conflicts: Vec<ConflictDecision>,
    /// Position a redirect should act on
    pub target_position: Option<Position>,
    pub size_explanation: Option<SizeExplanation>,
    pub cache_used: bool,
    pub phase: DecisionPhase,
    /// Phases that fell back to a default instead of computing
    #[serde(default)]
    pub fallbacks: Vec<DecisionPhase>,
    pub processing_time_ms: f64,
}

impl DecisionResult {
    /// Zero-size skip used whenever the pipeline cannot decide safely
    pub fn safe_default(reason: impl Into<String>, phase: DecisionPhase) -> Self {
        Self {
            id: Uuid::new_v4(),
            action: DecisionAction::Skip,
            size: 0.0,
            confidence: 0.0,
            reasoning: reason.into(),
            scores: FactorScores::default(),
            weighted_score: 0.0,
            conflicts: Vec::new(),
            target_position: None,
            size_explanation: None,
            cache_used: false,
            phase,
            fallbacks: Vec::new(),
            processing_time_ms: 0.0,
        }
    }
}
