//! Unified Decision Engine
//!
//! Runs every signal through the decision pipeline: breaker gate, input and
//! safety validation, factor scoring, conflict resolution, weighted
//! aggregation, action selection and sizing. No phase may fail the call; each
//! maps its errors onto a fallback and the result is always a valid
//! `DecisionResult`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::circuit_breaker::CircuitBreaker;
use super::ledger::DecisionLedger;
use super::resolver::{ConflictResolver, ResolverStatistics};
use super::safety;
use super::scoring::{weighted_score, FactorScorer};
use super::sizing::{PositionSizer, SizingContext};
use super::types::{
    ChosenSide, ConflictCategory, ConflictContext, ConflictDecision, ConflictOption, DecisionAction,
    DecisionPhase, DecisionResult, Factor, FactorScores, Position, ScoreKind, Signal, TradingState,
};
use super::zones::{self, ZoneAnalysis};
use crate::cache::{CacheStats, TieredCache};
use crate::clock::Clock;
use crate::config::{Config, ConfigSource};
use crate::error::Result;

/// Engine statistics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct DecisionStatistics {
    pub total_decisions: u64,
    pub average_execution_ms: f64,
    pub conflicts_resolved: u64,
    pub recent_actions: HashMap<DecisionAction, usize>,
    pub circuit_breaker_open: bool,
    /// When the breaker last tripped
    pub circuit_breaker_tripped_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub resolver: ResolverStatistics,
    pub cache: CacheStats,
}

/// Scores plus whether any factor fell back to neutral
struct ScoringOutcome {
    scores: FactorScores,
    degraded: bool,
    cache_used: bool,
    zone_distribution: f64,
}

/// Action choice before sizing
struct ActionChoice {
    action: DecisionAction,
    confidence: f64,
    reasoning: String,
    target: Option<Position>,
}

/// Unified Decision Engine
pub struct DecisionEngine {
    config: Arc<dyn ConfigSource>,
    cache: Arc<TieredCache>,
    resolver: Arc<ConflictResolver>,
    clock: Arc<dyn Clock>,
    breaker: Mutex<CircuitBreaker>,
    ledger: Mutex<DecisionLedger>,
}

impl DecisionEngine {
    /// Create an engine with its own cache and resolver
    pub fn new(config: Arc<dyn ConfigSource>, clock: Arc<dyn Clock>) -> Self {
        let cache_config = config.snapshot().performance_optimization.clone();
        let cache = Arc::new(TieredCache::new(cache_config, clock.clone()));
        let resolver = Arc::new(ConflictResolver::new(config.clone(), clock.clone()));
        Self::with_components(config, cache, resolver, clock)
    }

    /// Create an engine around shared components
    pub fn with_components(
        config: Arc<dyn ConfigSource>,
        cache: Arc<TieredCache>,
        resolver: Arc<ConflictResolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            cache,
            resolver,
            clock,
            breaker: Mutex::new(CircuitBreaker::new()),
            ledger: Mutex::new(DecisionLedger::new()),
        }
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    pub fn resolver(&self) -> &Arc<ConflictResolver> {
        &self.resolver
    }

    /// Decide what to do with a signal
    pub async fn process_signal(&self, signal: &Signal, state: &TradingState) -> DecisionResult {
        let started = Instant::now();
        let config = self.config.snapshot();
        let now = self.clock.now();

        // Phase 1: circuit breaker
        {
            let mut breaker = self.breaker.lock().await;
            if let Err(open) = breaker.gate(now, &config.circuit_breaker) {
                warn!(reason = %open.reason, remaining_secs = open.remaining_secs, "Signal rejected by circuit breaker");
                return finish(
                    DecisionResult::safe_default(open.description(), DecisionPhase::CircuitBreaker),
                    started,
                );
            }
        }

        // Phase 2: validation
        if let Err(e) = signal.validate().and_then(|_| state.validate()) {
            warn!(symbol = %signal.symbol, error = %e, "Rejecting malformed decision input");
            return finish(
                DecisionResult::safe_default(format!("Invalid input: {}", e), DecisionPhase::Validation),
                started,
            );
        }

        if let Some(block) = safety::check(state, &config.trading_parameters, now) {
            debug!(symbol = %signal.symbol, reason = %block, "Safety check failed");
            return finish(
                DecisionResult::safe_default(format!("Safety check failed: {}", block), DecisionPhase::Safety),
                started,
            );
        }

        // Phases 3-7
        let result = finish(self.evaluate(signal, state, &config), started);

        {
            let mut breaker = self.breaker.lock().await;
            if !result.fallbacks.is_empty() {
                if breaker.record_failure(self.clock.now(), &config.circuit_breaker) {
                    error!(
                        failures = breaker.consecutive_failures(),
                        "Repeated decision failures tripped the circuit breaker"
                    );
                }
            } else {
                breaker.record_success();
            }
        }

        // Phase 8: record
        self.ledger.lock().await.record(&result, signal, state, now);

        debug!(
            id = %result.id,
            symbol = %signal.symbol,
            action = %result.action,
            size = result.size,
            confidence = format!("{:.3}", result.confidence),
            weighted = format!("{:.3}", result.weighted_score),
            conflicts = result.conflicts.len(),
            cache_used = result.cache_used,
            fallbacks = result.fallbacks.len(),
            elapsed_ms = format!("{:.2}", result.processing_time_ms),
            "Decision made"
        );

        result
    }

    /// Scoring through sizing; phases that fell back are listed in `fallbacks`
    fn evaluate(&self, signal: &Signal, state: &TradingState, config: &Config) -> DecisionResult {
        let now = self.clock.now();

        // Phase 3: scoring
        let ScoringOutcome {
            mut scores,
            degraded: scoring_degraded,
            cache_used,
            zone_distribution,
        } = self.score(signal, state, config, now);

        // Phase 4: conflicts
        let conflicts = self.resolve_conflicts(state, &mut scores, zone_distribution);

        // Phase 5: aggregation
        let weighted = weighted_score(&scores, &config.decision_weights);

        // Phase 6: action
        let choice = choose_action(state, &scores, weighted, config);

        // Phase 7: sizing
        let sizer = PositionSizer::new(config.lot_sizing.clone());
        let sizing = SizingContext {
            strength: signal.strength,
            scores,
            confidence: choice.confidence,
        };
        let (size, size_explanation, sizing_degraded) = match sizer.explain_size(&sizing) {
            Ok(explanation) => (explanation.final_size, Some(explanation), false),
            Err(e) => {
                error!(error = %e, "Position sizing failed, using fallback lot");
                (sizer.fallback_size(), None, true)
            }
        };

        let mut fallbacks = Vec::new();
        if scoring_degraded {
            fallbacks.push(DecisionPhase::Scoring);
        }
        if sizing_degraded {
            fallbacks.push(DecisionPhase::Sizing);
        }

        DecisionResult {
            id: uuid::Uuid::new_v4(),
            action: choice.action,
            size,
            confidence: choice.confidence,
            reasoning: choice.reasoning,
            scores,
            weighted_score: weighted,
            conflicts,
            target_position: choice.target,
            size_explanation,
            cache_used,
            phase: DecisionPhase::Complete,
            fallbacks,
            processing_time_ms: 0.0,
        }
    }

    fn score(&self, signal: &Signal, state: &TradingState, config: &Config, now: DateTime<Utc>) -> ScoringOutcome {
        let scorer = FactorScorer::new(config);
        let (analysis, cache_used) = self.zone_analysis(state, config);
        let mut degraded = false;

        let mut settle = |factor: Factor, score: Result<f64>| match score {
            Ok(value) => value,
            Err(e) => {
                warn!(factor = %factor, error = %e, "Factor scoring failed, using neutral score");
                degraded = true;
                0.5
            }
        };

        let scores = FactorScores {
            safety: settle(Factor::Safety, scorer.safety(state)),
            portfolio: settle(Factor::Portfolio, scorer.portfolio(state)),
            zone: settle(Factor::Zone, scorer.zone(&analysis, signal.price)),
            balance: settle(Factor::Balance, scorer.balance(signal, state)),
            signal: settle(Factor::Signal, scorer.signal(signal, now)),
        };

        ScoringOutcome {
            scores,
            degraded,
            cache_used,
            zone_distribution: analysis.distribution_score,
        }
    }

    /// Zone analysis for the current positions, memoised under the positions hash
    fn zone_analysis(&self, state: &TradingState, config: &Config) -> (ZoneAnalysis, bool) {
        // Keyed on the positions themselves; a stale caller hash must not alias
        let hash = TradingState::compute_positions_hash(&state.positions);
        if !state.positions_hash.is_empty() && state.positions_hash != hash {
            debug!(
                supplied = %state.positions_hash,
                computed = %hash,
                "Ignoring positions hash that does not match positions"
            );
        }
        let key = zones::cache_key(&hash);
        let ttl = Duration::from_secs(config.zone_based_trading.zone_cache_ttl);

        self.cache
            .compute_or_cache(&key, Some(ttl), || {
                Ok(ZoneAnalysis::analyze(&state.positions, &config.zone_based_trading))
            })
            .unwrap_or_else(|e| {
                warn!(key = %key, error = %e, "Zone analysis cache failed, computing directly");
                (ZoneAnalysis::analyze(&state.positions, &config.zone_based_trading), false)
            })
    }

    /// Detect disagreements between scores and arbitrate them; may adjust scores
    fn resolve_conflicts(
        &self,
        state: &TradingState,
        scores: &mut FactorScores,
        zone_distribution: f64,
    ) -> Vec<ConflictDecision> {
        let mut conflicts = Vec::new();

        if scores.safety < 0.6 && scores.signal > 0.8 {
            let decision = self.resolver.resolve(
                ConflictCategory::SafetyVsOpportunity,
                &ConflictOption::new("safety_priority").with(ScoreKind::Safety, scores.safety),
                &ConflictOption::new("opportunity_priority").with(ScoreKind::Signal, scores.signal),
                &ConflictContext {
                    portfolio_health: Some(state.portfolio_health),
                    ..Default::default()
                },
            );
            if decision.chosen == ChosenSide::A {
                scores.scale(Factor::Safety, 1.2);
                scores.scale(Factor::Signal, 0.8);
            }
            conflicts.push(decision);
        }

        if (scores.portfolio - scores.zone).abs() > 0.3 {
            let decision = self.resolver.resolve(
                ConflictCategory::PortfolioVsZone,
                &ConflictOption::new("portfolio_priority").with(ScoreKind::Portfolio, scores.portfolio),
                &ConflictOption::new("zone_priority").with(ScoreKind::Zone, scores.zone),
                &ConflictContext {
                    portfolio_health: Some(state.portfolio_health),
                    zone_distribution_score: Some(zone_distribution),
                    market_volatility: state.market_volatility,
                    ..Default::default()
                },
            );
            match decision.chosen {
                ChosenSide::A => {
                    scores.scale(Factor::Portfolio, 1.1);
                    scores.scale(Factor::Zone, 0.9);
                }
                ChosenSide::B => {
                    scores.scale(Factor::Zone, 1.1);
                    scores.scale(Factor::Portfolio, 0.9);
                }
                ChosenSide::Fallback => {}
            }
            conflicts.push(decision);
        }

        if let Some(buy_ratio) = state.buy_ratio() {
            if state.total_volume() > 1.0 && (buy_ratio - 0.5).abs() > 0.2 {
                let decision = self.resolver.resolve(
                    ConflictCategory::VolumeVsBalance,
                    &ConflictOption::new("balance_priority").with(ScoreKind::Balance, scores.balance),
                    &ConflictOption::new("volume_priority").with(ScoreKind::Portfolio, scores.portfolio),
                    &ConflictContext {
                        portfolio_health: Some(state.portfolio_health),
                        ..Default::default()
                    },
                );
                conflicts.push(decision);
            }
        }

        conflicts
    }

    /// Engine, resolver and cache statistics
    pub async fn get_decision_statistics(&self) -> DecisionStatistics {
        let (total_decisions, average_execution_ms, conflicts_resolved, recent_actions) = {
            let ledger = self.ledger.lock().await;
            (
                ledger.total_decisions(),
                ledger.average_execution_ms(),
                ledger.conflicts_resolved(),
                ledger.recent_action_distribution(),
            )
        };
        let (circuit_breaker_open, circuit_breaker_tripped_at, consecutive_failures) = {
            let breaker = self.breaker.lock().await;
            (breaker.is_open(), breaker.tripped_at(), breaker.consecutive_failures())
        };

        DecisionStatistics {
            total_decisions,
            average_execution_ms,
            conflicts_resolved,
            recent_actions,
            circuit_breaker_open,
            circuit_breaker_tripped_at,
            consecutive_failures,
            resolver: self.resolver.statistics(),
            cache: self.cache.stats(),
        }
    }

    /// Halt decisions until the timeout elapses or a manual reset
    pub async fn trigger_circuit_breaker(&self, reason: &str) {
        let now = self.clock.now();
        self.breaker.lock().await.trip(reason, now);
    }

    pub async fn reset_circuit_breaker(&self) {
        self.breaker.lock().await.reset();
    }

    /// Tune the cache for active trading
    pub fn optimize_for_session(&self) {
        self.cache.optimize_for_session();
        info!("Decision engine optimised for trading session");
    }
}

fn finish(mut result: DecisionResult, started: Instant) -> DecisionResult {
    result.processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;
    result
}

fn choose_action(state: &TradingState, scores: &FactorScores, weighted: f64, config: &Config) -> ActionChoice {
    if let Some(target) = redirect_target(state, scores, config) {
        return ActionChoice {
            action: DecisionAction::Redirect,
            confidence: (weighted + 0.1).min(0.9),
            reasoning: format!(
                "Redirect to profitable position #{} (profit {:.2}) to rebalance portfolio",
                target.ticket, target.profit
            ),
            target: Some(target),
        };
    }

    let (action, confidence, reasoning) = if weighted >= 0.6 {
        (
            DecisionAction::Execute,
            weighted,
            format!("Execute signal (weighted score: {:.3})", weighted),
        )
    } else if weighted >= 0.4 {
        if scores.balance < 0.4 {
            (
                DecisionAction::Skip,
                1.0 - weighted,
                format!("Skip for balance protection (weighted score: {:.3})", weighted),
            )
        } else {
            (
                DecisionAction::Execute,
                weighted * 0.8,
                format!("Cautious execute (weighted score: {:.3})", weighted),
            )
        }
    } else {
        (
            DecisionAction::Skip,
            1.0 - weighted,
            format!("Skip signal (weighted score: {:.3})", weighted),
        )
    };

    ActionChoice {
        action,
        confidence,
        reasoning,
        target: None,
    }
}

/// Most profitable open position, when the book is skewed enough to redirect
fn redirect_target(state: &TradingState, scores: &FactorScores, config: &Config) -> Option<Position> {
    let buy_ratio = state.buy_ratio()?;
    let threshold = config.portfolio_management.redirect_threshold;
    let skewed = buy_ratio > threshold || buy_ratio < 1.0 - threshold;
    if !skewed || scores.portfolio <= 0.3 {
        return None;
    }

    state
        .positions
        .iter()
        .filter(|p| p.profit > 0.0)
        .max_by(|a, b| a.profit.total_cmp(&b.profit))
        .cloned()
}
