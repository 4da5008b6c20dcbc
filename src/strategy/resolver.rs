//! Conflict Resolver
//!
//! Maps each conflict category onto a resolution strategy (configured or
//! default), keeps a bounded history of resolutions with per-category running
//! statistics, and folds reported outcomes back into the adaptive strategy.

use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info};

use super::resolution::{arbiter_for, AdaptiveWeighted, ArbitrationInput};
use super::types::{ChosenSide, ConflictCategory, ConflictContext, ConflictDecision, ConflictOption, ResolutionStrategy};
use crate::clock::Clock;
use crate::config::ConfigSource;

/// Resolutions kept in history
pub const HISTORY_LIMIT: usize = 1000;

/// Success rate assumed before any outcome is reported
const INITIAL_SUCCESS_RATE: f64 = 0.5;

/// Running statistics for one category
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CategoryStats {
    pub decisions: u64,
    pub successful_outcomes: u64,
    pub avg_confidence: f64,
    pub avg_impact: f64,
}

impl CategoryStats {
    pub fn success_rate(&self) -> f64 {
        if self.decisions == 0 {
            0.0
        } else {
            self.successful_outcomes as f64 / self.decisions as f64
        }
    }

    fn fold(&mut self, decision: &ConflictDecision) {
        self.decisions += 1;
        let n = self.decisions as f64;
        self.avg_confidence += (decision.confidence - self.avg_confidence) / n;
        self.avg_impact += (decision.impact - self.avg_impact) / n;
    }
}

/// Per-category summary as reported in statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorySummary {
    pub decisions: u64,
    pub successful_outcomes: u64,
    pub success_rate: f64,
    pub avg_confidence: f64,
    pub avg_impact: f64,
}

/// Resolver statistics snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolverStatistics {
    pub total_resolved: u64,
    pub history_len: usize,
    pub by_category: BTreeMap<ConflictCategory, CategorySummary>,
    pub recent_success_rate: f64,
    /// Adaptive multiplier at neutral volatility
    pub adaptive_factor: f64,
    /// Strategy in force for every category
    pub strategies: BTreeMap<ConflictCategory, ResolutionStrategy>,
}

#[derive(Debug)]
struct ResolverState {
    history: VecDeque<ConflictDecision>,
    total_resolved: u64,
    stats: BTreeMap<ConflictCategory, CategoryStats>,
    recent_success_rate: f64,
}

/// Conflict Resolver
pub struct ConflictResolver {
    config: Arc<dyn ConfigSource>,
    clock: Arc<dyn Clock>,
    state: Mutex<ResolverState>,
    /// Log resolutions at info level
    log_resolutions: bool,
}

impl ConflictResolver {
    pub fn new(config: Arc<dyn ConfigSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(ResolverState {
                history: VecDeque::with_capacity(HISTORY_LIMIT),
                total_resolved: 0,
                stats: BTreeMap::new(),
                recent_success_rate: INITIAL_SUCCESS_RATE,
            }),
            log_resolutions: true,
        }
    }

    /// Create without info-level resolution logging
    pub fn quiet(config: Arc<dyn ConfigSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            log_resolutions: false,
            ..Self::new(config, clock)
        }
    }

    fn lock(&self) -> MutexGuard<'_, ResolverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Strategy in force for a category
    pub fn strategy_for(&self, category: ConflictCategory) -> ResolutionStrategy {
        self.config
            .snapshot()
            .conflict_resolution
            .strategy_for(category)
            .unwrap_or_else(|| category.default_strategy())
    }

    /// Arbitrate between two options
    ///
    /// Never fails: a strategy error yields a fallback decision that is not
    /// recorded.
    pub fn resolve(
        &self,
        category: ConflictCategory,
        a: &ConflictOption,
        b: &ConflictOption,
        context: &ConflictContext,
    ) -> ConflictDecision {
        let config = self.config.snapshot();
        let strategy = config
            .conflict_resolution
            .strategy_for(category)
            .unwrap_or_else(|| category.default_strategy());
        let recent_success_rate = self.lock().recent_success_rate;

        let input = ArbitrationInput {
            a,
            b,
            context,
            weights: &config.decision_weights,
            recent_success_rate,
        };

        let arbitration = match arbiter_for(strategy).arbitrate(&input) {
            Ok(arbitration) => arbitration,
            Err(e) => {
                error!(category = %category, strategy = %strategy, error = %e, "Conflict resolution failed");
                return ConflictDecision {
                    category,
                    strategy: ResolutionStrategy::SafetyAlways,
                    chosen: ChosenSide::Fallback,
                    chosen_label: "safe_default".to_string(),
                    alternative: None,
                    confidence: 0.5,
                    reasoning: format!("Error in resolution: {}", e),
                    impact: 0.0,
                    timestamp: self.clock.now(),
                };
            }
        };

        let (winner, loser) = match arbitration.chosen {
            ChosenSide::B => (b, a),
            _ => (a, b),
        };

        let decision = ConflictDecision {
            category,
            strategy,
            chosen: arbitration.chosen,
            chosen_label: winner.label.clone(),
            alternative: Some(loser.label.clone()),
            confidence: arbitration.confidence,
            reasoning: arbitration.reasoning,
            impact: arbitration.impact,
            timestamp: self.clock.now(),
        };

        {
            let mut state = self.lock();
            state.history.push_back(decision.clone());
            while state.history.len() > HISTORY_LIMIT {
                state.history.pop_front();
            }
            state.total_resolved += 1;
            state.stats.entry(category).or_default().fold(&decision);
        }

        if self.log_resolutions {
            info!(
                category = %category,
                strategy = %strategy,
                chosen = %decision.chosen_label,
                confidence = format!("{:.2}", decision.confidence),
                "Conflict resolved"
            );
        }

        decision
    }

    /// Report whether a resolved conflict worked out
    ///
    /// The category's success rate becomes the global rate consulted by the
    /// adaptive strategy for every category.
    pub fn record_outcome(&self, decision: &ConflictDecision, success: bool) {
        let mut state = self.lock();
        let Some(stats) = state.stats.get_mut(&decision.category) else {
            debug!(category = %decision.category, "Outcome for untracked category ignored");
            return;
        };

        if success {
            stats.successful_outcomes += 1;
        }
        let rate = stats.success_rate();
        state.recent_success_rate = rate;
        drop(state);

        info!(
            category = %decision.category,
            success,
            success_rate = format!("{:.3}", rate),
            "Conflict outcome recorded"
        );
    }

    pub fn recent_success_rate(&self) -> f64 {
        self.lock().recent_success_rate
    }

    /// Most recent resolutions, newest last
    pub fn recent_history(&self, limit: usize) -> Vec<ConflictDecision> {
        let state = self.lock();
        let skip = state.history.len().saturating_sub(limit);
        state.history.iter().skip(skip).cloned().collect()
    }

    pub fn statistics(&self) -> ResolverStatistics {
        let strategies = ConflictCategory::ALL
            .iter()
            .map(|category| (*category, self.strategy_for(*category)))
            .collect();

        let state = self.lock();
        let by_category = state
            .stats
            .iter()
            .filter(|(_, s)| s.decisions > 0)
            .map(|(category, s)| {
                (
                    *category,
                    CategorySummary {
                        decisions: s.decisions,
                        successful_outcomes: s.successful_outcomes,
                        success_rate: s.success_rate(),
                        avg_confidence: s.avg_confidence,
                        avg_impact: s.avg_impact,
                    },
                )
            })
            .collect();

        ResolverStatistics {
            total_resolved: state.total_resolved,
            history_len: state.history.len(),
            by_category,
            recent_success_rate: state.recent_success_rate,
            adaptive_factor: AdaptiveWeighted::adaptive_factor(
                state.recent_success_rate,
                &ConflictContext::default(),
            ),
            strategies,
        }
    }
}
