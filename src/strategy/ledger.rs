//! Bounded decision history and running counters

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

use super::types::{DecisionAction, DecisionResult, Signal, TradingState};

/// Decisions kept in history
pub const DECISION_HISTORY_LIMIT: usize = 1000;
/// Execution times kept for the running average
pub const EXECUTION_TIME_LIMIT: usize = 1000;
/// Window for the recent action distribution
pub const RECENT_ACTIONS_WINDOW: usize = 100;

/// Compact view of the state a decision was made against
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSummary {
    pub position_count: usize,
    pub portfolio_health: f64,
    pub buy_volume: f64,
    pub sell_volume: f64,
}

impl From<&TradingState> for StateSummary {
    fn from(state: &TradingState) -> Self {
        Self {
            position_count: state.positions.len(),
            portfolio_health: state.portfolio_health,
            buy_volume: state.buy_volume,
            sell_volume: state.sell_volume,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionRecord {
    pub timestamp: DateTime<Utc>,
    pub result: DecisionResult,
    pub signal: Signal,
    pub state_summary: StateSummary,
}

#[derive(Debug, Default)]
pub struct DecisionLedger {
    history: VecDeque<DecisionRecord>,
    execution_times: VecDeque<f64>,
    total_decisions: u64,
    conflicts_resolved: u64,
}

impl DecisionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: &DecisionResult, signal: &Signal, state: &TradingState, now: DateTime<Utc>) {
        self.history.push_back(DecisionRecord {
            timestamp: now,
            result: result.clone(),
            signal: signal.clone(),
            state_summary: StateSummary::from(state),
        });
        while self.history.len() > DECISION_HISTORY_LIMIT {
            self.history.pop_front();
        }

        self.execution_times.push_back(result.processing_time_ms);
        while self.execution_times.len() > EXECUTION_TIME_LIMIT {
            self.execution_times.pop_front();
        }

        self.total_decisions += 1;
        self.conflicts_resolved += result.conflicts.len() as u64;
    }

    pub fn total_decisions(&self) -> u64 {
        self.total_decisions
    }

    pub fn conflicts_resolved(&self) -> u64 {
        self.conflicts_resolved
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn average_execution_ms(&self) -> f64 {
        if self.execution_times.is_empty() {
            0.0
        } else {
            self.execution_times.iter().sum::<f64>() / self.execution_times.len() as f64
        }
    }

    /// Action counts over the most recent decisions
    pub fn recent_action_distribution(&self) -> HashMap<DecisionAction, usize> {
        let mut distribution = HashMap::new();
        for record in self.history.iter().rev().take(RECENT_ACTIONS_WINDOW) {
            *distribution.entry(record.result.action).or_insert(0) += 1;
        }
        distribution
    }

    /// Most recent records, newest last
    pub fn recent(&self, limit: usize) -> Vec<DecisionRecord> {
        let skip = self.history.len().saturating_sub(limit);
        self.history.iter().skip(skip).cloned().collect()
    }
}
