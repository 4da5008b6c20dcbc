//! Factor scoring and weighted aggregation
//!
//! Each factor is scored independently into [0, 1]. A factor that cannot be
//! computed reports `Error::Scoring`; the engine substitutes a neutral score.

use chrono::{DateTime, Utc};

use super::types::{clamp_unit, Direction, Factor, FactorScores, Signal, TradingState};
use super::zones::ZoneAnalysis;
use crate::config::{Config, DecisionWeights};
use crate::error::{Error, Result};

/// Rationale length treated as fully detailed
const FULL_RATIONALE_CHARS: f64 = 50.0;

/// Scores a signal against a config snapshot
pub struct FactorScorer<'a> {
    config: &'a Config,
}

impl<'a> FactorScorer<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Margin, health, position room and (optionally) exposure distance, multiplied
    pub fn safety(&self, state: &TradingState) -> Result<f64> {
        let trading = &self.config.trading_parameters;
        let risk = &self.config.risk_management;

        // 100% margin scores 0, 300% and up scores 1
        let margin_factor = clamp_unit((state.margin_level - 100.0) / 200.0);
        let health_factor = state.portfolio_health / 100.0;
        let position_factor = if trading.max_positions == 0 {
            0.0
        } else {
            1.0 - state.positions.len() as f64 / trading.max_positions as f64
        };

        let mut score = margin_factor * health_factor * position_factor;

        if risk.anti_exposure_enabled && state.exposure_distance > 0.0 {
            let exposure_factor = if risk.max_exposure_distance > 0.0 {
                1.0 - state.exposure_distance / risk.max_exposure_distance
            } else {
                0.0
            };
            score *= exposure_factor.max(0.1);
        }

        finite(Factor::Safety, score)
    }

    /// Health blended with how far the buy ratio sits from target
    pub fn portfolio(&self, state: &TradingState) -> Result<f64> {
        let health = state.portfolio_health / 100.0;

        let score = match state.buy_ratio() {
            Some(buy_ratio) => {
                let target = self.config.portfolio_management.balance_target_ratio;
                let balance = 1.0 - (buy_ratio - target).abs() * 2.0;
                health * 0.7 + balance * 0.3
            }
            None => health,
        };

        finite(Factor::Portfolio, score)
    }

    /// Distribution quality blended with room in the signal's own zone
    pub fn zone(&self, analysis: &ZoneAnalysis, price: f64) -> Result<f64> {
        let distribution = analysis.distribution_score / 100.0;

        let score = if price > 0.0 {
            let clustering = analysis.clustering_score(price, &self.config.zone_based_trading);
            distribution * 0.6 + clustering * 0.4
        } else {
            distribution
        };

        finite(Factor::Zone, score)
    }

    /// Effect of adding this signal's implied volume on the buy/sell balance
    pub fn balance(&self, signal: &Signal, state: &TradingState) -> Result<f64> {
        let Some(buy_ratio) = state.buy_ratio() else {
            // Nothing to unbalance yet
            return Ok(1.0);
        };

        let pm = &self.config.portfolio_management;
        let simulated = self.config.lot_sizing.base_lot_size * signal.strength;
        let (new_buy, new_sell) = match signal.direction {
            Direction::Buy => (state.buy_volume + simulated, state.sell_volume),
            Direction::Sell => (state.buy_volume, state.sell_volume + simulated),
        };
        let new_total = new_buy + new_sell;
        let new_ratio = if new_total > 0.0 { new_buy / new_total } else { 0.5 };

        let current_deviation = (buy_ratio - pm.balance_target_ratio).abs();
        let new_deviation = (new_ratio - pm.balance_target_ratio).abs();

        let span = pm.balance_target_ratio + pm.balance_tolerance;
        if span <= 0.0 {
            return Err(Error::Scoring {
                factor: "balance",
                reason: format!("non-positive balance span {}", span),
            });
        }

        let mut score = 1.0 - new_deviation / span;
        if new_deviation >= current_deviation {
            // Moves away from target
            score *= 0.5;
        }

        finite(Factor::Balance, score)
    }

    /// Strength, freshness and rationale detail
    pub fn signal(&self, signal: &Signal, now: DateTime<Utc>) -> Result<f64> {
        let strength = (signal.strength / 3.0).min(1.0);

        let age_minutes = (now - signal.timestamp).num_seconds().max(0) as f64 / 60.0;
        let freshness = (1.0 - age_minutes / 60.0).max(0.1);

        let rationale = if signal.rationale.is_empty() {
            0.5
        } else {
            (signal.rationale.chars().count() as f64 / FULL_RATIONALE_CHARS).min(1.0)
        };

        finite(Factor::Signal, strength * 0.5 + freshness * 0.3 + rationale * 0.2)
    }
}

fn finite(factor: Factor, score: f64) -> Result<f64> {
    if score.is_finite() {
        Ok(clamp_unit(score))
    } else {
        Err(Error::Scoring {
            factor: factor.name(),
            reason: format!("non-finite score {}", score),
        })
    }
}

/// Normalised weighted sum over the factors that carry a positive weight
pub fn weighted_score(scores: &FactorScores, weights: &DecisionWeights) -> f64 {
    let mut total = 0.0;
    let mut weight_sum = 0.0;

    for factor in Factor::ALL {
        let weight = weights.weight_for(factor);
        if weight > 0.0 {
            total += scores.get(factor) * weight;
            weight_sum += weight;
        }
    }

    if weight_sum > 0.0 {
        clamp_unit(total / weight_sum)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::types::Position;
    use chrono::Duration;

    fn signal(direction: Direction, strength: f64) -> Signal {
        Signal {
            timestamp: Utc::now(),
            symbol: "XAUUSD".to_string(),
            direction,
            strength,
            rationale: "breakout above resistance with rising volume".to_string(),
            price: 2000.0,
        }
    }

    fn state() -> TradingState {
        TradingState {
            margin_level: 500.0,
            portfolio_health: 90.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_safety_score() {
        let config = Config::default();
        let scorer = FactorScorer::new(&config);

        // margin capped at 1, health 0.9, no positions
        assert!((scorer.safety(&state()).unwrap() - 0.9).abs() < 1e-9);

        let exposed = TradingState {
            exposure_distance: 75.0,
            ..state()
        };
        assert!((scorer.safety(&exposed).unwrap() - 0.45).abs() < 1e-9);

        let far = TradingState {
            exposure_distance: 500.0,
            ..state()
        };
        assert!((scorer.safety(&far).unwrap() - 0.09).abs() < 1e-9);
    }

    #[test]
    fn test_safety_ignores_exposure_when_disabled() {
        let mut config = Config::default();
        config.risk_management.anti_exposure_enabled = false;
        let scorer = FactorScorer::new(&config);

        let exposed = TradingState {
            exposure_distance: 75.0,
            ..state()
        };
        assert!((scorer.safety(&exposed).unwrap() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_portfolio_score() {
        let config = Config::default();
        let scorer = FactorScorer::new(&config);
        assert!((scorer.portfolio(&state()).unwrap() - 0.9).abs() < 1e-9);

        let skewed = TradingState {
            buy_volume: 0.75,
            sell_volume: 0.25,
            ..state()
        };
        // 0.7 * 0.9 + 0.3 * 0.5
        assert!((scorer.portfolio(&skewed).unwrap() - 0.78).abs() < 1e-9);
    }

    #[test]
    fn test_zone_score() {
        let config = Config::default();
        let scorer = FactorScorer::new(&config);
        let empty = ZoneAnalysis::default();

        assert_eq!(scorer.zone(&empty, 2000.0).unwrap(), 1.0);

        let positions: Vec<Position> = (0..4)
            .map(|i| Position {
                ticket: i,
                direction: Direction::Buy,
                volume: 0.01,
                open_price: 2000.0,
                profit: 0.0,
            })
            .collect();
        let crowded = ZoneAnalysis::analyze(&positions, &config.zone_based_trading);
        // 0.6 * 0.8 + 0.4 * 0.0
        assert!((scorer.zone(&crowded, 2001.0).unwrap() - 0.48).abs() < 1e-9);
        assert!((scorer.zone(&crowded, 0.0).unwrap() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_balance_score() {
        let config = Config::default();
        let scorer = FactorScorer::new(&config);

        assert_eq!(scorer.balance(&signal(Direction::Buy, 1.0), &state()).unwrap(), 1.0);

        let buy_heavy = TradingState {
            buy_volume: 0.06,
            sell_volume: 0.02,
            ..state()
        };
        let improve = scorer.balance(&signal(Direction::Sell, 1.0), &buy_heavy).unwrap();
        let worsen = scorer.balance(&signal(Direction::Buy, 1.0), &buy_heavy).unwrap();
        assert!(improve > worsen);
        assert!(worsen < 0.5);
    }

    #[test]
    fn test_signal_score_freshness() {
        let config = Config::default();
        let scorer = FactorScorer::new(&config);
        let now = Utc::now();

        let mut fresh = signal(Direction::Buy, 3.0);
        fresh.timestamp = now;
        // 0.5 + 0.3 + 0.2 * (44 / 50)
        assert!((scorer.signal(&fresh, now).unwrap() - 0.976).abs() < 1e-9);

        let mut stale = fresh.clone();
        stale.timestamp = now - Duration::hours(3);
        assert!((scorer.signal(&stale, now).unwrap() - 0.706).abs() < 1e-9);

        let mut terse = fresh;
        terse.rationale.clear();
        assert!((scorer.signal(&terse, now).unwrap() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_non_finite_is_scoring_error() {
        let config = Config::default();
        let scorer = FactorScorer::new(&config);
        let bad = TradingState {
            portfolio_health: f64::NAN,
            ..state()
        };
        assert!(matches!(
            scorer.portfolio(&bad),
            Err(Error::Scoring { factor: "portfolio", .. })
        ));
    }

    #[test]
    fn test_weighted_score() {
        let scores = FactorScores {
            safety: 1.0,
            portfolio: 0.5,
            zone: 0.5,
            balance: 0.5,
            signal: 0.0,
        };
        let weights = DecisionWeights::default();
        // 0.35 + 0.5 * 0.60
        assert!((weighted_score(&scores, &weights) - 0.65).abs() < 1e-9);

        let partial = DecisionWeights {
            safety_check: Some(0.5),
            portfolio_health: Some(0.5),
            zone_distribution: None,
            balance_optimization: None,
            signal_quality: None,
        };
        assert!((weighted_score(&scores, &partial) - 0.75).abs() < 1e-9);

        let none = DecisionWeights {
            safety_check: None,
            portfolio_health: None,
            zone_distribution: None,
            balance_optimization: None,
            signal_quality: None,
        };
        assert_eq!(weighted_score(&scores, &none), 0.0);
    }
}
