//! Hard safety gate
//!
//! Absolute preconditions for considering a signal at all. A block here always
//! means skip with zero size, no matter how good the scores would have been.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::TradingState;
use crate::config::TradingParameters;

/// Portfolio health below this is an emergency
pub const EMERGENCY_HEALTH_FLOOR: f64 = 25.0;

/// Reasons a signal is rejected before scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyBlock {
    MarginTooLow { level: f64, minimum: f64 },
    MaxPositionsReached { current: usize, max: u32 },
    Cooldown { elapsed_secs: i64, required_secs: u64 },
    HourlyLimitReached { count: u32, max: u32 },
    HealthCritical { health: f64 },
}

impl SafetyBlock {
    /// Get human-readable description
    pub fn description(&self) -> String {
        match self {
            SafetyBlock::MarginTooLow { level, minimum } => {
                format!("Margin level {:.1}% below minimum {:.1}%", level, minimum)
            }
            SafetyBlock::MaxPositionsReached { current, max } => {
                format!("Maximum positions reached: {}/{}", current, max)
            }
            SafetyBlock::Cooldown {
                elapsed_secs,
                required_secs,
            } => {
                format!("Signal cooldown: {}s < {}s", elapsed_secs, required_secs)
            }
            SafetyBlock::HourlyLimitReached { count, max } => {
                format!("Hourly signal limit reached: {}/{}", count, max)
            }
            SafetyBlock::HealthCritical { health } => {
                format!("Portfolio health critical: {:.1}%", health)
            }
        }
    }
}

impl std::fmt::Display for SafetyBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Run every hard check in order, returning the first that fails
pub fn check(state: &TradingState, params: &TradingParameters, now: DateTime<Utc>) -> Option<SafetyBlock> {
    if state.margin_level < params.min_margin_level {
        return Some(SafetyBlock::MarginTooLow {
            level: state.margin_level,
            minimum: params.min_margin_level,
        });
    }

    let open = state.positions.len();
    if open >= params.max_positions as usize {
        return Some(SafetyBlock::MaxPositionsReached {
            current: open,
            max: params.max_positions,
        });
    }

    if let Some(last) = state.last_signal_time {
        // A last-signal time in the future counts as no time elapsed
        let elapsed = (now - last).num_seconds().max(0);
        if elapsed < params.signal_cooldown as i64 {
            return Some(SafetyBlock::Cooldown {
                elapsed_secs: elapsed,
                required_secs: params.signal_cooldown,
            });
        }
    }

    if state.signals_this_hour >= params.max_signals_per_hour {
        return Some(SafetyBlock::HourlyLimitReached {
            count: state.signals_this_hour,
            max: params.max_signals_per_hour,
        });
    }

    if state.portfolio_health < EMERGENCY_HEALTH_FLOOR {
        return Some(SafetyBlock::HealthCritical {
            health: state.portfolio_health,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::types::{Direction, Position};
    use chrono::Duration;

    fn healthy_state() -> TradingState {
        TradingState {
            margin_level: 500.0,
            portfolio_health: 90.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_healthy_state_passes() {
        let params = TradingParameters::default();
        assert_eq!(check(&healthy_state(), &params, Utc::now()), None);
    }

    #[test]
    fn test_margin_checked_first() {
        let params = TradingParameters::default();
        let state = TradingState {
            margin_level: 150.0,
            portfolio_health: 10.0,
            signals_this_hour: 100,
            ..Default::default()
        };

        let block = check(&state, &params, Utc::now()).unwrap();
        assert!(matches!(block, SafetyBlock::MarginTooLow { .. }));
        assert!(block.description().contains("Margin"));
    }

    #[test]
    fn test_max_positions() {
        let params = TradingParameters {
            max_positions: 2,
            ..Default::default()
        };
        let position = Position {
            ticket: 1,
            direction: Direction::Buy,
            volume: 0.01,
            open_price: 2000.0,
            profit: 0.0,
        };
        let state = TradingState {
            positions: vec![position.clone(), Position { ticket: 2, ..position }],
            ..healthy_state()
        };

        assert_eq!(
            check(&state, &params, Utc::now()),
            Some(SafetyBlock::MaxPositionsReached { current: 2, max: 2 })
        );
    }

    #[test]
    fn test_cooldown() {
        let params = TradingParameters::default();
        let now = Utc::now();

        let recent = TradingState {
            last_signal_time: Some(now - Duration::seconds(30)),
            ..healthy_state()
        };
        assert!(matches!(
            check(&recent, &params, now),
            Some(SafetyBlock::Cooldown { elapsed_secs: 30, .. })
        ));

        let future = TradingState {
            last_signal_time: Some(now + Duration::seconds(600)),
            ..healthy_state()
        };
        assert!(matches!(
            check(&future, &params, now),
            Some(SafetyBlock::Cooldown { elapsed_secs: 0, .. })
        ));

        let old = TradingState {
            last_signal_time: Some(now - Duration::seconds(60)),
            ..healthy_state()
        };
        assert_eq!(check(&old, &params, now), None);
    }

    #[test]
    fn test_hourly_limit_and_health_floor() {
        let params = TradingParameters::default();

        let busy = TradingState {
            signals_this_hour: 40,
            ..healthy_state()
        };
        assert!(matches!(
            check(&busy, &params, Utc::now()),
            Some(SafetyBlock::HourlyLimitReached { count: 40, max: 40 })
        ));

        let sick = TradingState {
            portfolio_health: 24.9,
            ..healthy_state()
        };
        assert!(matches!(
            check(&sick, &params, Utc::now()),
            Some(SafetyBlock::HealthCritical { .. })
        ));
    }
}
