//! Two-option arbitration strategies
//!
//! Every strategy reduces both options to one comparable score, picks the higher
//! (ties go to option A), derives a confidence that grows with the gap, and
//! reports the winning score as impact.

use super::types::{ChosenSide, ConflictContext, ConflictOption, Factor, ResolutionStrategy, ScoreKind};
use crate::config::DecisionWeights;
use crate::error::{Error, Result};

/// Inputs shared by every strategy
#[derive(Debug, Clone)]
pub struct ArbitrationInput<'a> {
    pub a: &'a ConflictOption,
    pub b: &'a ConflictOption,
    pub context: &'a ConflictContext,
    pub weights: &'a DecisionWeights,
    /// Global outcome feedback, 0-1
    pub recent_success_rate: f64,
}

/// A strategy's verdict
#[derive(Debug, Clone, PartialEq)]
pub struct Arbitration {
    pub chosen: ChosenSide,
    pub confidence: f64,
    pub reasoning: String,
    pub impact: f64,
}

/// Common interface of the resolution strategies
pub trait Arbiter: Send + Sync {
    fn arbitrate(&self, input: &ArbitrationInput<'_>) -> Result<Arbitration>;
}

/// Strategy implementation for a strategy name
pub fn arbiter_for(strategy: ResolutionStrategy) -> &'static dyn Arbiter {
    match strategy {
        ResolutionStrategy::SafetyAlways => &SafetyAlways,
        ResolutionStrategy::AdaptiveWeighted => &AdaptiveWeighted,
        ResolutionStrategy::Balanced6040 => &Balanced6040,
        ResolutionStrategy::AccuracyFirst => &AccuracyFirst,
        ResolutionStrategy::PortfolioPriority => &PortfolioPriority,
        ResolutionStrategy::ZonePriority => &ZonePriority,
    }
}

/// Confidence curve: `min(cap, base + gap * gain)`
struct Curve {
    base: f64,
    gain: f64,
    cap: f64,
}

const STANDARD: Curve = Curve {
    base: 0.5,
    gain: 0.5,
    cap: 0.9,
};

fn decide(score_a: f64, score_b: f64, curve: Curve, reasoning: String) -> Result<Arbitration> {
    if !score_a.is_finite() || !score_b.is_finite() {
        return Err(Error::Resolution(format!(
            "non-finite option scores A={} B={}",
            score_a, score_b
        )));
    }

    let (chosen, impact) = if score_a >= score_b {
        (ChosenSide::A, score_a)
    } else {
        (ChosenSide::B, score_b)
    };
    let confidence = (curve.base + (score_a - score_b).abs() * curve.gain).min(curve.cap);

    Ok(Arbitration {
        chosen,
        confidence,
        reasoning,
        impact,
    })
}

/// Higher safety score wins
pub struct SafetyAlways;

impl Arbiter for SafetyAlways {
    fn arbitrate(&self, input: &ArbitrationInput<'_>) -> Result<Arbitration> {
        let a = input.a.score(ScoreKind::Safety);
        let b = input.b.score(ScoreKind::Safety);
        let reasoning = if a >= b {
            format!("Safety priority: option A score {:.2} vs B {:.2}", a, b)
        } else {
            format!("Safety priority: option B score {:.2} vs A {:.2}", b, a)
        };
        decide(a, b, STANDARD, reasoning)
    }
}

/// Decision-weighted sum scaled by recent performance and volatility
pub struct AdaptiveWeighted;

impl AdaptiveWeighted {
    fn weighted(option: &ConflictOption, weights: &DecisionWeights) -> f64 {
        Factor::ALL
            .iter()
            .map(|f| option.score(ScoreKind::from(*f)) * weights.weight_or_default(*f))
            .sum()
    }

    /// Bounded multiplier in [0.5, 1.5]
    pub fn adaptive_factor(recent_success_rate: f64, context: &ConflictContext) -> f64 {
        let mut factor: f64 = 1.0;

        if recent_success_rate > 0.7 {
            factor *= 1.1;
        } else if recent_success_rate < 0.3 {
            factor *= 0.9;
        }

        let volatility = context.market_volatility.unwrap_or(1.0);
        if volatility > 2.0 {
            factor *= 0.9;
        } else if volatility < 0.5 {
            factor *= 1.1;
        }

        factor.clamp(0.5, 1.5)
    }
}

impl Arbiter for AdaptiveWeighted {
    fn arbitrate(&self, input: &ArbitrationInput<'_>) -> Result<Arbitration> {
        let factor = Self::adaptive_factor(input.recent_success_rate, input.context);
        let a = Self::weighted(input.a, input.weights) * factor;
        let b = Self::weighted(input.b, input.weights) * factor;
        decide(
            a,
            b,
            Curve {
                cap: 0.95,
                ..STANDARD
            },
            format!("Adaptive weighted: A={:.3} vs B={:.3}", a, b),
        )
    }
}

/// 60% immediate, 40% long-term
pub struct Balanced6040;

impl Arbiter for Balanced6040 {
    fn arbitrate(&self, input: &ArbitrationInput<'_>) -> Result<Arbitration> {
        let blend = |o: &ConflictOption| o.score(ScoreKind::Immediate) * 0.6 + o.score(ScoreKind::Longterm) * 0.4;
        let (a, b) = (blend(input.a), blend(input.b));
        decide(a, b, STANDARD, format!("Balanced 60:40: A={:.3} vs B={:.3}", a, b))
    }
}

/// Accuracy decides unless it is nearly tied, then performance contributes 20%
pub struct AccuracyFirst;

impl Arbiter for AccuracyFirst {
    fn arbitrate(&self, input: &ArbitrationInput<'_>) -> Result<Arbitration> {
        let acc_a = input.a.score(ScoreKind::Accuracy);
        let acc_b = input.b.score(ScoreKind::Accuracy);

        let (a, b) = if (acc_a - acc_b).abs() < 0.05 {
            (
                acc_a * 0.8 + input.a.score(ScoreKind::Performance) * 0.2,
                acc_b * 0.8 + input.b.score(ScoreKind::Performance) * 0.2,
            )
        } else {
            (acc_a, acc_b)
        };

        decide(
            a,
            b,
            Curve {
                base: 0.6,
                gain: 0.4,
                cap: 0.95,
            },
            format!("Accuracy first: A={:.3} vs B={:.3}", a, b),
        )
    }
}

/// Portfolio scores, discounted when health is below 80
pub struct PortfolioPriority;

impl Arbiter for PortfolioPriority {
    fn arbitrate(&self, input: &ArbitrationInput<'_>) -> Result<Arbitration> {
        let health = input.context.portfolio_health.unwrap_or(100.0);
        let health_factor = if health > 80.0 { 1.0 } else { health / 80.0 };

        let a = input.a.score(ScoreKind::Portfolio) * health_factor;
        let b = input.b.score(ScoreKind::Portfolio) * health_factor;
        decide(
            a,
            b,
            STANDARD,
            format!(
                "Portfolio priority: A={:.3} vs B={:.3} (health: {:.1})",
                a, b, health
            ),
        )
    }
}

/// Zone scores scaled by distribution quality
pub struct ZonePriority;

impl Arbiter for ZonePriority {
    fn arbitrate(&self, input: &ArbitrationInput<'_>) -> Result<Arbitration> {
        let distribution = input.context.zone_distribution_score.unwrap_or(100.0);
        let factor = distribution / 100.0;

        let a = input.a.score(ScoreKind::Zone) * factor;
        let b = input.b.score(ScoreKind::Zone) * factor;
        decide(
            a,
            b,
            STANDARD,
            format!(
                "Zone priority: A={:.3} vs B={:.3} (distribution: {:.1})",
                a, b, distribution
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(
        strategy: ResolutionStrategy,
        a: ConflictOption,
        b: ConflictOption,
        context: ConflictContext,
        success_rate: f64,
    ) -> Result<Arbitration> {
        let weights = DecisionWeights::default();
        arbiter_for(strategy).arbitrate(&ArbitrationInput {
            a: &a,
            b: &b,
            context: &context,
            weights: &weights,
            recent_success_rate: success_rate,
        })
    }

    fn safety(label: &str, value: f64) -> ConflictOption {
        ConflictOption::new(label).with(ScoreKind::Safety, value)
    }

    #[test]
    fn test_safety_always_prefers_safer() {
        let result = run(
            ResolutionStrategy::SafetyAlways,
            safety("a", 0.3),
            safety("b", 0.7),
            ConflictContext::default(),
            0.5,
        )
        .unwrap();
        assert_eq!(result.chosen, ChosenSide::B);
        assert!((result.impact - 0.7).abs() < 1e-9);
        assert!((result.confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_safety_confidence_grows_with_gap() {
        let mut last = 0.0;
        for gap in [0.0, 0.1, 0.3, 0.5, 0.7] {
            let result = run(
                ResolutionStrategy::SafetyAlways,
                safety("a", 0.1 + gap),
                safety("b", 0.1),
                ConflictContext::default(),
                0.5,
            )
            .unwrap();
            assert_eq!(result.chosen, ChosenSide::A);
            assert!(result.confidence > last || gap == 0.0);
            assert!((0.5..=0.95).contains(&result.confidence));
            last = result.confidence;
        }
    }

    #[test]
    fn test_tie_goes_to_a() {
        let result = run(
            ResolutionStrategy::SafetyAlways,
            safety("a", 0.4),
            safety("b", 0.4),
            ConflictContext::default(),
            0.5,
        )
        .unwrap();
        assert_eq!(result.chosen, ChosenSide::A);
        assert_eq!(result.confidence, 0.5);
    }

    #[test]
    fn test_adaptive_factor_bounds() {
        let calm = ConflictContext {
            market_volatility: Some(0.2),
            ..Default::default()
        };
        let wild = ConflictContext {
            market_volatility: Some(3.0),
            ..Default::default()
        };
        assert!((AdaptiveWeighted::adaptive_factor(0.9, &calm) - 1.21).abs() < 1e-9);
        assert!((AdaptiveWeighted::adaptive_factor(0.1, &wild) - 0.81).abs() < 1e-9);
        assert_eq!(AdaptiveWeighted::adaptive_factor(0.5, &ConflictContext::default()), 1.0);
    }

    #[test]
    fn test_adaptive_weighted_uses_decision_weights() {
        // portfolio weight 0.25 vs zone weight 0.20
        let result = run(
            ResolutionStrategy::AdaptiveWeighted,
            ConflictOption::new("portfolio_priority").with(ScoreKind::Portfolio, 0.8),
            ConflictOption::new("zone_priority").with(ScoreKind::Zone, 0.8),
            ConflictContext::default(),
            0.5,
        )
        .unwrap();
        assert_eq!(result.chosen, ChosenSide::A);
        assert!((result.impact - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_balanced_60_40() {
        let a = ConflictOption::new("now")
            .with(ScoreKind::Immediate, 0.9)
            .with(ScoreKind::Longterm, 0.1);
        let b = ConflictOption::new("later")
            .with(ScoreKind::Immediate, 0.4)
            .with(ScoreKind::Longterm, 0.8);
        let result = run(ResolutionStrategy::Balanced6040, a, b, ConflictContext::default(), 0.5).unwrap();
        // A = 0.58, B = 0.56
        assert_eq!(result.chosen, ChosenSide::A);
        assert!((result.impact - 0.58).abs() < 1e-9);
    }

    #[test]
    fn test_accuracy_first_blends_near_ties() {
        let a = ConflictOption::new("fast")
            .with(ScoreKind::Accuracy, 0.80)
            .with(ScoreKind::Performance, 0.2);
        let b = ConflictOption::new("precise")
            .with(ScoreKind::Accuracy, 0.82)
            .with(ScoreKind::Performance, 0.9);
        let result = run(ResolutionStrategy::AccuracyFirst, a.clone(), b, ConflictContext::default(), 0.5).unwrap();
        assert_eq!(result.chosen, ChosenSide::B);
        assert!(result.confidence >= 0.6);

        let far = ConflictOption::new("precise")
            .with(ScoreKind::Accuracy, 0.5)
            .with(ScoreKind::Performance, 1.0);
        let result = run(ResolutionStrategy::AccuracyFirst, a, far, ConflictContext::default(), 0.5).unwrap();
        assert_eq!(result.chosen, ChosenSide::A);
        assert!((result.impact - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_portfolio_priority_health_discount() {
        let context = ConflictContext {
            portfolio_health: Some(40.0),
            ..Default::default()
        };
        let result = run(
            ResolutionStrategy::PortfolioPriority,
            ConflictOption::new("balance_priority").with(ScoreKind::Balance, 0.9),
            ConflictOption::new("volume_priority").with(ScoreKind::Portfolio, 0.8),
            context,
            0.5,
        )
        .unwrap();
        assert_eq!(result.chosen, ChosenSide::B);
        assert!((result.impact - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_zone_priority_distribution_factor() {
        let context = ConflictContext {
            zone_distribution_score: Some(50.0),
            ..Default::default()
        };
        let result = run(
            ResolutionStrategy::ZonePriority,
            ConflictOption::new("a").with(ScoreKind::Zone, 0.6),
            ConflictOption::new("b").with(ScoreKind::Zone, 0.2),
            context,
            0.5,
        )
        .unwrap();
        assert_eq!(result.chosen, ChosenSide::A);
        assert!((result.impact - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_non_finite_scores_fail() {
        let result = run(
            ResolutionStrategy::SafetyAlways,
            safety("a", f64::NAN),
            safety("b", 0.5),
            ConflictContext::default(),
            0.5,
        );
        assert!(matches!(result, Err(Error::Resolution(_))));
    }
}
