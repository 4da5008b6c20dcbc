//! Unified Position Sizing
//!
//! Scales the base lot by signal strength and by how healthy the portfolio,
//! zone and balance picture looks, then clamps and rounds to a tradable lot.

use serde::{Deserialize, Serialize};

use super::types::FactorScores;
use crate::error::{Error, Result};

/// Lot sizing configuration (`lot_sizing.*`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LotSizingConfig {
    #[serde(default = "default_base_lot_size")]
    pub base_lot_size: f64,
    #[serde(default = "default_max_lot_size")]
    pub max_lot_size: f64,
    /// Smallest lot ever returned; the base lot when unset
    #[serde(default)]
    pub min_lot_size: Option<f64>,
    /// Minimum tradable increment
    #[serde(default = "default_lot_step")]
    pub lot_step: f64,
    #[serde(default = "default_risk_percent_range")]
    pub risk_percent_range: [f64; 2],
    #[serde(default = "crate::config::default_true")]
    pub signal_strength_multiplier: bool,
}

fn default_base_lot_size() -> f64 {
    0.01
}

fn default_max_lot_size() -> f64 {
    0.10
}

fn default_lot_step() -> f64 {
    0.01
}

fn default_risk_percent_range() -> [f64; 2] {
    [0.01, 0.03]
}

impl Default for LotSizingConfig {
    fn default() -> Self {
        Self {
            base_lot_size: default_base_lot_size(),
            max_lot_size: default_max_lot_size(),
            min_lot_size: None,
            lot_step: default_lot_step(),
            risk_percent_range: default_risk_percent_range(),
            signal_strength_multiplier: true,
        }
    }
}

impl LotSizingConfig {
    pub fn min_lot(&self) -> f64 {
        self.min_lot_size.unwrap_or(self.base_lot_size)
    }

    /// Lot bounds aligned to the step grid
    fn aligned_bounds(&self) -> (f64, f64) {
        let (min, max) = (self.min_lot(), self.max_lot_size);
        if self.lot_step > 0.0 {
            let lo = round_lot((min / self.lot_step - 1e-9).ceil() * self.lot_step);
            let hi = round_lot((max / self.lot_step + 1e-9).floor() * self.lot_step);
            if lo <= hi {
                return (lo, hi);
            }
        }
        (min, max)
    }
}

/// Inputs for one sizing pass
#[derive(Debug, Clone)]
pub struct SizingContext {
    pub strength: f64,
    pub scores: FactorScores,
    pub confidence: f64,
}

impl Default for SizingContext {
    fn default() -> Self {
        Self {
            strength: 1.0,
            scores: FactorScores::neutral(),
            confidence: 0.5,
        }
    }
}

/// Position Sizer
pub struct PositionSizer {
    config: LotSizingConfig,
}

impl PositionSizer {
    /// Create a new position sizer
    pub fn new(config: LotSizingConfig) -> Self {
        Self { config }
    }

    /// Calculate lot size
    pub fn calculate_size(&self, ctx: &SizingContext) -> Result<f64> {
        Ok(self.explain_size(ctx)?.final_size)
    }

    /// Lot size with its full breakdown
    pub fn explain_size(&self, ctx: &SizingContext) -> Result<SizeExplanation> {
        let base = self.config.base_lot_size;

        // 1. Signal strength (0.5x to 3.0x)
        let strength_mult = if self.config.signal_strength_multiplier {
            ctx.strength.clamp(0.5, 3.0)
        } else {
            1.0
        };

        // 2. Portfolio health (0.5x to 1.0x)
        let health_mult = 0.5 + ctx.scores.portfolio * 0.5;

        // 3. Zone risk (0.7x to 1.3x)
        let zone_mult = 0.7 + ctx.scores.zone * 0.6;

        // 4. Balance (0.8x to 1.2x)
        let balance_mult = 0.8 + ctx.scores.balance * 0.4;

        // 5. Confidence (0.7x to 1.0x)
        let confidence_mult = 0.7 + ctx.confidence * 0.3;

        let raw_size = base * strength_mult * health_mult * zone_mult * balance_mult * confidence_mult;
        if !raw_size.is_finite() {
            return Err(Error::Internal(format!("non-finite lot size {}", raw_size)));
        }

        // 6. Clamp, snap to the lot grid, clamp to the aligned bounds
        let (lo, hi) = self.config.aligned_bounds();
        let bounded = raw_size.max(self.config.min_lot()).min(self.config.max_lot_size);
        let stepped = if self.config.lot_step > 0.0 {
            (bounded / self.config.lot_step).round() * self.config.lot_step
        } else {
            bounded
        };
        let final_size = round_lot(stepped.max(lo).min(hi));

        let [risk_min, risk_max] = self.config.risk_percent_range;
        let risk_percent = risk_min + ctx.scores.safety * (risk_max - risk_min);

        Ok(SizeExplanation {
            base_size: base,
            strength_multiplier: strength_mult,
            health_multiplier: health_mult,
            zone_multiplier: zone_mult,
            balance_multiplier: balance_mult,
            confidence_multiplier: confidence_mult,
            raw_size,
            min_lot: lo,
            max_lot: hi,
            risk_percent,
            final_size,
        })
    }

    /// Size used when sizing itself fails: the base lot, kept inside the bounds
    pub fn fallback_size(&self) -> f64 {
        let (lo, hi) = self.config.aligned_bounds();
        let base = self.config.base_lot_size;
        if base.is_finite() {
            base.max(lo).min(hi)
        } else {
            lo
        }
    }
}

impl Default for PositionSizer {
    fn default() -> Self {
        Self::new(LotSizingConfig::default())
    }
}

/// Strip float noise left by step arithmetic
fn round_lot(value: f64) -> f64 {
    (value * 1e8).round() / 1e8
}

/// Explanation of how size was calculated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeExplanation {
    pub base_size: f64,
    pub strength_multiplier: f64,
    pub health_multiplier: f64,
    pub zone_multiplier: f64,
    pub balance_multiplier: f64,
    pub confidence_multiplier: f64,
    pub raw_size: f64,
    pub min_lot: f64,
    pub max_lot: f64,
    /// Informational risk share interpolated by safety score
    pub risk_percent: f64,
    pub final_size: f64,
}

impl std::fmt::Display for SizeExplanation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Lot Size Calculation:")?;
        writeln!(f, "  Base lot: {:.4}", self.base_size)?;
        writeln!(f, "  × Strength ({:.2}x)", self.strength_multiplier)?;
        writeln!(f, "  × Health ({:.2}x)", self.health_multiplier)?;
        writeln!(f, "  × Zone ({:.2}x)", self.zone_multiplier)?;
        writeln!(f, "  × Balance ({:.2}x)", self.balance_multiplier)?;
        writeln!(f, "  × Confidence ({:.2}x)", self.confidence_multiplier)?;
        writeln!(f, "  Raw: {:.4}", self.raw_size)?;
        writeln!(f, "  Bounds: [{:.4}, {:.4}]", self.min_lot, self.max_lot)?;
        writeln!(f, "  Risk: {:.2}%", self.risk_percent * 100.0)?;
        writeln!(f, "  = Final: {:.4}", self.final_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perfect_scores() -> FactorScores {
        FactorScores {
            safety: 1.0,
            portfolio: 1.0,
            zone: 1.0,
            balance: 1.0,
            signal: 1.0,
        }
    }

    fn is_on_grid(size: f64, step: f64) -> bool {
        let steps = size / step;
        (steps - steps.round()).abs() < 1e-6
    }

    #[test]
    fn test_base_size() {
        let sizer = PositionSizer::new(LotSizingConfig {
            base_lot_size: 0.05,
            signal_strength_multiplier: false,
            ..Default::default()
        });

        // All multipliers at their neutral points multiply to ~1
        let ctx = SizingContext {
            strength: 1.0,
            scores: FactorScores {
                portfolio: 1.0,
                zone: 0.5,
                balance: 0.5,
                ..FactorScores::neutral()
            },
            confidence: 1.0,
        };

        let size = sizer.calculate_size(&ctx).unwrap();
        assert!((size - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_strength_scaling() {
        let sizer = PositionSizer::default();

        let weak = SizingContext {
            strength: 0.5,
            scores: perfect_scores(),
            confidence: 0.9,
        };
        let strong = SizingContext {
            strength: 2.5,
            ..weak.clone()
        };

        let weak_size = sizer.calculate_size(&weak).unwrap();
        let strong_size = sizer.calculate_size(&strong).unwrap();
        assert!(strong_size > weak_size);
    }

    #[test]
    fn test_bounds_and_grid() {
        let sizer = PositionSizer::default();

        for strength in [0.0, 0.3, 1.0, 1.7, 2.2, 3.0, 50.0] {
            for confidence in [0.0, 0.5, 1.0] {
                let ctx = SizingContext {
                    strength,
                    scores: perfect_scores(),
                    confidence,
                };
                let size = sizer.calculate_size(&ctx).unwrap();
                assert!(size >= 0.01 && size <= 0.10, "size {} out of bounds", size);
                assert!(is_on_grid(size, 0.01), "size {} off grid", size);
            }
        }
    }

    #[test]
    fn test_max_cap() {
        let sizer = PositionSizer::new(LotSizingConfig {
            base_lot_size: 0.05,
            max_lot_size: 0.08,
            ..Default::default()
        });
        let ctx = SizingContext {
            strength: 3.0,
            scores: perfect_scores(),
            confidence: 1.0,
        };
        assert!((sizer.calculate_size(&ctx).unwrap() - 0.08).abs() < 1e-9);
    }

    #[test]
    fn test_explain_size() {
        let sizer = PositionSizer::default();
        let ctx = SizingContext {
            strength: 1.5,
            scores: perfect_scores(),
            confidence: 0.8,
        };

        let explanation = sizer.explain_size(&ctx).unwrap();
        assert_eq!(explanation.strength_multiplier, 1.5);
        assert!((explanation.risk_percent - 0.03).abs() < 1e-12);
        assert!(explanation.final_size > 0.0);
        assert!(explanation.to_string().contains("Final"));
    }

    #[test]
    fn test_non_finite_strength_fails() {
        let sizer = PositionSizer::default();
        let ctx = SizingContext {
            strength: f64::NAN,
            ..Default::default()
        };
        assert!(sizer.calculate_size(&ctx).is_err());
        assert_eq!(sizer.fallback_size(), 0.01);
    }

    #[test]
    fn test_fallback_stays_in_bounds() {
        let sizer = PositionSizer::new(LotSizingConfig {
            base_lot_size: f64::MAX,
            min_lot_size: Some(0.01),
            ..Default::default()
        });
        let ctx = SizingContext {
            strength: 3.0,
            scores: perfect_scores(),
            confidence: 1.0,
        };
        // f64::MAX * 3.0 overflows to infinity
        assert!(sizer.calculate_size(&ctx).is_err());
        assert_eq!(sizer.fallback_size(), 0.10);
    }
}
