//! Configuration loading and validation
//!
//! Sections mirror the dotted parameter paths the decision core recognises
//! (`trading_parameters.max_positions`, `decision_weights.safety_check`, ...).
//! The engine never keeps a config permanently: it takes a fresh snapshot from a
//! [`ConfigSource`] at the start of every decision, so hot-swapped values apply
//! from the next call on.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

// Re-export configs owned by their components
pub use crate::cache::CacheConfig;
pub use crate::strategy::circuit_breaker::CircuitBreakerConfig;
pub use crate::strategy::sizing::LotSizingConfig;

use crate::error::Error;
use crate::strategy::types::{ConflictCategory, Factor, ResolutionStrategy};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub trading_parameters: TradingParameters,
    #[serde(default)]
    pub decision_weights: DecisionWeights,
    #[serde(default)]
    pub portfolio_management: PortfolioManagement,
    #[serde(default)]
    pub zone_based_trading: ZoneTradingConfig,
    #[serde(default)]
    pub lot_sizing: LotSizingConfig,
    #[serde(default)]
    pub risk_management: RiskManagement,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub conflict_resolution: ConflictResolutionConfig,
    #[serde(default)]
    pub performance_optimization: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingParameters {
    #[serde(default = "default_base_lot_size")]
    pub base_lot_size: f64,
    #[serde(default = "default_max_lot_size")]
    pub max_lot_size: f64,
    #[serde(default = "default_max_positions")]
    pub max_positions: u32,
    /// Minimum margin level in percent
    #[serde(default = "default_min_margin_level")]
    pub min_margin_level: f64,
    /// Seconds required between accepted signals
    #[serde(default = "default_signal_cooldown")]
    pub signal_cooldown: u64,
    #[serde(default = "default_max_signals_per_hour")]
    pub max_signals_per_hour: u32,
}

impl Default for TradingParameters {
    fn default() -> Self {
        Self {
            base_lot_size: default_base_lot_size(),
            max_lot_size: default_max_lot_size(),
            max_positions: default_max_positions(),
            min_margin_level: default_min_margin_level(),
            signal_cooldown: default_signal_cooldown(),
            max_signals_per_hour: default_max_signals_per_hour(),
        }
    }
}

/// Per-factor aggregation weights
///
/// A missing section gets the defaults below. A section that is present but
/// omits a key leaves that factor zero-weighted; it is excluded from the
/// normalisation sum instead of failing the decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionWeights {
    #[serde(default)]
    pub safety_check: Option<f64>,
    #[serde(default)]
    pub portfolio_health: Option<f64>,
    #[serde(default)]
    pub zone_distribution: Option<f64>,
    #[serde(default)]
    pub balance_optimization: Option<f64>,
    #[serde(default)]
    pub signal_quality: Option<f64>,
}

impl Default for DecisionWeights {
    fn default() -> Self {
        Self {
            safety_check: Some(0.35),
            portfolio_health: Some(0.25),
            zone_distribution: Some(0.20),
            balance_optimization: Some(0.15),
            signal_quality: Some(0.05),
        }
    }
}

impl DecisionWeights {
    /// Configured weight for a factor, zero when absent
    pub fn weight_for(&self, factor: Factor) -> f64 {
        self.raw(factor).unwrap_or(0.0)
    }

    /// Configured weight, or the default weight when absent
    pub fn weight_or_default(&self, factor: Factor) -> f64 {
        self.raw(factor)
            .or_else(|| Self::default().raw(factor))
            .unwrap_or(0.0)
    }

    fn raw(&self, factor: Factor) -> Option<f64> {
        match factor {
            Factor::Safety => self.safety_check,
            Factor::Portfolio => self.portfolio_health,
            Factor::Zone => self.zone_distribution,
            Factor::Balance => self.balance_optimization,
            Factor::Signal => self.signal_quality,
        }
    }

    /// Sum of the weights that are present, `None` if none are
    pub fn present_sum(&self) -> Option<f64> {
        let present: Vec<f64> = Factor::ALL.iter().filter_map(|f| self.raw(*f)).collect();
        if present.is_empty() {
            None
        } else {
            Some(present.iter().sum())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioManagement {
    #[serde(default = "default_balance_target_ratio")]
    pub balance_target_ratio: f64,
    #[serde(default = "default_balance_tolerance")]
    pub balance_tolerance: f64,
    /// Buy ratio above this (or below its complement) makes a redirect favourable
    #[serde(default = "default_redirect_threshold")]
    pub redirect_threshold: f64,
    #[serde(default = "default_max_redirect_ratio")]
    pub max_redirect_ratio: f64,
}

impl Default for PortfolioManagement {
    fn default() -> Self {
        Self {
            balance_target_ratio: default_balance_target_ratio(),
            balance_tolerance: default_balance_tolerance(),
            redirect_threshold: default_redirect_threshold(),
            max_redirect_ratio: default_max_redirect_ratio(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneTradingConfig {
    /// Width of one price zone, in price units
    #[serde(default = "default_zone_size_pips")]
    pub zone_size_pips: u32,
    #[serde(default = "default_max_positions_per_zone")]
    pub max_positions_per_zone: u32,
    /// Seconds a zone analysis stays cached
    #[serde(default = "default_zone_cache_ttl")]
    pub zone_cache_ttl: u64,
}

impl Default for ZoneTradingConfig {
    fn default() -> Self {
        Self {
            zone_size_pips: default_zone_size_pips(),
            max_positions_per_zone: default_max_positions_per_zone(),
            zone_cache_ttl: default_zone_cache_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskManagement {
    #[serde(default = "default_true")]
    pub anti_exposure_enabled: bool,
    #[serde(default = "default_max_exposure_distance")]
    pub max_exposure_distance: f64,
}

impl Default for RiskManagement {
    fn default() -> Self {
        Self {
            anti_exposure_enabled: true,
            max_exposure_distance: default_max_exposure_distance(),
        }
    }
}

/// Per-category strategy overrides; unset categories use their default strategy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConflictResolutionConfig {
    #[serde(default)]
    pub safety_vs_opportunity: Option<ResolutionStrategy>,
    #[serde(default)]
    pub portfolio_vs_zone: Option<ResolutionStrategy>,
    #[serde(default)]
    pub immediate_vs_longterm: Option<ResolutionStrategy>,
    #[serde(default)]
    pub performance_vs_accuracy: Option<ResolutionStrategy>,
    #[serde(default)]
    pub volume_vs_balance: Option<ResolutionStrategy>,
    #[serde(default)]
    pub zone_clustering: Option<ResolutionStrategy>,
}

impl ConflictResolutionConfig {
    pub fn strategy_for(&self, category: ConflictCategory) -> Option<ResolutionStrategy> {
        match category {
            ConflictCategory::SafetyVsOpportunity => self.safety_vs_opportunity,
            ConflictCategory::PortfolioVsZone => self.portfolio_vs_zone,
            ConflictCategory::ImmediateVsLongterm => self.immediate_vs_longterm,
            ConflictCategory::PerformanceVsAccuracy => self.performance_vs_accuracy,
            ConflictCategory::VolumeVsBalance => self.volume_vs_balance,
            ConflictCategory::ZoneClustering => self.zone_clustering,
        }
    }
}

fn default_base_lot_size() -> f64 {
    0.01
}

fn default_max_lot_size() -> f64 {
    0.10
}

fn default_max_positions() -> u32 {
    50
}

fn default_min_margin_level() -> f64 {
    200.0
}

fn default_signal_cooldown() -> u64 {
    60
}

fn default_max_signals_per_hour() -> u32 {
    40
}

fn default_balance_target_ratio() -> f64 {
    0.5
}

fn default_balance_tolerance() -> f64 {
    0.15
}

fn default_redirect_threshold() -> f64 {
    0.65
}

fn default_max_redirect_ratio() -> f64 {
    0.3
}

fn default_zone_size_pips() -> u32 {
    25
}

fn default_max_positions_per_zone() -> u32 {
    3
}

fn default_zone_cache_ttl() -> u64 {
    30
}

fn default_max_exposure_distance() -> f64 {
    150.0
}

pub(crate) fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix ARBITER_)
            .add_source(
                config::Environment::with_prefix("ARBITER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        // Weights must land near 1.0 so normalisation stays meaningful
        if let Some(total) = self.decision_weights.present_sum() {
            if !(0.95..=1.05).contains(&total) {
                anyhow::bail!("decision_weights must sum to ~1.0, got {:.3}", total);
            }
        }
        for factor in Factor::ALL {
            if let Some(weight) = self.decision_weights.raw(factor) {
                check_range(&format!("decision_weights.{}", factor.weight_key()), weight, 0.0, 1.0)?;
            }
        }

        let tp = &self.trading_parameters;
        check_range("trading_parameters.base_lot_size", tp.base_lot_size, 0.01, 1.0)?;
        check_range("trading_parameters.max_lot_size", tp.max_lot_size, 0.01, 10.0)?;
        check_range("trading_parameters.max_positions", tp.max_positions as f64, 1.0, 200.0)?;
        check_range("trading_parameters.min_margin_level", tp.min_margin_level, 100.0, 1000.0)?;
        check_range("trading_parameters.signal_cooldown", tp.signal_cooldown as f64, 1.0, 300.0)?;
        check_range(
            "trading_parameters.max_signals_per_hour",
            tp.max_signals_per_hour as f64,
            1.0,
            100.0,
        )?;

        let pm = &self.portfolio_management;
        check_range("portfolio_management.balance_target_ratio", pm.balance_target_ratio, 0.1, 0.9)?;
        check_range("portfolio_management.balance_tolerance", pm.balance_tolerance, 0.05, 0.3)?;
        check_range("portfolio_management.redirect_threshold", pm.redirect_threshold, 0.5, 0.8)?;
        check_range("portfolio_management.max_redirect_ratio", pm.max_redirect_ratio, 0.1, 0.8)?;

        let zt = &self.zone_based_trading;
        check_range("zone_based_trading.zone_size_pips", zt.zone_size_pips as f64, 5.0, 100.0)?;
        check_range(
            "zone_based_trading.max_positions_per_zone",
            zt.max_positions_per_zone as f64,
            1.0,
            10.0,
        )?;
        check_range("zone_based_trading.zone_cache_ttl", zt.zone_cache_ttl as f64, 10.0, 300.0)?;

        let ls = &self.lot_sizing;
        check_range("lot_sizing.base_lot_size", ls.base_lot_size, 0.01, 1.0)?;
        check_range("lot_sizing.max_lot_size", ls.max_lot_size, 0.01, 10.0)?;
        if ls.max_lot_size < ls.min_lot() {
            anyhow::bail!(
                "lot_sizing.max_lot_size {} is below the minimum lot {}",
                ls.max_lot_size,
                ls.min_lot()
            );
        }
        if ls.lot_step.is_nan() || ls.lot_step <= 0.0 {
            anyhow::bail!("lot_sizing.lot_step must be positive");
        }
        let [risk_min, risk_max] = ls.risk_percent_range;
        if risk_min >= risk_max {
            anyhow::bail!("risk_percent_range: min must be less than max");
        }

        if self.risk_management.max_exposure_distance <= 0.0 {
            anyhow::bail!("risk_management.max_exposure_distance must be positive");
        }

        let cb = &self.circuit_breaker;
        check_range("circuit_breaker.timeout", cb.timeout as f64, 1.0, 86_400.0)?;

        let po = &self.performance_optimization;
        check_range(
            "performance_optimization.max_cache_size",
            po.max_cache_size as f64,
            100.0,
            10_000.0,
        )?;
        check_range(
            "performance_optimization.cleanup_interval",
            po.cleanup_interval as f64,
            60.0,
            3600.0,
        )?;
        if po.memory_critical_mb < po.memory_high_mb {
            anyhow::bail!("performance_optimization.memory_critical_mb must be >= memory_high_mb");
        }

        Ok(())
    }
}

fn check_range(path: &str, value: f64, min: f64, max: f64) -> Result<()> {
    if !value.is_finite() || value < min || value > max {
        anyhow::bail!("{}: value {} outside [{}, {}]", path, value, min, max);
    }
    Ok(())
}

/// Read-only, occasionally changing configuration provider
pub trait ConfigSource: Send + Sync {
    /// Current configuration; cheap to call once per decision
    fn snapshot(&self) -> Arc<Config>;
}

/// Hot-swappable configuration holder
///
/// Updates are validated before they are swapped in; a rejected update keeps the
/// last-known-good configuration in place.
#[derive(Debug)]
pub struct SharedConfig {
    current: RwLock<Arc<Config>>,
}

impl SharedConfig {
    pub fn new(config: Config) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
        }
    }

    /// Validate and swap in a new configuration
    pub fn update(&self, config: Config) -> crate::error::Result<()> {
        if let Err(e) = config.validate() {
            tracing::error!(error = %e, "Configuration update rejected, keeping last-known-good");
            return Err(Error::Config(format!("{:#}", e)));
        }
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
        tracing::info!("Configuration updated");
        Ok(())
    }

    /// Reload from file (and environment), keeping the current config on failure
    pub fn reload<P: AsRef<Path>>(&self, path: P) -> crate::error::Result<()> {
        let config = Config::load(path)?;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
        tracing::info!("Configuration reloaded");
        Ok(())
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl ConfigSource for SharedConfig {
    fn snapshot(&self) -> Arc<Config> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
