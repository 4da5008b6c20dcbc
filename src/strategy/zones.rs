//! Price zone analysis
//!
//! Buckets open positions by `floor(open_price / zone_size)` to detect
//! over-concentration. The analysis depends only on the positions, so it is
//! cached under the positions hash.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::types::Position;
use crate::config::ZoneTradingConfig;

/// Distribution score penalty per clustered zone
const CLUSTER_PENALTY: f64 = 20.0;

/// Cache key for the zone analysis of a position set
pub fn cache_key(positions_hash: &str) -> String {
    format!("zone_analysis:{}", positions_hash)
}

/// A zone holding more positions than allowed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteredZone {
    pub zone_index: i64,
    pub position_count: usize,
}

/// Zone occupancy summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneAnalysis {
    /// 0-100, 100 is perfectly spread
    pub distribution_score: f64,
    pub clustered_zones: Vec<ClusteredZone>,
    pub total_zones_used: usize,
    pub zones: BTreeMap<i64, Vec<Position>>,
}

impl Default for ZoneAnalysis {
    fn default() -> Self {
        Self {
            distribution_score: 100.0,
            clustered_zones: Vec::new(),
            total_zones_used: 0,
            zones: BTreeMap::new(),
        }
    }
}

impl ZoneAnalysis {
    /// Analyse positions; positions without a positive open price are ignored
    pub fn analyze(positions: &[Position], config: &ZoneTradingConfig) -> Self {
        if positions.is_empty() {
            return Self::default();
        }

        let mut zones: BTreeMap<i64, Vec<Position>> = BTreeMap::new();
        for position in positions.iter().filter(|p| p.open_price > 0.0) {
            if let Some(index) = zone_index(position.open_price, config.zone_size_pips) {
                zones.entry(index).or_default().push(position.clone());
            }
        }

        let max_per_zone = config.max_positions_per_zone as usize;
        let clustered_zones: Vec<ClusteredZone> = zones
            .iter()
            .filter(|(_, members)| members.len() > max_per_zone)
            .map(|(index, members)| ClusteredZone {
                zone_index: *index,
                position_count: members.len(),
            })
            .collect();

        let distribution_score = (100.0 - clustered_zones.len() as f64 * CLUSTER_PENALTY).max(0.0);

        Self {
            distribution_score,
            clustered_zones,
            total_zones_used: zones.len(),
            zones,
        }
    }

    /// How much room the signal's zone has left: 1.0 empty, 0.0 at cap
    pub fn clustering_score(&self, price: f64, config: &ZoneTradingConfig) -> f64 {
        let Some(index) = zone_index(price, config.zone_size_pips) else {
            return 1.0;
        };

        let max_per_zone = config.max_positions_per_zone.max(1) as f64;
        match self.zones.get(&index) {
            Some(members) => {
                let count = members.len() as f64;
                if count >= max_per_zone {
                    0.0
                } else {
                    1.0 - count / max_per_zone
                }
            }
            None => 1.0,
        }
    }
}

fn zone_index(price: f64, zone_size: u32) -> Option<i64> {
    if zone_size == 0 || !price.is_finite() {
        return None;
    }
    Some((price / zone_size as f64).floor() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::types::Direction;

    fn at(ticket: u64, open_price: f64) -> Position {
        Position {
            ticket,
            direction: Direction::Buy,
            volume: 0.01,
            open_price,
            profit: 0.0,
        }
    }

    #[test]
    fn test_empty_portfolio() {
        let analysis = ZoneAnalysis::analyze(&[], &ZoneTradingConfig::default());
        assert_eq!(analysis.distribution_score, 100.0);
        assert_eq!(analysis.total_zones_used, 0);
        assert_eq!(analysis.clustering_score(2000.0, &ZoneTradingConfig::default()), 1.0);
    }

    #[test]
    fn test_clustered_zone_penalty() {
        let config = ZoneTradingConfig::default();
        // Zone 80 covers [2000, 2025)
        let positions: Vec<Position> = (0..4).map(|i| at(i, 2000.0 + i as f64)).collect();

        let analysis = ZoneAnalysis::analyze(&positions, &config);
        assert_eq!(analysis.total_zones_used, 1);
        assert_eq!(
            analysis.clustered_zones,
            vec![ClusteredZone {
                zone_index: 80,
                position_count: 4
            }]
        );
        assert_eq!(analysis.distribution_score, 80.0);
        assert_eq!(analysis.clustering_score(2010.0, &config), 0.0);
        assert_eq!(analysis.clustering_score(2030.0, &config), 1.0);
    }

    #[test]
    fn test_partial_zone_room() {
        let config = ZoneTradingConfig::default();
        let analysis = ZoneAnalysis::analyze(&[at(1, 2001.0)], &config);
        assert!((analysis.clustering_score(2002.0, &config) - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_ignores_unpriced_positions() {
        let analysis = ZoneAnalysis::analyze(&[at(1, 0.0)], &ZoneTradingConfig::default());
        assert_eq!(analysis.total_zones_used, 0);
        assert_eq!(analysis.distribution_score, 100.0);
    }

    #[test]
    fn test_analysis_survives_json() {
        let config = ZoneTradingConfig::default();
        let analysis = ZoneAnalysis::analyze(&[at(1, 2001.0), at(2, 1890.0)], &config);
        let value = serde_json::to_value(&analysis).unwrap();
        let back: ZoneAnalysis = serde_json::from_value(value).unwrap();
        assert_eq!(back, analysis);
    }
}
