//! Survival tier evaluation.
//!
//! The tier is a coarse classification of the agent's liquidity estimate.
//! It gates every mutating action (tier `dead` refuses everything) and
//! feeds alert evaluation.

use serde::{Deserialize, Serialize};

use crate::config::SurvivalConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurvivalTier {
    Normal,
    LowCompute,
    Critical,
    Dead,
}

impl SurvivalTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SurvivalTier::Normal => "normal",
            SurvivalTier::LowCompute => "low_compute",
            SurvivalTier::Critical => "critical",
            SurvivalTier::Dead => "dead",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(SurvivalTier::Normal),
            "low_compute" => Some(SurvivalTier::LowCompute),
            "critical" => Some(SurvivalTier::Critical),
            "dead" => Some(SurvivalTier::Dead),
            _ => None,
        }
    }

    pub fn is_dead(&self) -> bool {
        matches!(self, SurvivalTier::Dead)
    }
}

/// Classify a liquidity estimate against the configured thresholds.
/// Thresholds are checked from the bottom up so overlapping values resolve
/// to the more severe tier.
pub fn evaluate_tier(estimated_usd: i64, config: &SurvivalConfig) -> SurvivalTier {
    if estimated_usd <= config.dead_usd {
        SurvivalTier::Dead
    } else if estimated_usd <= config.critical_usd {
        SurvivalTier::Critical
    } else if estimated_usd <= config.low_compute_usd {
        SurvivalTier::LowCompute
    } else {
        SurvivalTier::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SurvivalConfig {
        SurvivalConfig {
            low_compute_usd: 25,
            critical_usd: 10,
            dead_usd: 2,
            estimated_usd: 100,
        }
    }

    #[test]
    fn test_tier_boundaries() {
        let c = config();
        assert_eq!(evaluate_tier(100, &c), SurvivalTier::Normal);
        assert_eq!(evaluate_tier(26, &c), SurvivalTier::Normal);
        assert_eq!(evaluate_tier(25, &c), SurvivalTier::LowCompute);
        assert_eq!(evaluate_tier(11, &c), SurvivalTier::LowCompute);
        assert_eq!(evaluate_tier(10, &c), SurvivalTier::Critical);
        assert_eq!(evaluate_tier(3, &c), SurvivalTier::Critical);
        assert_eq!(evaluate_tier(2, &c), SurvivalTier::Dead);
        assert_eq!(evaluate_tier(-5, &c), SurvivalTier::Dead);
    }

    #[test]
    fn test_tier_monotone_in_estimate() {
        let c = config();
        let order = |tier: SurvivalTier| match tier {
            SurvivalTier::Dead => 0,
            SurvivalTier::Critical => 1,
            SurvivalTier::LowCompute => 2,
            SurvivalTier::Normal => 3,
        };
        let mut last = 0;
        for usd in -10..200 {
            let rank = order(evaluate_tier(usd, &c));
            assert!(rank >= last, "tier regressed at {}", usd);
            last = rank;
        }
    }

    #[test]
    fn test_roundtrip_strings() {
        for tier in [
            SurvivalTier::Normal,
            SurvivalTier::LowCompute,
            SurvivalTier::Critical,
            SurvivalTier::Dead,
        ] {
            assert_eq!(SurvivalTier::parse(tier.as_str()), Some(tier));
        }
    }
}
