//! Fixed bucketing of predicted fever probability into ordered risk tiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper (exclusive) bounds of the first three tiers, on the percentage scale.
pub const LOW_UPPER: f64 = 25.0;
pub const MODERATE_LOW_UPPER: f64 = 50.0;
pub const MODERATE_HIGH_UPPER: f64 = 75.0;

/// Ordered risk tiers. `Ord` follows clinical severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskTier {
    Low,
    ModerateLow,
    ModerateHigh,
    High,
}

impl RiskTier {
    pub const ALL: [RiskTier; 4] = [
        RiskTier::Low,
        RiskTier::ModerateLow,
        RiskTier::ModerateHigh,
        RiskTier::High,
    ];

    /// Classifies a probability in `[0, 1]`.
    pub fn from_probability(probability: f64) -> Self {
        classify(probability * 100.0)
    }

    pub fn label(self) -> &'static str {
        match self {
            RiskTier::Low => "Low Risk",
            RiskTier::ModerateLow => "Moderate-Low Risk",
            RiskTier::ModerateHigh => "Moderate-High Risk",
            RiskTier::High => "High Risk",
        }
    }

    /// Display colour of the tier's result banner.
    pub fn color(self) -> &'static str {
        match self {
            RiskTier::Low => "green",
            RiskTier::ModerateLow => "lightgreen",
            RiskTier::ModerateHigh => "orange",
            RiskTier::High => "red",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Maps a percentage in `[0, 100]` to its tier.
///
/// Bounds are half-open except for `High`, which also takes 100. Values below
/// 0 land in `Low` and values above 100 in `High`; a NaN fails every bound and
/// also lands in `High`.
pub fn classify(percentage: f64) -> RiskTier {
    if percentage < LOW_UPPER {
        RiskTier::Low
    } else if percentage < MODERATE_LOW_UPPER {
        RiskTier::ModerateLow
    } else if percentage < MODERATE_HIGH_UPPER {
        RiskTier::ModerateHigh
    } else {
        RiskTier::High
    }
}
