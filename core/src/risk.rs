//! Ordered risk classification

use std::fmt;

use serde::{Deserialize, Serialize};

/// Risk level for a step, flow, or plan
///
/// Ordering is significant: `Low < Medium < High < Critical`, so the
/// combined risk of several signals is simply their maximum.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    /// No notable risk
    #[default]
    Low,
    /// Mutating or otherwise noteworthy
    Medium,
    /// Destructive, financial, or failing
    High,
    /// Touches production or other critical targets
    Critical,
}

impl RiskLevel {
    /// All levels, lowest first
    pub const ALL: [RiskLevel; 4] = [
        RiskLevel::Low,
        RiskLevel::Medium,
        RiskLevel::High,
        RiskLevel::Critical,
    ];

    /// Probability that a mocked call against a tool of this risk succeeds
    pub fn success_probability(self) -> f64 {
        match self {
            RiskLevel::Low => 0.98,
            RiskLevel::Medium => 0.95,
            RiskLevel::High => 0.90,
            RiskLevel::Critical => 0.85,
        }
    }

    /// True for HIGH and CRITICAL
    pub fn is_high_or_above(self) -> bool {
        self >= RiskLevel::High
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
