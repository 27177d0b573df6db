use serde::{Deserialize, Serialize};

/// Coarse-grained budget pressure levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpacePressure {
    Low,
    Medium,
    High,
    Critical,
}

/// Thresholds for computing [`SpacePressure`] from `granted / budget`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpacePressureThresholds {
    /// Enter `Medium` when `granted / budget >= medium`.
    pub medium: f64,
    /// Enter `High` when `granted / budget >= high`.
    pub high: f64,
    /// Enter `Critical` when `granted / budget >= critical`.
    pub critical: f64,
}

impl Default for SpacePressureThresholds {
    fn default() -> Self {
        Self {
            medium: 0.70,
            high: 0.85,
            critical: 0.95,
        }
    }
}

impl SpacePressureThresholds {
    pub fn level_for_ratio(self, ratio: f64) -> SpacePressure {
        if ratio >= self.critical {
            SpacePressure::Critical
        } else if ratio >= self.high {
            SpacePressure::High
        } else if ratio >= self.medium {
            SpacePressure::Medium
        } else {
            SpacePressure::Low
        }
    }
}
