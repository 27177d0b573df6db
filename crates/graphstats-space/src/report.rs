use crate::manager::OwnerId;
use crate::pressure::SpacePressure;
use serde::{Deserialize, Serialize};

/// Bytes currently granted to one registered owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerUsage {
    pub id: OwnerId,
    pub name: String,
    pub granted_bytes: u64,
}

/// Snapshot of the shared budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceReport {
    pub budget_bytes: u64,
    pub granted_bytes: u64,
    pub pressure: SpacePressure,
    /// Sorted by granted bytes, largest first.
    pub owners: Vec<OwnerUsage>,
}

impl SpaceReport {
    pub fn available_bytes(&self) -> u64 {
        self.budget_bytes.saturating_sub(self.granted_bytes)
    }
}
