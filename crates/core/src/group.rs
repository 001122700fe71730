//! Carpool group — the tenant boundary that owns client keys and is bound
//! to upstream accounts (spec §3).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Active,
    Inactive,
}

impl GroupStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, GroupStatus::Active)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub status: GroupStatus,
    pub max_members: u32,
    pub enterprise_id: Option<String>,
}

impl Group {
    /// Inactive groups reject all traffic; this is the single gate callers
    /// must check before proceeding with admission.
    pub fn accepts_traffic(&self) -> bool {
        self.status.is_active()
    }
}
