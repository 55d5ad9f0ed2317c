//! Parking statistics

use crate::types::Money;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Count and revenue for one group of entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupStats {
    pub count: u64,
    pub revenue: Money,
}

/// Aggregate view over all live entries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryStatistics {
    pub total_entries: u64,
    pub parked: u64,
    pub exited: u64,
    pub unpaid: u64,
    /// Sum of fees of Paid entries
    pub total_income: Money,
    /// Sum of all fees regardless of payment status
    pub billed_total: Money,
    pub by_vehicle_type: BTreeMap<String, GroupStats>,
    pub by_payment_status: BTreeMap<String, GroupStats>,
}

impl EntryStatistics {
    /// Creates empty statistics
    pub fn empty() -> Self {
        Self::default()
    }

    /// Billed but not yet collected
    pub fn outstanding(&self) -> Money {
        Money::from_minor(self.billed_total.minor() - self.total_income.minor())
    }

    /// Percentage of entries whose vehicle is still parked
    pub fn occupancy_percentage(&self) -> f64 {
        if self.total_entries == 0 {
            return 0.0;
        }
        (self.parked as f64 / self.total_entries as f64) * 100.0
    }
}
