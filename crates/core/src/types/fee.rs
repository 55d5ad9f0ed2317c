//! Parking fee calculation
//!
//! Fees are charged per started day: any part of a day counts as a full day and
//! every stay is billed at least one day. Stays longer than the overstay
//! threshold pay a penalty on top, computed per started day of overstay.

use crate::error::{AppError, Result};
use crate::types::{Money, Timestamp, MILLIS_PER_DAY, MILLIS_PER_HOUR};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Daily rates and overstay rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Daily rate per vehicle type
    pub rates: BTreeMap<String, Money>,
    /// Rate for vehicle types missing from `rates`
    pub fallback_rate: Money,
    pub overstay_threshold_hours: i64,
    /// Penalty multiplier as a percentage (150 = 1.5x)
    pub penalty_percent: i64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        let rates = [
            ("Trailer", 225),
            ("6 Wheeler", 150),
            ("4 Wheeler", 100),
            ("2 Wheeler", 50),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), Money::from_major(v)))
        .collect();

        Self {
            rates,
            fallback_rate: Money::from_major(100),
            overstay_threshold_hours: 24,
            penalty_percent: 150,
        }
    }
}

/// Breakdown of a computed fee
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeCalculation {
    pub vehicle_type: String,
    pub duration_millis: i64,
    pub billed_days: i64,
    pub daily_rate: Money,
    pub base_fee: Money,
    pub is_overstay: bool,
    pub penalty_days: i64,
    pub penalty_fee: Money,
    pub total_fee: Money,
}

fn ceil_div(value: i64, divisor: i64) -> i64 {
    (value + divisor - 1) / divisor
}

impl FeeSchedule {
    pub fn vehicle_types(&self) -> impl Iterator<Item = &str> {
        self.rates.keys().map(String::as_str)
    }

    pub fn daily_rate(&self, vehicle_type: &str) -> Money {
        self.rates
            .get(vehicle_type)
            .copied()
            .unwrap_or(self.fallback_rate)
    }

    /// Days billed for a stay: `ceil(duration / 24h)`, minimum one
    pub fn billed_days(duration_millis: i64) -> i64 {
        ceil_div(duration_millis.max(0), MILLIS_PER_DAY).max(1)
    }

    fn penalty_for(&self, vehicle_type: &str, duration_millis: i64) -> (i64, Money) {
        let threshold = self.overstay_threshold_hours.saturating_mul(MILLIS_PER_HOUR);
        if duration_millis <= threshold {
            return (0, Money::ZERO);
        }
        let days = ceil_div(duration_millis - threshold, MILLIS_PER_DAY);
        let minor = self
            .daily_rate(vehicle_type)
            .minor()
            .saturating_mul(days)
            .saturating_mul(self.penalty_percent - 100)
            / 100;
        (days, Money::from_minor(minor.max(0)))
    }

    /// Computes the fee for a completed stay
    pub fn calculate(
        &self,
        vehicle_type: &str,
        entry_time: Timestamp,
        exit_time: Timestamp,
    ) -> Result<FeeCalculation> {
        if exit_time < entry_time {
            return Err(AppError::invalid_argument(format!(
                "exit time {} is before entry time {}",
                exit_time, entry_time
            )));
        }

        let duration_millis = exit_time.as_millis() - entry_time.as_millis();
        let billed_days = Self::billed_days(duration_millis);
        let daily_rate = self.daily_rate(vehicle_type);
        let base_fee = daily_rate.saturating_mul(billed_days);
        let (penalty_days, penalty_fee) = self.penalty_for(vehicle_type, duration_millis);

        Ok(FeeCalculation {
            vehicle_type: vehicle_type.to_string(),
            duration_millis,
            billed_days,
            daily_rate,
            base_fee,
            is_overstay: penalty_days > 0,
            penalty_days,
            penalty_fee,
            total_fee: base_fee.saturating_add(penalty_fee),
        })
    }

    /// Base fee estimate for a stay of `hours` (no penalty)
    pub fn estimate(&self, vehicle_type: &str, hours: i64) -> Money {
        let days = Self::billed_days(hours.saturating_mul(MILLIS_PER_HOUR));
        self.daily_rate(vehicle_type).saturating_mul(days)
    }

    pub fn overstay_penalty(&self, vehicle_type: &str, hours: i64) -> Money {
        self.penalty_for(vehicle_type, hours.saturating_mul(MILLIS_PER_HOUR))
            .1
    }
}
