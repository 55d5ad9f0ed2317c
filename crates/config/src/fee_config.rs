//! Fee schedule configuration section
//!
//! Amounts are written as decimal strings (`"225"`, `"62.50"`) and parsed
//! into fixed-point money, never through floating point.

use crate::validation::{ConfigSection, ValidationError, Validator};
use lotkeeper_core::{FeeSchedule, Money};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Daily rates per vehicle type and overstay rules
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeeConfig {
    /// Daily rate per vehicle type
    pub rates: BTreeMap<String, String>,

    /// Daily rate for vehicle types missing from `rates`
    pub fallback_rate: String,

    /// Stays longer than this many hours incur a penalty
    pub overstay_threshold_hours: i64,

    /// Penalty multiplier as a percentage (150 = 1.5x)
    pub penalty_percent: i64,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self::from_schedule(&FeeSchedule::default())
    }
}

fn parse_amount(value: &str, field: &str) -> Result<Money, ValidationError> {
    let amount = Money::parse_decimal(value)
        .map_err(|e| ValidationError::with_value(field, e, value))?;
    if amount.minor() < 0 {
        return Err(ValidationError::with_value(
            field,
            "must not be negative",
            value,
        ));
    }
    Ok(amount)
}

impl FeeConfig {
    pub fn from_schedule(schedule: &FeeSchedule) -> Self {
        Self {
            rates: schedule
                .rates
                .iter()
                .map(|(k, v)| (k.clone(), v.to_string()))
                .collect(),
            fallback_rate: schedule.fallback_rate.to_string(),
            overstay_threshold_hours: schedule.overstay_threshold_hours,
            penalty_percent: schedule.penalty_percent,
        }
    }

    /// Parses the section into a fee schedule
    pub fn to_schedule(&self) -> Result<FeeSchedule, Vec<ValidationError>> {
        self.validate()?;

        let mut rates = BTreeMap::new();
        let mut errors = Vec::new();
        for (vehicle_type, rate) in &self.rates {
            match parse_amount(rate, &format!("fees.rates.{}", vehicle_type)) {
                Ok(amount) => {
                    rates.insert(vehicle_type.trim().to_string(), amount);
                }
                Err(e) => errors.push(e),
            }
        }
        let fallback_rate = parse_amount(&self.fallback_rate, "fees.fallback_rate")
            .map_err(|e| vec![e])?;
        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(FeeSchedule {
            rates,
            fallback_rate,
            overstay_threshold_hours: self.overstay_threshold_hours,
            penalty_percent: self.penalty_percent,
        })
    }
}

impl ConfigSection for FeeConfig {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut results = Vec::new();

        for (vehicle_type, rate) in &self.rates {
            results.push(Validator::not_empty(vehicle_type, "fees.rates"));
            results.push(parse_amount(rate, &format!("fees.rates.{}", vehicle_type)).map(|_| ()));
        }
        results.push(parse_amount(&self.fallback_rate, "fees.fallback_rate").map(|_| ()));
        results.push(Validator::in_range(
            self.overstay_threshold_hours,
            1,
            24 * 365,
            "fees.overstay_threshold_hours",
        ));
        results.push(Validator::in_range(
            self.penalty_percent,
            100,
            1_000,
            "fees.penalty_percent",
        ));

        Validator::collect_errors(results)
    }

    fn merge(&mut self, other: Self) {
        self.rates.extend(other.rates);
        self.fallback_rate = other.fallback_rate;
        self.overstay_threshold_hours = other.overstay_threshold_hours;
        self.penalty_percent = other.penalty_percent;
    }

    fn section_name(&self) -> &'static str {
        "fees"
    }
}
