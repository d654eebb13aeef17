use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::records::parse_date;

pub const MIN_WEIGHT: f64 = 0.1;
pub const MAX_WEIGHT: f64 = 1.0;

const DAYS_PER_MONTH: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayType {
    Exponential,
    Linear,
    Step,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeDecayConfig {
    pub decay_type: DecayType,
    #[serde(default = "default_half_life")]
    pub half_life_months: f64,
    #[serde(default = "default_decay_rate")]
    pub decay_rate_per_month: f64,
    #[serde(default = "default_cutoff")]
    pub cutoff_months: f64,
}

fn default_half_life() -> f64 {
    12.0
}

fn default_decay_rate() -> f64 {
    0.05
}

fn default_cutoff() -> f64 {
    12.0
}

impl Default for TimeDecayConfig {
    fn default() -> Self {
        Self {
            decay_type: DecayType::Exponential,
            half_life_months: default_half_life(),
            decay_rate_per_month: default_decay_rate(),
            cutoff_months: default_cutoff(),
        }
    }
}

impl TimeDecayConfig {
    pub fn exponential(half_life_months: f64) -> Self {
        Self {
            decay_type: DecayType::Exponential,
            half_life_months,
            ..Self::default()
        }
    }

    pub fn linear(decay_rate_per_month: f64) -> Self {
        Self {
            decay_type: DecayType::Linear,
            decay_rate_per_month,
            ..Self::default()
        }
    }

    pub fn step(cutoff_months: f64) -> Self {
        Self {
            decay_type: DecayType::Step,
            cutoff_months,
            ..Self::default()
        }
    }

    pub fn none() -> Self {
        Self {
            decay_type: DecayType::None,
            ..Self::default()
        }
    }
}

/// Approximate month distance; the day part is counted as 1/30 of a month.
pub fn months_between(observed: NaiveDate, reference: NaiveDate) -> f64 {
    let years = reference.year() - observed.year();
    let months = reference.month() as i32 - observed.month() as i32;
    let days = reference.day() as i32 - observed.day() as i32;
    (years * 12 + months) as f64 + days as f64 / DAYS_PER_MONTH
}

/// Weight for an observation on `observed` seen from `reference`. Always in `[0.1, 1.0]`.
pub fn weight_between(observed: NaiveDate, reference: NaiveDate, cfg: &TimeDecayConfig) -> f64 {
    let months = months_between(observed, reference);
    let raw = match cfg.decay_type {
        DecayType::Exponential => {
            if cfg.half_life_months > 0.0 {
                0.5_f64.powf(months / cfg.half_life_months)
            } else {
                MAX_WEIGHT
            }
        }
        DecayType::Linear => (1.0 - months * cfg.decay_rate_per_month).max(MIN_WEIGHT),
        DecayType::Step => {
            if months <= cfg.cutoff_months {
                MAX_WEIGHT
            } else {
                MIN_WEIGHT
            }
        }
        DecayType::None => MAX_WEIGHT,
    };
    if raw.is_nan() {
        return MAX_WEIGHT;
    }
    raw.clamp(MIN_WEIGHT, MAX_WEIGHT)
}

/// String-date variant. Unparseable or missing dates fail closed to full weight.
pub fn weight(observed: &str, reference: &str, cfg: &TimeDecayConfig) -> f64 {
    match (parse_date(observed), parse_date(reference)) {
        (Some(obs), Some(reference)) => weight_between(obs, reference, cfg),
        _ => MAX_WEIGHT,
    }
}

/// Same as [`weight`] with an already-parsed reference date.
pub fn weight_at(observed: &str, reference: NaiveDate, cfg: &TimeDecayConfig) -> f64 {
    match parse_date(observed) {
        Some(obs) => weight_between(obs, reference, cfg),
        None => MAX_WEIGHT,
    }
}
