//! Threshold reference set and pipeline knobs.
//!
//! Every numeric literal used by the segmenter, analyzers and aggregator lives
//! here so a single revision of the limits is applied across the whole run.

use serde::{Deserialize, Serialize};

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parse_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: f64) -> f64 {
    lookup(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

/// Numeric limits for mode predicates and domain rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    // Mode segmentation
    pub idle_rpm_max: f64,
    pub idle_load_max: f64,
    pub cruise_rpm_min: f64,
    pub cruise_rpm_max: f64,
    pub cruise_load_min: f64,
    pub cruise_load_max: f64,
    pub accel_throttle_rate: f64,
    pub accel_load_min: f64,
    pub accel_load_rate: f64,
    pub accel_rpm_min: f64,
    pub wot_load_min: f64,
    pub wot_rpm_min: f64,
    pub overrun_throttle_max: f64,
    pub overrun_load_max: f64,
    pub overrun_rpm_min: f64,
    pub heatsoak_coolant: f64,
    pub heatsoak_oil: f64,

    // Fuel
    pub duty_hard_limit: f64,
    pub lambda_lean: f64,
    pub lambda_rich: f64,
    pub ve_min: f64,
    pub lambda_bank_delta_max: f64,

    // Ignition
    pub knock_severe: f64,
    pub knock_event: f64,
    pub knock_event_pct: f64,
    pub ignition_retard_min: f64,
    pub ignition_scatter_max: f64,
    pub ignition_scatter_window: usize,

    // Thermal
    pub oil_critical: f64,
    pub oil_warning: f64,
    pub oil_sustained: f64,
    pub oil_sustained_minutes: f64,
    pub coolant_critical: f64,
    pub coolant_warning: f64,
    pub egt_critical: f64,
    pub egt_warning: f64,

    // Electrical
    pub battery_min: f64,
    pub battery_std_max: f64,
    pub voltage_sag_max: f64,
    pub dropout_null_pct: f64,

    // Anomaly
    pub spike_z: f64,
    pub spike_critical_count: usize,
    pub rpm_drop_delta: f64,
    pub anomaly_min_samples: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            idle_rpm_max: 1500.0,
            idle_load_max: 30.0,
            cruise_rpm_min: 1500.0,
            cruise_rpm_max: 4000.0,
            cruise_load_min: 30.0,
            cruise_load_max: 60.0,
            accel_throttle_rate: 5.0,
            accel_load_min: 40.0,
            accel_load_rate: 10.0,
            accel_rpm_min: 2000.0,
            wot_load_min: 70.0,
            wot_rpm_min: 3000.0,
            overrun_throttle_max: 5.0,
            overrun_load_max: 20.0,
            overrun_rpm_min: 2000.0,
            heatsoak_coolant: 95.0,
            heatsoak_oil: 110.0,

            duty_hard_limit: 90.0,
            lambda_lean: 0.88,
            lambda_rich: 0.78,
            ve_min: 85.0,
            lambda_bank_delta_max: 0.04,

            knock_severe: 1.5,
            knock_event: 1.2,
            knock_event_pct: 5.0,
            ignition_retard_min: 0.0,
            ignition_scatter_max: 3.5,
            ignition_scatter_window: 10,

            oil_critical: 125.0,
            oil_warning: 115.0,
            oil_sustained: 110.0,
            oil_sustained_minutes: 5.0,
            coolant_critical: 105.0,
            coolant_warning: 98.0,
            egt_critical: 950.0,
            egt_warning: 900.0,

            battery_min: 12.5,
            battery_std_max: 1.0,
            voltage_sag_max: 1.4,
            dropout_null_pct: 10.0,

            spike_z: 3.0,
            spike_critical_count: 3,
            rpm_drop_delta: 1000.0,
            anomaly_min_samples: 10,
        }
    }
}

impl Thresholds {
    /// Reference set with the rule limits an operator most often retunes
    /// taken from the environment.
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    /// Same as `from_env`, reading variables through `lookup`. Unset or
    /// unparseable values keep the reference default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            duty_hard_limit: parse_or(&lookup, "DUTY_HARD_LIMIT", d.duty_hard_limit),
            lambda_lean: parse_or(&lookup, "LAMBDA_LEAN", d.lambda_lean),
            lambda_rich: parse_or(&lookup, "LAMBDA_RICH", d.lambda_rich),
            knock_severe: parse_or(&lookup, "KNOCK_CRITICAL", d.knock_severe),
            knock_event: parse_or(&lookup, "KNOCK_EVENT", d.knock_event),
            oil_critical: parse_or(&lookup, "OIL_CRITICAL", d.oil_critical),
            oil_warning: parse_or(&lookup, "OIL_WARNING", d.oil_warning),
            coolant_critical: parse_or(&lookup, "COOLANT_CRITICAL", d.coolant_critical),
            coolant_warning: parse_or(&lookup, "COOLANT_WARNING", d.coolant_warning),
            egt_critical: parse_or(&lookup, "EGT_CRITICAL", d.egt_critical),
            battery_min: parse_or(&lookup, "BATTERY_MIN", d.battery_min),
            spike_z: parse_or(&lookup, "SPIKE_Z", d.spike_z),
            ..d
        }
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub thresholds: Thresholds,
    /// Run analyzers, anomaly detection and correlation on scoped threads.
    pub parallel: bool,
    /// Used when the recording has no usable time column.
    pub sample_period_secs: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            parallel: true,
            sample_period_secs: 1.0,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            thresholds: Thresholds::from_lookup(&lookup),
            parallel: lookup("PARALLEL")
                .map(|v| !matches!(v.trim().to_lowercase().as_str(), "0" | "false" | "no"))
                .unwrap_or(true),
            sample_period_secs: parse_or(&lookup, "SAMPLE_PERIOD_SECS", 1.0),
        }
    }
}
