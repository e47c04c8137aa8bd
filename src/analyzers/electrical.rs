//! Electrical supply plus a sensor-health sweep over every bound channel.

use std::collections::BTreeMap;

use super::{above, below, first_match, AnalysisContext, Condition, DomainAnalyzer, Finding, Rule, Severity, Status, Subsystem};
use crate::channels::{ChannelId, MIN_SPREAD_SAMPLES};
use crate::frame::DerivedChannel;
use crate::logging::log_rule_hit;
use crate::stats;

pub struct BatteryMetrics {
    pub battery_min: Option<f64>,
    pub battery_std: Option<f64>,
}

pub const BATTERY_RULES: &[Rule<BatteryMetrics>] = &[
    Rule {
        severity: Severity::Warning,
        status: Status::LowVoltage,
        message: "low voltage",
        recommendation: Some("Check battery, alternator and charging circuit"),
        when: |m, t| below(m.battery_min, t.battery_min),
    },
    Rule {
        severity: Severity::Warning,
        status: Status::UnstableVoltage,
        message: "unstable supply voltage",
        recommendation: Some("Check the regulator and battery terminals"),
        when: |m, t| above(m.battery_std, t.battery_std_max),
    },
    Rule {
        severity: Severity::Safe,
        status: Status::Nominal,
        message: "supply voltage stable",
        recommendation: None,
        when: |_, _| true,
    },
];

pub struct SagMetrics {
    pub sag_max: Option<f64>,
}

pub const SAG_RULES: &[Rule<SagMetrics>] = &[
    Rule {
        severity: Severity::Warning,
        status: Status::VoltageSag,
        message: "voltage sag under load",
        recommendation: Some("Check grounding, alternator and regulator"),
        when: |m, t| above(m.sag_max, t.voltage_sag_max),
    },
    Rule {
        severity: Severity::Safe,
        status: Status::Nominal,
        message: "no significant voltage sag",
        recommendation: None,
        when: |_, _| true,
    },
];

pub struct SensorMetrics {
    /// Finite samples behind `std`.
    pub present: usize,
    pub std: Option<f64>,
    pub null_pct: Option<f64>,
}

pub const SENSOR_RULES: &[Rule<SensorMetrics>] = &[
    Rule {
        severity: Severity::Warning,
        status: Status::SensorFlatline,
        message: "sensor flatline",
        recommendation: Some("Check the sensor connector and wiring"),
        when: |m, _| m.present >= MIN_SPREAD_SAMPLES && m.std == Some(0.0),
    },
    Rule {
        severity: Severity::Warning,
        status: Status::SensorDropout,
        message: "sensor dropout",
        recommendation: Some("Check the sensor connector and logger sampling"),
        when: |m, t| above(m.null_pct, t.dropout_null_pct),
    },
    Rule {
        severity: Severity::Safe,
        status: Status::Nominal,
        message: "sensor healthy",
        recommendation: None,
        when: |_, _| true,
    },
];

pub struct ElectricalAnalyzer;

impl ElectricalAnalyzer {
    fn battery(&self, ctx: &AnalysisContext<'_>) -> Finding {
        let Some(batt) = ctx.values(ChannelId::BatteryVoltage) else {
            return Finding::no_data(Subsystem::Electrical, "battery voltage not bound");
        };
        let battery_min = stats::min(&batt);
        let battery_std = stats::std_dev(&batt);
        let stability_max = ctx
            .values(DerivedChannel::VoltageStability)
            .and_then(|v| stats::max(&v));

        let mut reported = vec![("battery_min", battery_min), ("battery_std", battery_std)];
        // Short recordings have no full stability window.
        if stability_max.is_some() {
            reported.push(("voltage_stability_max", stability_max));
        }
        ctx.evaluate(
            Subsystem::Electrical,
            BATTERY_RULES,
            &BatteryMetrics {
                battery_min,
                battery_std,
            },
            reported,
            &[ChannelId::BatteryVoltage],
        )
    }

    fn sag(&self, ctx: &AnalysisContext<'_>) -> Option<Finding> {
        let sag_max = stats::max(&ctx.values(DerivedChannel::VoltageSag)?);
        Some(ctx.evaluate(
            Subsystem::Electrical,
            SAG_RULES,
            &SagMetrics { sag_max },
            vec![("voltage_sag_max", sag_max)],
            &[ChannelId::BatteryVoltage],
        ))
    }

    /// One sub-finding per unhealthy channel; healthy channels emit nothing.
    fn sensor_health(&self, ctx: &AnalysisContext<'_>) -> Vec<Finding> {
        if ctx.frame.is_empty() {
            return Vec::new();
        }
        let mut out = Vec::new();
        for (channel, series) in ctx.frame.channels() {
            let present = stats::finite(series);
            if present.is_empty() {
                continue;
            }
            let metrics = SensorMetrics {
                present: present.len(),
                std: stats::std_dev(&present),
                null_pct: Some(stats::null_pct(series)),
            };
            let Some(rule) = first_match(SENSOR_RULES, &metrics, ctx.thresholds) else {
                continue;
            };
            if rule.severity == Severity::Safe {
                continue;
            }

            let mut map = BTreeMap::new();
            map.extend(metrics.std.map(|v| ("std".to_string(), v)));
            map.extend(metrics.null_pct.map(|v| ("null_pct".to_string(), v)));
            let pairs: Vec<(&str, f64)> = map.iter().map(|(k, v)| (k.as_str(), *v)).collect();
            log_rule_hit(Subsystem::Electrical.log_domain(), rule.status.as_str(), rule.severity.as_str(), &pairs);

            out.push(Finding {
                subsystem: Subsystem::Electrical,
                status: rule.status,
                severity: rule.severity,
                explanation: format!(
                    "{} on {} (null_pct={:.1})",
                    rule.message,
                    channel.as_str(),
                    metrics.null_pct.unwrap_or(0.0)
                ),
                metrics: map,
                confidence: ctx.resolution.confidence(channel),
                conditions: vec![Condition::ValueOutOfThreshold, Condition::QualityLow],
                recommendation: rule.recommendation.map(str::to_string),
            });
        }
        out
    }
}

impl DomainAnalyzer for ElectricalAnalyzer {
    fn subsystem(&self) -> Subsystem {
        Subsystem::Electrical
    }

    fn analyze(&self, ctx: &AnalysisContext<'_>) -> Vec<Finding> {
        let mut out = vec![self.battery(ctx)];
        out.extend(self.sag(ctx));
        out.extend(self.sensor_health(ctx));
        out
    }
}
