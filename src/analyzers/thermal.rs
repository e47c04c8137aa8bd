//! Thermal: oil, coolant and exhaust gas temperature.

use super::{above, AnalysisContext, DomainAnalyzer, Finding, Rule, Severity, Status, Subsystem};
use crate::channels::ChannelId;
use crate::frame::DerivedChannel;
use crate::stats;

pub struct OilMetrics {
    pub oil_max: Option<f64>,
    /// Time spent above the sustained threshold, minutes.
    pub minutes_above: Option<f64>,
}

pub const OIL_RULES: &[Rule<OilMetrics>] = &[
    Rule {
        severity: Severity::Critical,
        status: Status::OilOverheat,
        message: "oil overheat",
        recommendation: Some("Check the oil cooler and oil level"),
        when: |m, t| above(m.oil_max, t.oil_critical),
    },
    Rule {
        severity: Severity::Warning,
        status: Status::OilElevated,
        message: "oil temperature elevated",
        recommendation: Some("Check the oil cooler and airflow across it"),
        when: |m, t| above(m.oil_max, t.oil_warning),
    },
    Rule {
        severity: Severity::Warning,
        status: Status::OilSustainedHigh,
        message: "oil held hot for a sustained period",
        recommendation: Some("Add oil cooling capacity or shorten high load runs"),
        when: |m, t| above(m.minutes_above, t.oil_sustained_minutes),
    },
    Rule {
        severity: Severity::Safe,
        status: Status::Nominal,
        message: "oil temperature within limits",
        recommendation: None,
        when: |_, _| true,
    },
];

pub struct CoolantMetrics {
    pub coolant_max: Option<f64>,
}

pub const COOLANT_RULES: &[Rule<CoolantMetrics>] = &[
    Rule {
        severity: Severity::Critical,
        status: Status::CoolantOverheat,
        message: "coolant overheat",
        recommendation: Some("Check the radiator, thermostat and water pump"),
        when: |m, t| above(m.coolant_max, t.coolant_critical),
    },
    Rule {
        severity: Severity::Warning,
        status: Status::CoolantElevated,
        message: "coolant temperature elevated",
        recommendation: Some("Check the radiator, fan operation and coolant level"),
        when: |m, t| above(m.coolant_max, t.coolant_warning),
    },
    Rule {
        severity: Severity::Safe,
        status: Status::Nominal,
        message: "coolant temperature within limits",
        recommendation: None,
        when: |_, _| true,
    },
];

pub struct EgtMetrics {
    pub egt_max: Option<f64>,
}

pub const EGT_RULES: &[Rule<EgtMetrics>] = &[
    Rule {
        severity: Severity::Critical,
        status: Status::EgtCritical,
        message: "exhaust gas temperature critical",
        recommendation: Some("Richen the mixture and review timing at high load"),
        when: |m, t| above(m.egt_max, t.egt_critical),
    },
    Rule {
        severity: Severity::Warning,
        status: Status::EgtElevated,
        message: "exhaust gas temperature elevated",
        recommendation: Some("Review mixture and timing at high load"),
        when: |m, t| above(m.egt_max, t.egt_warning),
    },
    Rule {
        severity: Severity::Safe,
        status: Status::Nominal,
        message: "exhaust gas temperature within limits",
        recommendation: None,
        when: |_, _| true,
    },
];

pub struct ThermalAnalyzer;

impl ThermalAnalyzer {
    fn oil(&self, ctx: &AnalysisContext<'_>) -> Finding {
        let Some(oil) = ctx.values(ChannelId::OilTemp) else {
            return Finding::no_data(Subsystem::Thermal, "oil temperature not bound");
        };
        let oil_max = stats::max(&oil);
        let hot = oil.iter().filter(|v| **v > ctx.thresholds.oil_sustained).count();
        let minutes_above = Some(hot as f64 * ctx.frame.sample_period_secs() / 60.0);

        ctx.evaluate(
            Subsystem::Thermal,
            OIL_RULES,
            &OilMetrics { oil_max, minutes_above },
            vec![("oil_max", oil_max), ("oil_minutes_above", minutes_above)],
            &[ChannelId::OilTemp],
        )
    }

    fn coolant(&self, ctx: &AnalysisContext<'_>) -> Finding {
        let Some(coolant) = ctx.values(ChannelId::CoolantTemp) else {
            return Finding::no_data(Subsystem::Thermal, "coolant temperature not bound");
        };
        let coolant_max = stats::max(&coolant);
        let stress_max = ctx
            .values(DerivedChannel::ThermalStress)
            .and_then(|v| stats::max(&v));

        let fan_efficiency_mean = ctx
            .values(DerivedChannel::FanEfficiency)
            .and_then(|v| stats::mean(&v));

        let mut reported = vec![("coolant_max", coolant_max)];
        // Informational only; absence must not mark the finding as data-absent.
        if stress_max.is_some() {
            reported.push(("thermal_stress_max", stress_max));
        }
        if fan_efficiency_mean.is_some() {
            reported.push(("fan_efficiency_mean", fan_efficiency_mean));
        }
        ctx.evaluate(
            Subsystem::Thermal,
            COOLANT_RULES,
            &CoolantMetrics { coolant_max },
            reported,
            &[ChannelId::CoolantTemp],
        )
    }

    fn egt(&self, ctx: &AnalysisContext<'_>) -> Option<Finding> {
        let egt_max = stats::max(&ctx.values(ChannelId::Egt)?);
        Some(ctx.evaluate(
            Subsystem::Thermal,
            EGT_RULES,
            &EgtMetrics { egt_max },
            vec![("egt_max", egt_max)],
            &[ChannelId::Egt],
        ))
    }
}

impl DomainAnalyzer for ThermalAnalyzer {
    fn subsystem(&self) -> Subsystem {
        Subsystem::Thermal
    }

    fn analyze(&self, ctx: &AnalysisContext<'_>) -> Vec<Finding> {
        let mut out = vec![self.oil(ctx), self.coolant(ctx)];
        out.extend(self.egt(ctx));
        out
    }
}
