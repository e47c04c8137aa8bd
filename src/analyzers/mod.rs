//! Domain analyzers and the shared finding/rule vocabulary.
//!
//! Each analyzer reduces the canonical frame to a handful of metrics and
//! runs them through an ordered rule table. Tables are listed from the most
//! to the least severe outcome and end with a catch-all `Safe` rule; the
//! first rule whose predicate holds decides the finding.

pub mod electrical;
pub mod fuel;
pub mod ignition;
pub mod thermal;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::channels::{ChannelId, Resolution};
use crate::config::Thresholds;
use crate::frame::{CanonicalFrame, Signal};
use crate::logging::{log_rule_hit, Domain};
use crate::modes::ModeMasks;
use crate::stats;

pub use electrical::ElectricalAnalyzer;
pub use fuel::FuelAnalyzer;
pub use ignition::IgnitionAnalyzer;
pub use thermal::ThermalAnalyzer;

/// Confidence ceiling for findings computed from one lambda bank when the
/// engine logs two.
pub const SINGLE_BANK_CONFIDENCE: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Safe,
    Warning,
    Critical,
    HardLimit,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Safe => "safe",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
            Severity::HardLimit => "hard_limit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subsystem {
    Fuel,
    Ignition,
    Thermal,
    Electrical,
}

impl Subsystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subsystem::Fuel => "fuel",
            Subsystem::Ignition => "ignition",
            Subsystem::Thermal => "thermal",
            Subsystem::Electrical => "electrical",
        }
    }

    pub fn log_domain(&self) -> Domain {
        match self {
            Subsystem::Fuel => Domain::Fuel,
            Subsystem::Ignition => Domain::Ignition,
            Subsystem::Thermal => Domain::Thermal,
            Subsystem::Electrical => Domain::Electrical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    NoData,
    Unknown,
    Nominal,
    // fuel
    InjectorSaturated,
    LeanAtLoad,
    RichAtLoad,
    LowVolumetricEfficiency,
    BankImbalance,
    // ignition
    SevereDetonation,
    SustainedKnock,
    SporadicKnock,
    IgnitionRetard,
    SparkScatter,
    // thermal
    OilOverheat,
    OilElevated,
    OilSustainedHigh,
    CoolantOverheat,
    CoolantElevated,
    EgtCritical,
    EgtElevated,
    // electrical
    LowVoltage,
    UnstableVoltage,
    VoltageSag,
    SensorFlatline,
    SensorDropout,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::NoData => "no_data",
            Status::Unknown => "unknown",
            Status::Nominal => "nominal",
            Status::InjectorSaturated => "injector_saturated",
            Status::LeanAtLoad => "lean_at_load",
            Status::RichAtLoad => "rich_at_load",
            Status::LowVolumetricEfficiency => "low_volumetric_efficiency",
            Status::BankImbalance => "bank_imbalance",
            Status::SevereDetonation => "severe_detonation",
            Status::SustainedKnock => "sustained_knock",
            Status::SporadicKnock => "sporadic_knock",
            Status::IgnitionRetard => "ignition_retard",
            Status::SparkScatter => "spark_scatter",
            Status::OilOverheat => "oil_overheat",
            Status::OilElevated => "oil_elevated",
            Status::OilSustainedHigh => "oil_sustained_high",
            Status::CoolantOverheat => "coolant_overheat",
            Status::CoolantElevated => "coolant_elevated",
            Status::EgtCritical => "egt_critical",
            Status::EgtElevated => "egt_elevated",
            Status::LowVoltage => "low_voltage",
            Status::UnstableVoltage => "unstable_voltage",
            Status::VoltageSag => "voltage_sag",
            Status::SensorFlatline => "sensor_flatline",
            Status::SensorDropout => "sensor_dropout",
        }
    }
}

/// Why a finding looks the way it does, beyond its severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// A required channel was never bound.
    DataAbsent,
    /// An input channel is bound but flagged flatline/dropout/constant.
    QualityLow,
    /// A rule threshold was crossed.
    ValueOutOfThreshold,
    /// Some derived samples were non-finite and excluded.
    ComputationDegenerate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub subsystem: Subsystem,
    pub status: Status,
    pub severity: Severity,
    pub metrics: BTreeMap<String, f64>,
    pub explanation: String,
    /// 0..=100
    pub confidence: f64,
    pub conditions: Vec<Condition>,
    /// Corrective action for the operator, absent on nominal and no-data findings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

impl Finding {
    pub fn no_data(subsystem: Subsystem, explanation: impl Into<String>) -> Self {
        Self {
            subsystem,
            status: Status::NoData,
            severity: Severity::Safe,
            metrics: BTreeMap::new(),
            explanation: explanation.into(),
            confidence: 0.0,
            conditions: vec![Condition::DataAbsent],
            recommendation: None,
        }
    }

    pub fn unknown(subsystem: Subsystem, explanation: impl Into<String>) -> Self {
        Self {
            subsystem,
            status: Status::Unknown,
            severity: Severity::Safe,
            metrics: BTreeMap::new(),
            explanation: explanation.into(),
            confidence: 0.0,
            conditions: Vec::new(),
            recommendation: None,
        }
    }

    pub fn metric(&self, key: &str) -> Option<f64> {
        self.metrics.get(key).copied()
    }

    fn with_condition(mut self, c: Condition) -> Self {
        if !self.conditions.contains(&c) {
            self.conditions.push(c);
        }
        self
    }
}

/// One row of an ordered rule table.
pub struct Rule<M> {
    pub severity: Severity,
    pub status: Status,
    pub message: &'static str,
    pub recommendation: Option<&'static str>,
    pub when: fn(&M, &Thresholds) -> bool,
}

/// First rule whose predicate holds, in declaration order.
pub fn first_match<'r, M>(rules: &'r [Rule<M>], metrics: &M, t: &Thresholds) -> Option<&'r Rule<M>> {
    rules.iter().find(|r| (r.when)(metrics, t))
}

/// `Some(v) > th`, false when the metric is unavailable.
pub fn above(v: Option<f64>, th: f64) -> bool {
    v.map(|x| x > th).unwrap_or(false)
}

pub fn below(v: Option<f64>, th: f64) -> bool {
    v.map(|x| x < th).unwrap_or(false)
}

/// Read-only view shared by every analyzer in a run.
pub struct AnalysisContext<'a> {
    pub frame: &'a CanonicalFrame,
    pub masks: &'a ModeMasks,
    pub resolution: &'a Resolution,
    pub thresholds: &'a Thresholds,
}

impl<'a> AnalysisContext<'a> {
    /// Finite values of a signal; `None` when unbound or entirely missing.
    pub fn values(&self, signal: impl Into<Signal>) -> Option<Vec<f64>> {
        let v = stats::finite(self.frame.series(signal.into())?);
        if v.is_empty() {
            None
        } else {
            Some(v)
        }
    }

    pub fn bound(&self, channel: ChannelId) -> bool {
        self.frame.has(channel)
    }

    /// Minimum binding confidence across the bound inputs.
    pub fn confidence(&self, inputs: &[ChannelId]) -> f64 {
        inputs
            .iter()
            .filter(|c| self.bound(**c))
            .map(|c| self.resolution.confidence(*c))
            .reduce(f64::min)
            .unwrap_or(0.0)
    }

    pub fn quality_low(&self, inputs: &[ChannelId]) -> bool {
        inputs.iter().any(|c| {
            self.resolution
                .binding(*c)
                .map(|b| b.is_bound() && b.flags.any())
                .unwrap_or(false)
        })
    }

    /// Evaluate a rule table and package the hit as a finding.
    pub fn evaluate<M>(
        &self,
        subsystem: Subsystem,
        rules: &[Rule<M>],
        metrics: &M,
        reported: Vec<(&'static str, Option<f64>)>,
        inputs: &[ChannelId],
    ) -> Finding {
        let (status, severity, message, recommendation) = match first_match(rules, metrics, self.thresholds) {
            Some(r) => (r.status, r.severity, r.message, r.recommendation),
            None => (Status::Nominal, Severity::Safe, "within limits", None),
        };

        let mut map = BTreeMap::new();
        for (k, v) in &reported {
            if let Some(x) = v.filter(|x| x.is_finite()) {
                map.insert((*k).to_string(), x);
            }
        }
        let detail: Vec<String> = map.iter().map(|(k, v)| format!("{}={:.3}", k, v)).collect();
        let explanation = if detail.is_empty() {
            message.to_string()
        } else {
            format!("{} ({})", message, detail.join(", "))
        };

        let log_pairs: Vec<(&str, f64)> = map.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        log_rule_hit(subsystem.log_domain(), status.as_str(), severity.as_str(), &log_pairs);

        let mut finding = Finding {
            subsystem,
            status,
            severity,
            metrics: map,
            explanation,
            confidence: self.confidence(inputs),
            conditions: Vec::new(),
            recommendation: recommendation.map(str::to_string),
        };
        if severity > Severity::Safe {
            finding = finding.with_condition(Condition::ValueOutOfThreshold);
        }
        if self.quality_low(inputs) {
            finding = finding.with_condition(Condition::QualityLow);
        }
        if reported.iter().any(|(_, v)| v.is_none()) {
            finding = finding.with_condition(Condition::DataAbsent);
        }
        finding
    }
}

/// Seam for subsystem analyzers. Implementations must not mutate shared state.
pub trait DomainAnalyzer: Send + Sync {
    fn subsystem(&self) -> Subsystem;
    fn analyze(&self, ctx: &AnalysisContext<'_>) -> Vec<Finding>;
}

pub fn default_analyzers() -> Vec<Box<dyn DomainAnalyzer>> {
    vec![
        Box::new(FuelAnalyzer),
        Box::new(IgnitionAnalyzer),
        Box::new(ThermalAnalyzer),
        Box::new(ElectricalAnalyzer),
    ]
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::channels::resolve;
    use crate::data::{Column, Table};
    use crate::modes::segment;

    /// Owns everything an `AnalysisContext` borrows.
    pub struct Fixture {
        pub frame: CanonicalFrame,
        pub masks: ModeMasks,
        pub resolution: Resolution,
        pub thresholds: Thresholds,
    }

    impl Fixture {
        pub fn new(columns: Vec<Column>) -> Self {
            Self::with_period(columns, 1.0)
        }

        pub fn with_period(columns: Vec<Column>, period: f64) -> Self {
            let table = Table::from_columns(columns);
            let resolution = resolve(&table);
            let thresholds = Thresholds::default();
            let frame = CanonicalFrame::build(&table, &resolution, period, thresholds.ignition_scatter_window);
            let masks = segment(&frame, &thresholds);
            Self {
                frame,
                masks,
                resolution,
                thresholds,
            }
        }

        pub fn ctx(&self) -> AnalysisContext<'_> {
            AnalysisContext {
                frame: &self.frame,
                masks: &self.masks,
                resolution: &self.resolution,
                thresholds: &self.thresholds,
            }
        }
    }

    pub fn find(findings: &[Finding], status: Status) -> Option<&Finding> {
        findings.iter().find(|f| f.status == status)
    }
}
