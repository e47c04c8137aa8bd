//! End-to-end diagnosis: resolve → derive → segment → {analyzers, anomalies,
//! correlations} → risk.
//!
//! Resolution, derivation and segmentation are a single-writer phase. The
//! consumer stages only read the frame and may run on scoped threads; the
//! risk aggregator is the join barrier.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;

use crate::analyzers::ignition::TimingMap;
use crate::analyzers::{default_analyzers, AnalysisContext, DomainAnalyzer, Finding, Severity, Subsystem};
use crate::anomaly::{self, Anomaly};
use crate::channels::{ChannelBinding, ChannelId, ChannelResolver};
use crate::config::Config;
use crate::correlation::{CorrelationEngine, CorrelationResult};
use crate::data::{fingerprint, Table};
use crate::frame::{CanonicalFrame, DerivedChannel, Signal};
use crate::logging::{log, obj, v_num, v_str, Domain, Level, ProfileScope};
use crate::modes::{segment, ModeSummary};
use crate::risk::{self, RiskAssessment};
use crate::stats;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub fingerprint: String,
    pub samples: usize,
    pub sample_period_secs: f64,
    pub duration_secs: f64,
    pub coverage_pct: f64,
    pub bindings: Vec<ChannelBinding>,
    pub missing: Vec<ChannelId>,
    pub noisy: Vec<ChannelId>,
    pub modes: Vec<ModeSummary>,
    pub throttle_fallback: bool,
    pub findings: Vec<Finding>,
    pub anomalies: Vec<Anomaly>,
    pub correlations: Vec<CorrelationResult>,
    pub risk: RiskAssessment,
    /// Headline maxima/minima for the bound channels.
    pub kpis: BTreeMap<String, f64>,
    pub timing_map: Option<TimingMap>,
}

impl Report {
    pub fn findings_for(&self, subsystem: Subsystem) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.subsystem == subsystem)
    }

    /// Most severe finding across all subsystems.
    pub fn worst(&self) -> Option<&Finding> {
        self.findings.iter().max_by_key(|f| f.severity)
    }

    pub fn max_severity(&self) -> Severity {
        self.worst().map(|f| f.severity).unwrap_or(Severity::Safe)
    }
}

enum Extreme {
    Max,
    Min,
}

const KPIS: &[(&str, Signal, Extreme)] = &[
    ("rpm_max", Signal::Channel(ChannelId::Rpm), Extreme::Max),
    ("load_max", Signal::Channel(ChannelId::Load), Extreme::Max),
    ("air_mass_max", Signal::Channel(ChannelId::AirMass), Extreme::Max),
    ("injector_duty_max", Signal::Derived(DerivedChannel::InjectorDuty), Extreme::Max),
    ("ignition_min", Signal::Channel(ChannelId::IgnitionAngle), Extreme::Min),
    ("oil_temp_max", Signal::Channel(ChannelId::OilTemp), Extreme::Max),
    ("speed_max", Signal::Channel(ChannelId::Speed), Extreme::Max),
    ("battery_min", Signal::Channel(ChannelId::BatteryVoltage), Extreme::Min),
];

fn headline_kpis(frame: &CanonicalFrame) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    for (name, signal, extreme) in KPIS {
        let Some(series) = frame.series(*signal) else {
            continue;
        };
        let values = stats::finite(series);
        let v = match extreme {
            Extreme::Max => stats::max(&values),
            Extreme::Min => stats::min(&values),
        };
        if let Some(v) = v {
            out.insert((*name).to_string(), v);
        }
    }
    out
}

struct StageOutput {
    findings: Vec<Finding>,
    anomalies: Vec<Anomaly>,
    correlations: Vec<CorrelationResult>,
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "analyzer panicked".to_string()
    }
}

fn degraded(subsystem: Subsystem, reason: &str) -> Vec<Finding> {
    log(
        Level::Error,
        subsystem.log_domain(),
        "analyzer_failed",
        obj(&[("subsystem", v_str(subsystem.as_str())), ("reason", v_str(reason))]),
    );
    vec![Finding::unknown(
        subsystem,
        format!("{} analysis failed: {}", subsystem.as_str(), reason),
    )]
}

fn run_analyzer(analyzer: &dyn DomainAnalyzer, ctx: &AnalysisContext<'_>) -> Vec<Finding> {
    let _p = ProfileScope::with_context("analyzer", &[("subsystem", v_str(analyzer.subsystem().as_str()))]);
    analyzer.analyze(ctx)
}

fn sequential(
    analyzers: &[Box<dyn DomainAnalyzer>],
    ctx: &AnalysisContext<'_>,
    correlations: &CorrelationEngine,
) -> StageOutput {
    let mut findings = Vec::new();
    for a in analyzers {
        match catch_unwind(AssertUnwindSafe(|| run_analyzer(a.as_ref(), ctx))) {
            Ok(f) => findings.extend(f),
            Err(payload) => findings.extend(degraded(a.subsystem(), &panic_message(payload.as_ref()))),
        }
    }
    let anomalies = catch_unwind(AssertUnwindSafe(|| anomaly::detect(ctx.frame, ctx.thresholds))).unwrap_or_default();
    let correlations = catch_unwind(AssertUnwindSafe(|| correlations.run(ctx.frame))).unwrap_or_default();
    StageOutput {
        findings,
        anomalies,
        correlations,
    }
}

fn fork_join(
    analyzers: &[Box<dyn DomainAnalyzer>],
    ctx: &AnalysisContext<'_>,
    correlations: &CorrelationEngine,
) -> StageOutput {
    thread::scope(|s| {
        let handles: Vec<_> = analyzers
            .iter()
            .map(|a| (a.subsystem(), s.spawn(move || run_analyzer(a.as_ref(), ctx))))
            .collect();
        let anomaly_handle = s.spawn(|| anomaly::detect(ctx.frame, ctx.thresholds));
        let correlation_handle = s.spawn(|| correlations.run(ctx.frame));

        // Join in spawn order so the report is identical to a sequential run.
        let mut findings = Vec::new();
        for (subsystem, h) in handles {
            match h.join() {
                Ok(f) => findings.extend(f),
                Err(payload) => findings.extend(degraded(subsystem, &panic_message(payload.as_ref()))),
            }
        }
        StageOutput {
            findings,
            anomalies: anomaly_handle.join().unwrap_or_default(),
            correlations: correlation_handle.join().unwrap_or_default(),
        }
    })
}

/// Diagnose with the built-in analyzers and correlation pairs.
pub fn diagnose(table: &Table, config: &Config) -> Report {
    diagnose_with(table, config, &default_analyzers(), &CorrelationEngine::default())
}

pub fn diagnose_with(
    table: &Table,
    config: &Config,
    analyzers: &[Box<dyn DomainAnalyzer>],
    correlations: &CorrelationEngine,
) -> Report {
    let _p = ProfileScope::with_context("diagnose", &[("samples", v_num(table.len() as f64))]);
    let t = &config.thresholds;

    let resolution = {
        let _p = ProfileScope::new("resolve");
        ChannelResolver::default()
            .with_dropout_threshold(t.dropout_null_pct)
            .resolve(table)
    };
    let frame = {
        let _p = ProfileScope::new("derive");
        CanonicalFrame::build(table, &resolution, config.sample_period_secs, t.ignition_scatter_window)
    };
    let masks = {
        let _p = ProfileScope::new("segment");
        segment(&frame, t)
    };
    log(
        Level::Info,
        Domain::System,
        "frame_ready",
        obj(&[
            ("samples", v_num(frame.len() as f64)),
            ("coverage_pct", v_num(resolution.coverage_pct)),
            ("sample_period_secs", v_num(frame.sample_period_secs())),
            ("parallel", serde_json::Value::Bool(config.parallel)),
        ]),
    );

    let ctx = AnalysisContext {
        frame: &frame,
        masks: &masks,
        resolution: &resolution,
        thresholds: t,
    };
    let out = {
        let _p = ProfileScope::new("analyze");
        if config.parallel {
            fork_join(analyzers, &ctx, correlations)
        } else {
            sequential(analyzers, &ctx, correlations)
        }
    };

    let risk = {
        let _p = ProfileScope::new("risk");
        risk::assess(&out.findings)
    };

    Report {
        fingerprint: fingerprint(table),
        samples: frame.len(),
        sample_period_secs: frame.sample_period_secs(),
        duration_secs: frame.duration_secs(),
        coverage_pct: resolution.coverage_pct,
        missing: resolution.missing.clone(),
        noisy: resolution.noisy.clone(),
        bindings: resolution.bindings,
        modes: masks.summary(),
        throttle_fallback: masks.throttle_fallback,
        findings: out.findings,
        anomalies: out.anomalies,
        correlations: out.correlations,
        risk,
        kpis: headline_kpis(&frame),
        timing_map: TimingMap::build(&frame),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::Status;
    use crate::data::Column;
    use crate::risk::RiskLevel;

    struct Exploding;

    impl DomainAnalyzer for Exploding {
        fn subsystem(&self) -> Subsystem {
            Subsystem::Thermal
        }

        fn analyze(&self, _ctx: &AnalysisContext<'_>) -> Vec<Finding> {
            panic!("boom")
        }
    }

    fn sample_table() -> Table {
        Table::from_columns(vec![
            Column::dense("Motor RPM", &[900.0, 2500.0, 5200.0, 6100.0]),
            Column::dense("Engine load", &[15.0, 45.0, 90.0, 95.0]),
            Column::dense("Injection time", &[2.0, 5.0, 12.0, 14.0]),
            Column::dense("Oil temp.", &[95.0, 105.0, 118.0, 121.0]),
            Column::dense("Battery voltage", &[14.1, 14.0, 13.8, 13.7]),
        ])
    }

    #[test]
    fn test_empty_table_report() {
        let r = diagnose(&Table::default(), &Config::default());
        assert_eq!(r.coverage_pct, 0.0);
        assert_eq!(r.samples, 0);
        assert!(r.findings.iter().all(|f| f.status == Status::NoData));
        for s in [Subsystem::Fuel, Subsystem::Ignition, Subsystem::Thermal, Subsystem::Electrical] {
            assert!(r.findings_for(s).count() >= 1, "{:?}", s);
        }
        assert_eq!(r.risk.score, 0.0);
        assert_eq!(r.risk.level, RiskLevel::Low);
        assert!(r.modes.iter().all(|m| m.samples == 0));
        assert!(r.timing_map.is_none());
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let table = sample_table();
        let par = diagnose(&table, &Config::default());
        let seq = diagnose(&table, &Config { parallel: false, ..Config::default() });
        assert_eq!(par, seq);
    }

    #[test]
    fn test_panicking_analyzer_degrades_to_unknown() {
        let table = sample_table();
        let analyzers: Vec<Box<dyn DomainAnalyzer>> =
            vec![Box::new(crate::analyzers::FuelAnalyzer), Box::new(Exploding)];
        for parallel in [true, false] {
            let cfg = Config { parallel, ..Config::default() };
            let r = diagnose_with(&table, &cfg, &analyzers, &CorrelationEngine::default());
            let thermal: Vec<_> = r.findings_for(Subsystem::Thermal).collect();
            assert_eq!(thermal.len(), 1);
            assert_eq!(thermal[0].status, Status::Unknown);
            assert!(thermal[0].explanation.contains("boom"));
            assert!(r.findings_for(Subsystem::Fuel).count() >= 1);
        }
    }

    #[test]
    fn test_kpis_and_oil_warning() {
        let r = diagnose(&sample_table(), &Config::default());
        assert_eq!(r.kpis.get("rpm_max"), Some(&6100.0));
        assert_eq!(r.kpis.get("battery_min"), Some(&13.7));
        assert!(!r.kpis.contains_key("speed_max"));
        assert!(r.findings.iter().any(|f| f.status == Status::OilElevated));
        assert!(r.risk.score >= 10.0);
    }
}
