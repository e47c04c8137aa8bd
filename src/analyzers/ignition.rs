//! Ignition: knock activity, timing retard and spark scatter, plus the
//! rpm × load timing map.

use serde::{Deserialize, Serialize};

use super::{above, below, AnalysisContext, DomainAnalyzer, Finding, Rule, Severity, Status, Subsystem};
use crate::channels::ChannelId;
use crate::frame::{CanonicalFrame, DerivedChannel};
use crate::stats;

pub const RPM_BINS: usize = 16;
pub const LOAD_BINS: usize = 12;

pub struct KnockMetrics {
    pub knock_max: Option<f64>,
    /// Share of all samples with `knock_peak` above the event threshold, percent.
    pub event_pct: Option<f64>,
}

pub const KNOCK_RULES: &[Rule<KnockMetrics>] = &[
    Rule {
        severity: Severity::Critical,
        status: Status::SevereDetonation,
        message: "severe detonation",
        recommendation: Some("Pull timing at high load and check fuel quality"),
        when: |m, t| above(m.knock_max, t.knock_severe),
    },
    Rule {
        severity: Severity::Critical,
        status: Status::SustainedKnock,
        message: "sustained knock",
        recommendation: Some("Pull timing in the knocking cells and check intake temperature"),
        when: |m, t| above(m.knock_max, t.knock_event) && above(m.event_pct, t.knock_event_pct),
    },
    Rule {
        severity: Severity::Warning,
        status: Status::SporadicKnock,
        message: "sporadic knock",
        recommendation: Some("Monitor knock; check fuel quality and sensor wiring"),
        when: |m, t| above(m.knock_max, t.knock_event),
    },
    Rule {
        severity: Severity::Safe,
        status: Status::Nominal,
        message: "no knock activity",
        recommendation: None,
        when: |_, _| true,
    },
];

pub struct TimingMetrics {
    pub ignition_min: Option<f64>,
    pub scatter_max: Option<f64>,
}

pub const TIMING_RULES: &[Rule<TimingMetrics>] = &[
    Rule {
        severity: Severity::Critical,
        status: Status::IgnitionRetard,
        message: "ignition timing pulled below zero",
        recommendation: Some("Check the ignition map and knock retard"),
        when: |m, t| below(m.ignition_min, t.ignition_retard_min),
    },
    Rule {
        severity: Severity::Warning,
        status: Status::SparkScatter,
        message: "spark scatter",
        recommendation: Some("Smooth the ignition map in the high load / mid rpm area"),
        when: |m, t| above(m.scatter_max, t.ignition_scatter_max),
    },
    Rule {
        severity: Severity::Safe,
        status: Status::Nominal,
        message: "timing stable",
        recommendation: None,
        when: |_, _| true,
    },
];

/// Mean ignition angle per equal-width rpm × load cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingMap {
    /// `RPM_BINS + 1` ascending edges.
    pub rpm_edges: Vec<f64>,
    /// `LOAD_BINS + 1` ascending edges.
    pub load_edges: Vec<f64>,
    /// `cells[load_bin][rpm_bin]`; `None` where no sample fell.
    pub cells: Vec<Vec<Option<f64>>>,
}

fn edges(lo: f64, hi: f64, bins: usize) -> Vec<f64> {
    let width = (hi - lo) / bins as f64;
    (0..=bins).map(|i| lo + width * i as f64).collect()
}

fn bin_of(v: f64, lo: f64, hi: f64, bins: usize) -> usize {
    if hi <= lo {
        return 0;
    }
    let idx = ((v - lo) / (hi - lo) * bins as f64).floor() as usize;
    idx.min(bins - 1)
}

impl TimingMap {
    pub fn build(frame: &CanonicalFrame) -> Option<Self> {
        let rpm = frame.channel(ChannelId::Rpm)?;
        let load = frame.channel(ChannelId::Load)?;
        let ign = frame.channel(ChannelId::IgnitionAngle)?;

        let triples: Vec<(f64, f64, f64)> = rpm
            .iter()
            .zip(load)
            .zip(ign)
            .filter_map(|((r, l), a)| Some(((*r)?, (*l)?, (*a)?)))
            .collect();
        if triples.is_empty() {
            return None;
        }
        let rs: Vec<f64> = triples.iter().map(|t| t.0).collect();
        let ls: Vec<f64> = triples.iter().map(|t| t.1).collect();
        let (rlo, rhi) = (stats::min(&rs)?, stats::max(&rs)?);
        let (llo, lhi) = (stats::min(&ls)?, stats::max(&ls)?);

        let mut sums = vec![vec![(0.0_f64, 0usize); RPM_BINS]; LOAD_BINS];
        for (r, l, a) in &triples {
            let cell = &mut sums[bin_of(*l, llo, lhi, LOAD_BINS)][bin_of(*r, rlo, rhi, RPM_BINS)];
            cell.0 += a;
            cell.1 += 1;
        }
        let cells = sums
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|(s, n)| if n == 0 { None } else { Some(s / n as f64) })
                    .collect()
            })
            .collect();

        Some(Self {
            rpm_edges: edges(rlo, rhi, RPM_BINS),
            load_edges: edges(llo, lhi, LOAD_BINS),
            cells,
        })
    }
}

pub struct IgnitionAnalyzer;

impl IgnitionAnalyzer {
    fn knock(&self, ctx: &AnalysisContext<'_>) -> Finding {
        let Some(peak) = ctx.frame.derived(DerivedChannel::KnockPeak) else {
            return Finding::no_data(Subsystem::Ignition, "no knock sensor bound");
        };
        let values = stats::finite(peak);
        if values.is_empty() {
            return Finding::no_data(Subsystem::Ignition, "knock sensors carry no samples");
        }
        let knock_max = stats::max(&values);
        let events = values.iter().filter(|v| **v > ctx.thresholds.knock_event).count();
        let event_pct = if ctx.frame.is_empty() {
            None
        } else {
            Some(events as f64 / ctx.frame.len() as f64 * 100.0)
        };

        let metrics = KnockMetrics { knock_max, event_pct };
        ctx.evaluate(
            Subsystem::Ignition,
            KNOCK_RULES,
            &metrics,
            vec![("knock_max", knock_max), ("event_pct", event_pct)],
            &[ChannelId::Knock1, ChannelId::Knock2],
        )
    }

    fn timing(&self, ctx: &AnalysisContext<'_>) -> Option<Finding> {
        let angles = ctx.values(ChannelId::IgnitionAngle)?;
        let ignition_min = stats::min(&angles);
        let scatter_max = ctx
            .values(DerivedChannel::IgnitionScatter)
            .and_then(|v| stats::max(&v));
        let metrics = TimingMetrics {
            ignition_min,
            scatter_max,
        };
        Some(ctx.evaluate(
            Subsystem::Ignition,
            TIMING_RULES,
            &metrics,
            vec![("ignition_min", ignition_min), ("scatter_max", scatter_max)],
            &[ChannelId::IgnitionAngle],
        ))
    }

    /// The timing map is the rpm-dependent part of this domain.
    fn map_availability(&self, ctx: &AnalysisContext<'_>) -> Option<Finding> {
        let missing: Vec<&str> = [ChannelId::Rpm, ChannelId::Load, ChannelId::IgnitionAngle]
            .iter()
            .filter(|c| !ctx.bound(**c))
            .map(|c| c.as_str())
            .collect();
        if missing.is_empty() {
            return None;
        }
        Some(Finding::no_data(
            Subsystem::Ignition,
            format!("timing map unavailable: {} not bound", missing.join(", ")),
        ))
    }
}

impl DomainAnalyzer for IgnitionAnalyzer {
    fn subsystem(&self) -> Subsystem {
        Subsystem::Ignition
    }

    fn analyze(&self, ctx: &AnalysisContext<'_>) -> Vec<Finding> {
        let mut out = vec![self.knock(ctx)];
        out.extend(self.timing(ctx));
        out.extend(self.map_availability(ctx));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::test_support::{find, Fixture};
    use crate::data::Column;

    fn knock_fixture(knock: &[f64]) -> Fixture {
        Fixture::new(vec![Column::dense("Knock sensor #1", knock)])
    }

    #[test]
    fn test_severe_detonation() {
        let f = IgnitionAnalyzer.analyze(&knock_fixture(&[0.2, 0.3, 1.6, 0.2]).ctx());
        assert_eq!(f[0].status, Status::SevereDetonation);
        assert_eq!(f[0].severity, Severity::Critical);
    }

    #[test]
    fn test_sustained_vs_sporadic() {
        // 2 of 20 samples above 1.2 → 10%
        let mut k = vec![0.3; 20];
        k[4] = 1.3;
        k[9] = 1.25;
        let f = IgnitionAnalyzer.analyze(&knock_fixture(&k).ctx());
        assert_eq!(f[0].status, Status::SustainedKnock);
        assert_eq!(f[0].metric("event_pct"), Some(10.0));

        // 1 of 40 → 2.5%
        let mut k = vec![0.3; 40];
        k[7] = 1.3;
        let f = IgnitionAnalyzer.analyze(&knock_fixture(&k).ctx());
        assert_eq!(f[0].status, Status::SporadicKnock);
        assert_eq!(f[0].severity, Severity::Warning);
    }

    #[test]
    fn test_knock_peak_uses_both_banks() {
        let fx = Fixture::new(vec![
            Column::dense("Knock sensor #1", &[0.2, 0.3, 0.2]),
            Column::dense("Knock sensor #2", &[0.2, 1.7, 0.2]),
        ]);
        let f = IgnitionAnalyzer.analyze(&fx.ctx());
        assert_eq!(f[0].status, Status::SevereDetonation);
    }

    #[test]
    fn test_no_knock_sensor_is_no_data() {
        let fx = Fixture::new(vec![Column::dense("Motor RPM", &[1000.0, 2000.0])]);
        let f = IgnitionAnalyzer.analyze(&fx.ctx());
        assert_eq!(f[0].status, Status::NoData);
    }

    #[test]
    fn test_negative_timing_is_retard() {
        let fx = Fixture::new(vec![Column::dense("Ignition angle", &[12.0, 10.0, -2.0, 8.0])]);
        let f = IgnitionAnalyzer.analyze(&fx.ctx());
        let t = find(&f, Status::IgnitionRetard).unwrap();
        assert_eq!(t.metric("ignition_min"), Some(-2.0));
    }

    #[test]
    fn test_spark_scatter() {
        let angles: Vec<f64> = (0..30).map(|i| if i % 2 == 0 { 25.0 } else { 15.0 }).collect();
        let fx = Fixture::new(vec![Column::dense("Ignition angle", &angles)]);
        let f = IgnitionAnalyzer.analyze(&fx.ctx());
        assert!(find(&f, Status::SparkScatter).is_some());
    }

    #[test]
    fn test_timing_map_needs_rpm() {
        let fx = Fixture::new(vec![
            Column::dense("Engine load", &[20.0, 40.0]),
            Column::dense("Ignition angle", &[20.0, 25.0]),
        ]);
        let f = IgnitionAnalyzer.analyze(&fx.ctx());
        let nd: Vec<_> = f.iter().filter(|x| x.status == Status::NoData).collect();
        assert!(nd.iter().any(|x| x.explanation.contains("rpm")));
        assert!(TimingMap::build(&fx.frame).is_none());
    }

    #[test]
    fn test_timing_map_cells() {
        let fx = Fixture::new(vec![
            Column::dense("Motor RPM", &[1000.0, 1000.0, 7000.0]),
            Column::dense("Engine load", &[10.0, 10.0, 100.0]),
            Column::dense("Ignition angle", &[10.0, 20.0, 30.0]),
        ]);
        let map = TimingMap::build(&fx.frame).unwrap();
        assert_eq!(map.rpm_edges.len(), RPM_BINS + 1);
        assert_eq!(map.cells.len(), LOAD_BINS);
        assert_eq!(map.cells[0][0], Some(15.0));
        assert_eq!(map.cells[LOAD_BINS - 1][RPM_BINS - 1], Some(30.0));
        assert_eq!(map.cells[5][5], None);
    }
}
