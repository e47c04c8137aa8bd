//! Statistical outliers and rpm discontinuities.

use serde::{Deserialize, Serialize};

use crate::analyzers::Severity;
use crate::channels::ChannelId;
use crate::config::Thresholds;
use crate::frame::CanonicalFrame;
use crate::logging::{log, obj, v_num, v_str, Domain, Level};
use crate::stats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    Spike,
    SuddenDrop,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::Spike => "spike",
            AnomalyKind::SuddenDrop => "sudden_drop",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub channel: ChannelId,
    pub kind: AnomalyKind,
    pub count: usize,
    pub sample_indices: Vec<usize>,
    pub severity: Severity,
    pub explanation: String,
}

/// Samples of `series` whose z-score magnitude reaches `z_limit`, by
/// original index. `None` when the series is too short or has no spread.
fn spike_indices(series: &[Option<f64>], z_limit: f64, min_samples: usize) -> Option<Vec<usize>> {
    let present = stats::finite(series);
    if present.len() < min_samples {
        return None;
    }
    let mean = stats::mean(&present)?;
    let std = stats::std_dev(&present).filter(|s| *s > 0.0)?;
    Some(
        series
            .iter()
            .enumerate()
            .filter_map(|(i, v)| {
                let x = v.filter(|x| x.is_finite())?;
                ((x - mean).abs() / std >= z_limit).then_some(i)
            })
            .collect(),
    )
}

pub fn detect(frame: &CanonicalFrame, t: &Thresholds) -> Vec<Anomaly> {
    let mut out = Vec::new();

    for (channel, series) in frame.channels() {
        let Some(idx) = spike_indices(series, t.spike_z, t.anomaly_min_samples) else {
            continue;
        };
        if idx.is_empty() {
            continue;
        }
        let severity = if idx.len() >= t.spike_critical_count {
            Severity::Critical
        } else {
            Severity::Warning
        };
        out.push(Anomaly {
            channel,
            kind: AnomalyKind::Spike,
            count: idx.len(),
            explanation: format!(
                "{} sample(s) of {} deviate by {}σ or more from the mean",
                idx.len(),
                channel.as_str(),
                t.spike_z
            ),
            sample_indices: idx,
            severity,
        });
    }

    if let Some(rpm) = frame.channel(ChannelId::Rpm) {
        let drops: Vec<usize> = stats::diff(rpm)
            .iter()
            .enumerate()
            .filter_map(|(i, d)| d.filter(|d| d.abs() > t.rpm_drop_delta).map(|_| i))
            .collect();
        if !drops.is_empty() {
            out.push(Anomaly {
                channel: ChannelId::Rpm,
                kind: AnomalyKind::SuddenDrop,
                count: drops.len(),
                explanation: format!(
                    "rpm changed by more than {} between consecutive samples; possible misfire, wheel-hop or log discontinuity",
                    t.rpm_drop_delta
                ),
                sample_indices: drops,
                severity: Severity::Warning,
            });
        }
    }

    for a in &out {
        log(
            Level::Debug,
            Domain::Anomaly,
            "anomaly",
            obj(&[
                ("channel", v_str(a.channel.as_str())),
                ("kind", v_str(a.kind.as_str())),
                ("count", v_num(a.count as f64)),
                ("severity", v_str(a.severity.as_str())),
            ]),
        );
    }
    out
}
