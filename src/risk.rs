//! Risk aggregation: weighted fusion of findings into one score.
//!
//! Runs only after every finding-producing stage has joined.

use serde::{Deserialize, Serialize};

use crate::analyzers::{Finding, Status, Subsystem};
use crate::logging::log_risk;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 70.0 {
            RiskLevel::Critical
        } else if score >= 40.0 {
            RiskLevel::High
        } else if score >= 20.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub name: String,
    pub subsystem: Subsystem,
    pub impact: u32,
    pub consequence: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// 0..=100
    pub score: f64,
    /// Unclamped sum of impacts.
    pub raw_score: u32,
    pub level: RiskLevel,
    /// Highest impact first; equal impacts keep finding order.
    pub factors: Vec<RiskFactor>,
}

impl RiskAssessment {
    pub fn none() -> Self {
        Self {
            score: 0.0,
            raw_score: 0,
            level: RiskLevel::Low,
            factors: Vec::new(),
        }
    }
}

pub struct Weight {
    pub status: Status,
    pub impact: u32,
    pub consequence: &'static str,
}

pub const WEIGHTS: &[Weight] = &[
    Weight { status: Status::SevereDetonation, impact: 40, consequence: "risk of piston/valve damage" },
    Weight { status: Status::SustainedKnock, impact: 40, consequence: "risk of piston/valve damage" },
    Weight { status: Status::SporadicKnock, impact: 20, consequence: "ring land and bearing wear" },
    Weight { status: Status::LeanAtLoad, impact: 35, consequence: "risk of melted pistons at load" },
    Weight { status: Status::OilOverheat, impact: 30, consequence: "oil breakdown and bearing failure" },
    Weight { status: Status::OilSustainedHigh, impact: 15, consequence: "accelerated oil degradation" },
    Weight { status: Status::OilElevated, impact: 10, consequence: "reduced oil film margin" },
    Weight { status: Status::InjectorSaturated, impact: 25, consequence: "fuel delivery ceiling reached; lean-out under boost" },
    Weight { status: Status::CoolantOverheat, impact: 30, consequence: "head gasket and cylinder head damage" },
    Weight { status: Status::EgtCritical, impact: 30, consequence: "turbine and exhaust valve damage" },
    Weight { status: Status::IgnitionRetard, impact: 30, consequence: "ECU pulling timing; combustion under stress" },
    Weight { status: Status::LowVoltage, impact: 15, consequence: "ignition and injector drive instability" },
];

fn weight_of(status: Status) -> Option<&'static Weight> {
    WEIGHTS.iter().find(|w| w.status == status)
}

pub fn assess(findings: &[Finding]) -> RiskAssessment {
    let mut factors: Vec<RiskFactor> = findings
        .iter()
        .filter_map(|f| {
            let w = weight_of(f.status)?;
            Some(RiskFactor {
                name: f.status.as_str().to_string(),
                subsystem: f.subsystem,
                impact: w.impact,
                consequence: w.consequence.to_string(),
            })
        })
        .collect();
    // sort_by is stable
    factors.sort_by(|a, b| b.impact.cmp(&a.impact));

    let raw_score: u32 = factors.iter().map(|f| f.impact).sum();
    let score = (raw_score as f64).clamp(0.0, 100.0);
    let level = RiskLevel::from_score(score);
    log_risk(score, level.as_str(), factors.len());

    RiskAssessment {
        score,
        raw_score,
        level,
        factors,
    }
}
