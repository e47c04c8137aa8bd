//! Pearson correlation over diagnostically meaningful channel pairs.

use serde::{Deserialize, Serialize};

use crate::channels::ChannelId;
use crate::frame::{CanonicalFrame, DerivedChannel, Signal};
use crate::logging::{log, obj, v_num, v_str, Domain, Level};
use crate::stats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strength {
    Negligible,
    Weak,
    Moderate,
    Strong,
}

impl Strength {
    pub fn classify(coefficient: f64) -> Self {
        let r = coefficient.abs();
        if r < 0.3 {
            Strength::Negligible
        } else if r < 0.5 {
            Strength::Weak
        } else if r < 0.8 {
            Strength::Moderate
        } else {
            Strength::Strong
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Strength::Negligible => "Negligible",
            Strength::Weak => "Weak",
            Strength::Moderate => "Moderate",
            Strength::Strong => "Strong",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Positive,
    Negative,
}

impl Direction {
    pub fn of(coefficient: f64) -> Self {
        if coefficient > 0.0 {
            Direction::Positive
        } else {
            Direction::Negative
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Direction::Positive => "positive",
            Direction::Negative => "negative",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub channel_a: String,
    pub channel_b: String,
    /// -1..=1
    pub coefficient: f64,
    /// Paired samples the coefficient was computed over.
    pub samples: usize,
    pub strength: Strength,
    pub direction: Direction,
    pub interpretation: String,
}

pub struct CorrelationEngine {
    pairs: Vec<(Signal, Signal)>,
}

impl Default for CorrelationEngine {
    fn default() -> Self {
        use ChannelId::*;
        use DerivedChannel::*;
        Self {
            pairs: vec![
                (Rpm.into(), KnockPeak.into()),
                (LambdaAvg.into(), Egt.into()),
                (InjectorDuty.into(), Load.into()),
                (IgnitionAngle.into(), KnockPeak.into()),
                (IntakeTemp.into(), KnockPeak.into()),
                (Load.into(), OilTemp.into()),
                (Rpm.into(), BatteryVoltage.into()),
            ],
        }
    }
}

impl CorrelationEngine {
    pub fn empty() -> Self {
        Self { pairs: Vec::new() }
    }

    pub fn with_pair(mut self, a: impl Into<Signal>, b: impl Into<Signal>) -> Self {
        self.pairs.push((a.into(), b.into()));
        self
    }

    /// Pairs with a missing side or no variance are skipped.
    pub fn run(&self, frame: &CanonicalFrame) -> Vec<CorrelationResult> {
        let mut out = Vec::new();
        for (a, b) in &self.pairs {
            let (Some(xa), Some(xb)) = (frame.series(*a), frame.series(*b)) else {
                continue;
            };
            let Some((coefficient, samples)) = stats::pearson(xa, xb) else {
                continue;
            };
            let strength = Strength::classify(coefficient);
            let direction = Direction::of(coefficient);
            let interpretation = format!(
                "{} {} correlation between {} and {}",
                strength.label(),
                direction.label(),
                a.name(),
                b.name()
            );
            log(
                Level::Debug,
                Domain::Correlation,
                "pair",
                obj(&[
                    ("a", v_str(a.name())),
                    ("b", v_str(b.name())),
                    ("r", v_num(coefficient)),
                    ("n", v_num(samples as f64)),
                ]),
            );
            out.push(CorrelationResult {
                channel_a: a.name().to_string(),
                channel_b: b.name().to_string(),
                coefficient,
                samples,
                strength,
                direction,
                interpretation,
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::resolve;
    use crate::data::{Column, Table};

    fn frame_of(columns: Vec<Column>) -> CanonicalFrame {
        let table = Table::from_columns(columns);
        CanonicalFrame::build(&table, &resolve(&table), 1.0, 10)
    }

    #[test]
    fn test_strength_cutoffs() {
        assert_eq!(Strength::classify(0.29), Strength::Negligible);
        assert_eq!(Strength::classify(-0.3), Strength::Weak);
        assert_eq!(Strength::classify(0.5), Strength::Moderate);
        assert_eq!(Strength::classify(-0.8), Strength::Strong);
        assert_eq!(Direction::of(0.0), Direction::Negative);
    }

    #[test]
    fn test_rpm_knock_pair() {
        let frame = frame_of(vec![
            Column::dense("Motor RPM", &[1000.0, 2000.0, 3000.0, 4000.0]),
            Column::dense("Knock sensor #1", &[0.1, 0.2, 0.3, 0.4]),
        ]);
        let r = CorrelationEngine::default().run(&frame);
        assert_eq!(r.len(), 1);
        assert_eq!(r[0].strength, Strength::Strong);
        assert_eq!(r[0].direction, Direction::Positive);
        assert_eq!(r[0].interpretation, "Strong positive correlation between rpm and knock_peak");
    }

    #[test]
    fn test_unavailable_pairs_skipped() {
        let frame = frame_of(vec![
            Column::dense("Motor RPM", &[1000.0, 2000.0, 3000.0]),
            Column::dense("Knock sensor #1", &[0.2, 0.2, 0.2]),
        ]);
        assert!(CorrelationEngine::default().run(&frame).is_empty());
    }

    #[test]
    fn test_custom_pair() {
        let frame = frame_of(vec![
            Column::dense("Speed", &[10.0, 20.0, 30.0, 40.0]),
            Column::dense("Electric fan speed", &[90.0, 70.0, 40.0, 10.0]),
        ]);
        let r = CorrelationEngine::empty()
            .with_pair(ChannelId::Speed, ChannelId::FanSpeed)
            .run(&frame);
        assert_eq!(r[0].direction, Direction::Negative);
        assert!(r[0].coefficient < -0.9);
    }
}
