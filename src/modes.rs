//! Operating-regime segmentation.
//!
//! Each mode is an independent boolean mask over the samples. Masks overlap
//! on purpose: a hot engine at full load is both `Wot` and `HeatSoak`.
//! A predicate whose channels are unbound yields an all-false mask.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::channels::ChannelId;
use crate::config::Thresholds;
use crate::frame::{CanonicalFrame, DerivedChannel};
use crate::logging::{log, obj, v_num, v_str, Domain, Level};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Idle,
    Cruise,
    Acceleration,
    Wot,
    Overrun,
    HeatSoak,
}

impl Mode {
    pub const ALL: [Mode; 6] = [
        Mode::Idle,
        Mode::Cruise,
        Mode::Acceleration,
        Mode::Wot,
        Mode::Overrun,
        Mode::HeatSoak,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Idle => "idle",
            Mode::Cruise => "cruise",
            Mode::Acceleration => "acceleration",
            Mode::Wot => "wot",
            Mode::Overrun => "overrun",
            Mode::HeatSoak => "heat_soak",
        }
    }
}

/// Sample count and share of the recording spent in one mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeSummary {
    pub mode: Mode,
    pub samples: usize,
    pub pct: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ModeMasks {
    len: usize,
    masks: BTreeMap<Mode, Vec<bool>>,
    /// Acceleration/overrun were computed from load because throttle is unbound.
    pub throttle_fallback: bool,
}

impl ModeMasks {
    pub fn mask(&self, mode: Mode) -> &[bool] {
        self.masks.get(&mode).map(|m| m.as_slice()).unwrap_or(&[])
    }

    pub fn is(&self, mode: Mode, index: usize) -> bool {
        self.mask(mode).get(index).copied().unwrap_or(false)
    }

    pub fn count(&self, mode: Mode) -> usize {
        self.mask(mode).iter().filter(|b| **b).count()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn summary(&self) -> Vec<ModeSummary> {
        Mode::ALL
            .iter()
            .map(|m| {
                let samples = self.count(*m);
                let pct = if self.len == 0 {
                    0.0
                } else {
                    samples as f64 / self.len as f64 * 100.0
                };
                ModeSummary { mode: *m, samples, pct }
            })
            .collect()
    }

    /// Values of `series` at samples where `mode` holds.
    pub fn select(&self, mode: Mode, series: &[Option<f64>]) -> Vec<f64> {
        series
            .iter()
            .zip(self.mask(mode))
            .filter_map(|(v, m)| if *m { *v } else { None })
            .collect()
    }
}

fn at(series: Option<&[Option<f64>]>, i: usize) -> Option<f64> {
    series.and_then(|s| s.get(i).copied().flatten())
}

fn gt(s: Option<&[Option<f64>]>, i: usize, th: f64) -> bool {
    at(s, i).map(|v| v > th).unwrap_or(false)
}

fn lt(s: Option<&[Option<f64>]>, i: usize, th: f64) -> bool {
    at(s, i).map(|v| v < th).unwrap_or(false)
}

fn within(s: Option<&[Option<f64>]>, i: usize, lo: f64, hi: f64) -> bool {
    at(s, i).map(|v| v >= lo && v <= hi).unwrap_or(false)
}

/// Mask from a per-sample predicate; all-false if any required series is unbound.
fn mask_of(len: usize, required: &[Option<&[Option<f64>]>], pred: impl Fn(usize) -> bool) -> Vec<bool> {
    if required.iter().any(|s| s.is_none()) {
        return vec![false; len];
    }
    (0..len).map(pred).collect()
}

pub fn segment(frame: &CanonicalFrame, t: &Thresholds) -> ModeMasks {
    let len = frame.len();
    let rpm = frame.channel(ChannelId::Rpm);
    let load = frame.channel(ChannelId::Load);
    let throttle = frame.channel(ChannelId::Throttle);
    let throttle_rate = frame.derived(DerivedChannel::ThrottleRate);
    let load_rate = frame.derived(DerivedChannel::LoadRate);
    let coolant = frame.channel(ChannelId::CoolantTemp);
    let oil = frame.channel(ChannelId::OilTemp);

    let mut masks = BTreeMap::new();
    masks.insert(
        Mode::Idle,
        mask_of(len, &[rpm, load], |i| lt(rpm, i, t.idle_rpm_max) && lt(load, i, t.idle_load_max)),
    );
    masks.insert(
        Mode::Cruise,
        mask_of(len, &[rpm, load], |i| {
            within(rpm, i, t.cruise_rpm_min, t.cruise_rpm_max)
                && within(load, i, t.cruise_load_min, t.cruise_load_max)
        }),
    );
    masks.insert(
        Mode::Wot,
        mask_of(len, &[rpm, load], |i| gt(load, i, t.wot_load_min) && gt(rpm, i, t.wot_rpm_min)),
    );

    let throttle_fallback = throttle.is_none();
    let (accel, overrun) = if throttle_fallback {
        (
            mask_of(len, &[load_rate, rpm], |i| {
                gt(load_rate, i, t.accel_load_rate) && gt(rpm, i, t.accel_rpm_min)
            }),
            mask_of(len, &[load, rpm], |i| {
                lt(load, i, t.overrun_load_max) && gt(rpm, i, t.overrun_rpm_min)
            }),
        )
    } else {
        (
            mask_of(len, &[throttle_rate, load], |i| {
                gt(throttle_rate, i, t.accel_throttle_rate) && gt(load, i, t.accel_load_min)
            }),
            mask_of(len, &[throttle, rpm], |i| {
                lt(throttle, i, t.overrun_throttle_max) && gt(rpm, i, t.overrun_rpm_min)
            }),
        )
    };
    masks.insert(Mode::Acceleration, accel);
    masks.insert(Mode::Overrun, overrun);

    let heat = if coolant.is_none() && oil.is_none() {
        vec![false; len]
    } else {
        (0..len)
            .map(|i| gt(coolant, i, t.heatsoak_coolant) || gt(oil, i, t.heatsoak_oil))
            .collect()
    };
    masks.insert(Mode::HeatSoak, heat);

    let out = ModeMasks {
        len,
        masks,
        throttle_fallback,
    };
    for s in out.summary() {
        log(
            Level::Debug,
            Domain::Modes,
            "mode_share",
            obj(&[
                ("mode", v_str(s.mode.as_str())),
                ("samples", v_num(s.samples as f64)),
                ("pct", v_num(s.pct)),
            ]),
        );
    }
    out
}
