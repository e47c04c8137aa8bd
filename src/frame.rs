//! Canonical frame: bound source channels plus derived channels.
//!
//! Built once after resolution and shared read-only by every downstream
//! stage. Derived channels live in their own map so no stage ever mutates
//! the source series.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::channels::{ChannelId, Resolution};
use crate::data::Table;
use crate::logging::{log, obj, v_num, v_str, Domain, Level};
use crate::stats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedChannel {
    /// `injection_time * rpm / 1200`, percent.
    InjectorDuty,
    /// Mean of the available lambda banks.
    LambdaAvg,
    /// Max of the available knock sensors.
    KnockPeak,
    /// `air_mass * 100 / (rpm * 0.16 + 1)`.
    VolumetricEfficiency,
    /// `|lambda1 - lambda2|`.
    LambdaBankDelta,
    /// Rolling std of ignition angle.
    IgnitionScatter,
    /// `coolant + 0.5 * oil`.
    ThermalStress,
    /// `max(battery) - battery`.
    VoltageSag,
    /// Rolling std of battery voltage over `VOLTAGE_STABILITY_WINDOW` samples.
    VoltageStability,
    /// `fan_speed * (coolant - radiator_outlet) / 100`.
    FanEfficiency,
    ThrottleRate,
    LoadRate,
}

impl DerivedChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DerivedChannel::InjectorDuty => "injector_duty",
            DerivedChannel::LambdaAvg => "lambda_avg",
            DerivedChannel::KnockPeak => "knock_peak",
            DerivedChannel::VolumetricEfficiency => "volumetric_efficiency",
            DerivedChannel::LambdaBankDelta => "lambda_bank_delta",
            DerivedChannel::IgnitionScatter => "ignition_scatter",
            DerivedChannel::ThermalStress => "thermal_stress",
            DerivedChannel::VoltageSag => "voltage_sag",
            DerivedChannel::VoltageStability => "voltage_stability",
            DerivedChannel::FanEfficiency => "fan_efficiency",
            DerivedChannel::ThrottleRate => "throttle_rate",
            DerivedChannel::LoadRate => "load_rate",
        }
    }
}

/// Any series a downstream stage can ask the frame for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Channel(ChannelId),
    Derived(DerivedChannel),
}

impl Signal {
    pub fn name(&self) -> &'static str {
        match self {
            Signal::Channel(c) => c.as_str(),
            Signal::Derived(d) => d.as_str(),
        }
    }
}

impl From<ChannelId> for Signal {
    fn from(c: ChannelId) -> Self {
        Signal::Channel(c)
    }
}

impl From<DerivedChannel> for Signal {
    fn from(d: DerivedChannel) -> Self {
        Signal::Derived(d)
    }
}

pub const VOLTAGE_STABILITY_WINDOW: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct CanonicalFrame {
    len: usize,
    sample_period_secs: f64,
    channels: BTreeMap<ChannelId, Vec<Option<f64>>>,
    derived: BTreeMap<DerivedChannel, Vec<Option<f64>>>,
    /// Samples dropped from a derived channel because the formula produced a
    /// non-finite value.
    degenerate: BTreeMap<DerivedChannel, usize>,
}

fn padded(values: &[Option<f64>], len: usize) -> Vec<Option<f64>> {
    let mut out: Vec<Option<f64>> = values.iter().map(|v| v.filter(|x| x.is_finite())).collect();
    out.resize(len, None);
    out
}

impl CanonicalFrame {
    /// `fallback_period_secs` applies when the table has no usable time column.
    pub fn build(
        table: &Table,
        resolution: &Resolution,
        fallback_period_secs: f64,
        scatter_window: usize,
    ) -> Self {
        let len = table.len();
        let mut channels = BTreeMap::new();
        for binding in resolution.bound() {
            if let Some(col) = binding.column.as_deref().and_then(|name| table.column(name)) {
                channels.insert(binding.channel, padded(&col.values, len));
            }
        }

        let mut frame = Self {
            len,
            sample_period_secs: table.sample_period().unwrap_or(fallback_period_secs),
            channels,
            derived: BTreeMap::new(),
            degenerate: BTreeMap::new(),
        };
        frame.derive_all(scatter_window);
        frame
    }

    fn derive_all(&mut self, scatter_window: usize) {
        use ChannelId::*;
        use DerivedChannel as D;

        self.derive_binary(D::InjectorDuty, InjectionTime, Rpm, |ti, rpm| ti * rpm / 1200.0);
        self.derive_binary(D::VolumetricEfficiency, AirMass, Rpm, |air, rpm| {
            air * 100.0 / (rpm * 0.16 + 1.0)
        });
        self.derive_binary(D::LambdaBankDelta, Lambda1, Lambda2, |a, b| (a - b).abs());
        self.derive_binary(D::ThermalStress, CoolantTemp, OilTemp, |c, o| c + o * 0.5);
        self.derive_joint(D::FanEfficiency, &[FanSpeed, CoolantTemp, RadiatorOutletTemp], |v| {
            v[0] * (v[1] - v[2]) / 100.0
        });
        self.derive_reduce(D::LambdaAvg, &[Lambda1, Lambda2], |vals| {
            vals.iter().sum::<f64>() / vals.len() as f64
        });
        self.derive_reduce(D::KnockPeak, &[Knock1, Knock2], |vals| {
            vals.iter().copied().fold(f64::NEG_INFINITY, f64::max)
        });

        if let Some(ign) = self.channels.get(&IgnitionAngle) {
            let scatter = stats::rolling_std(ign, scatter_window);
            self.derived.insert(D::IgnitionScatter, scatter);
        }
        if let Some(batt) = self.channels.get(&BatteryVoltage) {
            let peak = stats::max(&stats::finite(batt));
            let sag = batt
                .iter()
                .map(|v| match (v, peak) {
                    (Some(x), Some(p)) => Some(p - x),
                    _ => None,
                })
                .collect();
            self.derived.insert(D::VoltageSag, sag);
            let stability = stats::rolling_std(batt, VOLTAGE_STABILITY_WINDOW);
            self.derived.insert(D::VoltageStability, stability);
        }
        if let Some(tps) = self.channels.get(&Throttle) {
            self.derived.insert(D::ThrottleRate, stats::diff(tps));
        }
        if let Some(load) = self.channels.get(&Load) {
            self.derived.insert(D::LoadRate, stats::diff(load));
        }

        for (d, n) in &self.degenerate {
            if *n > 0 {
                log(
                    Level::Warn,
                    Domain::Channels,
                    "degenerate_samples",
                    obj(&[("derived", v_str(d.as_str())), ("excluded", v_num(*n as f64))]),
                );
            }
        }
    }

    fn derive_binary(
        &mut self,
        out: DerivedChannel,
        a: ChannelId,
        b: ChannelId,
        f: impl Fn(f64, f64) -> f64,
    ) {
        self.derive_joint(out, &[a, b], |v| f(v[0], v[1]));
    }

    /// Every input must be bound; samples missing any input stay missing.
    /// `f` receives the inputs in declared order.
    fn derive_joint(&mut self, out: DerivedChannel, inputs: &[ChannelId], f: impl Fn(&[f64]) -> f64) {
        let Some(series_in) = inputs
            .iter()
            .map(|c| self.channels.get(c))
            .collect::<Option<Vec<&Vec<Option<f64>>>>>()
        else {
            return;
        };
        let mut dropped = 0usize;
        let mut row = Vec::with_capacity(inputs.len());
        let series = (0..self.len)
            .map(|i| {
                row.clear();
                for s in &series_in {
                    row.push(s[i]?);
                }
                let r = f(row.as_slice());
                if r.is_finite() {
                    Some(r)
                } else {
                    dropped += 1;
                    None
                }
            })
            .collect();
        self.derived.insert(out, series);
        self.degenerate.insert(out, dropped);
    }

    /// At least one input must be bound; each sample reduces whichever inputs
    /// are present at that index.
    fn derive_reduce(&mut self, out: DerivedChannel, inputs: &[ChannelId], f: impl Fn(&[f64]) -> f64) {
        let bound: Vec<&Vec<Option<f64>>> = inputs.iter().filter_map(|c| self.channels.get(c)).collect();
        if bound.is_empty() {
            return;
        }
        let series = (0..self.len)
            .map(|i| {
                let present: Vec<f64> = bound.iter().filter_map(|s| s[i]).collect();
                if present.is_empty() {
                    None
                } else {
                    Some(f(&present)).filter(|v| v.is_finite())
                }
            })
            .collect();
        self.derived.insert(out, series);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn sample_period_secs(&self) -> f64 {
        self.sample_period_secs
    }

    pub fn duration_secs(&self) -> f64 {
        self.len as f64 * self.sample_period_secs
    }

    pub fn channel(&self, id: ChannelId) -> Option<&[Option<f64>]> {
        self.channels.get(&id).map(|v| v.as_slice())
    }

    pub fn derived(&self, id: DerivedChannel) -> Option<&[Option<f64>]> {
        self.derived.get(&id).map(|v| v.as_slice())
    }

    pub fn series(&self, signal: Signal) -> Option<&[Option<f64>]> {
        match signal {
            Signal::Channel(c) => self.channel(c),
            Signal::Derived(d) => self.derived(d),
        }
    }

    pub fn has(&self, id: ChannelId) -> bool {
        self.channels.contains_key(&id)
    }

    /// Bound source channels in canonical order.
    pub fn channels(&self) -> impl Iterator<Item = (ChannelId, &[Option<f64>])> {
        self.channels.iter().map(|(k, v)| (*k, v.as_slice()))
    }

    pub fn degenerate_count(&self, id: DerivedChannel) -> usize {
        self.degenerate.get(&id).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::resolve;
    use crate::data::Column;

    fn frame_of(columns: Vec<Column>) -> CanonicalFrame {
        let table = Table::from_columns(columns);
        let res = resolve(&table);
        CanonicalFrame::build(&table, &res, 1.0, 10)
    }

    #[test]
    fn test_injector_duty_formula() {
        let f = frame_of(vec![
            Column::dense("Injection time", &[10.0, 5.0]),
            Column::dense("Motor RPM", &[6000.0, 2400.0]),
        ]);
        let duty = f.derived(DerivedChannel::InjectorDuty).unwrap();
        assert_eq!(duty, &[Some(50.0), Some(10.0)]);
    }

    #[test]
    fn test_lambda_avg_single_bank_fallback() {
        let f = frame_of(vec![Column::dense("Lambda 1", &[0.9, 1.1])]);
        assert_eq!(f.derived(DerivedChannel::LambdaAvg).unwrap(), &[Some(0.9), Some(1.1)]);
        assert!(f.derived(DerivedChannel::LambdaBankDelta).is_none());
    }

    #[test]
    fn test_lambda_avg_both_banks() {
        let f = frame_of(vec![
            Column::dense("Lambda 1", &[0.8, 1.0]),
            Column::new("Lambda 2", vec![Some(0.9), None]),
        ]);
        let avg = f.derived(DerivedChannel::LambdaAvg).unwrap();
        assert!((avg[0].unwrap() - 0.85).abs() < 1e-12);
        assert_eq!(avg[1], Some(1.0));
    }

    #[test]
    fn test_knock_peak_is_max() {
        let f = frame_of(vec![
            Column::dense("Knock sensor #1", &[0.5, 1.4]),
            Column::dense("Knock sensor #2", &[0.9, 0.2]),
        ]);
        assert_eq!(f.derived(DerivedChannel::KnockPeak).unwrap(), &[Some(0.9), Some(1.4)]);
    }

    #[test]
    fn test_degenerate_ratio_excluded() {
        // rpm * 0.16 + 1 == 0 at rpm = -6.25
        let f = frame_of(vec![
            Column::dense("Air mass", &[100.0, 100.0]),
            Column::dense("Motor RPM", &[-6.25, 1000.0]),
        ]);
        let ve = f.derived(DerivedChannel::VolumetricEfficiency).unwrap();
        assert_eq!(ve[0], None);
        assert!(ve[1].is_some());
        assert_eq!(f.degenerate_count(DerivedChannel::VolumetricEfficiency), 1);
    }

    #[test]
    fn test_voltage_sag_from_peak() {
        let f = frame_of(vec![Column::dense("Battery voltage", &[14.0, 13.0, 14.2])]);
        let sag = f.derived(DerivedChannel::VoltageSag).unwrap();
        assert!((sag[1].unwrap() - 1.2).abs() < 1e-9);
        assert_eq!(sag[2], Some(0.0));
    }

    #[test]
    fn test_fan_efficiency_needs_all_three_inputs() {
        let f = frame_of(vec![
            Column::dense("Electric fan speed", &[50.0, 100.0]),
            Column::dense("Motor temp.", &[95.0, 100.0]),
            Column::new("Radiator coolant outlet temp.", vec![Some(85.0), None]),
        ]);
        assert_eq!(f.derived(DerivedChannel::FanEfficiency).unwrap(), &[Some(5.0), None]);

        let f = frame_of(vec![
            Column::dense("Electric fan speed", &[50.0, 100.0]),
            Column::dense("Motor temp.", &[95.0, 100.0]),
        ]);
        assert!(f.derived(DerivedChannel::FanEfficiency).is_none());
    }

    #[test]
    fn test_voltage_stability_window() {
        let f = frame_of(vec![Column::dense("Battery voltage", &[14.0, 14.0, 14.0, 14.0, 14.0, 12.0])]);
        let st = f.derived(DerivedChannel::VoltageStability).unwrap();
        assert_eq!(st[..4], [None, None, None, None]);
        assert_eq!(st[4], Some(0.0));
        // 14,14,14,14,12 → mean 13.6, sample variance 0.8
        assert!((st[5].unwrap() - 0.8_f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_missing_inputs_produce_no_derived() {
        let f = frame_of(vec![Column::dense("Motor RPM", &[1000.0, 2000.0])]);
        assert!(f.derived(DerivedChannel::InjectorDuty).is_none());
        assert!(f.derived(DerivedChannel::KnockPeak).is_none());
        assert_eq!(f.len(), 2);
    }
}
