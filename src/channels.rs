//! Channel resolution: arbitrary log column names → canonical channels.
//!
//! The alias table is the contract with the ingestion side. For each channel
//! the aliases are tried in declared order and the first one present in the
//! table wins, regardless of where that column sits in the file. Matching
//! ignores surrounding whitespace and ASCII case.

use serde::{Deserialize, Serialize};

use crate::data::Table;
use crate::logging::{log, log_binding, obj, v_str, Domain, Level};
use crate::stats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelId {
    Rpm,
    Load,
    Throttle,
    InjectionTime,
    AirMass,
    Lambda1,
    Lambda2,
    Knock1,
    Knock2,
    IgnitionAngle,
    CoolantTemp,
    OilTemp,
    RadiatorOutletTemp,
    IntakeTemp,
    Egt,
    BatteryVoltage,
    Speed,
    FanSpeed,
}

impl ChannelId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelId::Rpm => "rpm",
            ChannelId::Load => "load",
            ChannelId::Throttle => "throttle",
            ChannelId::InjectionTime => "injection_time",
            ChannelId::AirMass => "air_mass",
            ChannelId::Lambda1 => "lambda1",
            ChannelId::Lambda2 => "lambda2",
            ChannelId::Knock1 => "knock1",
            ChannelId::Knock2 => "knock2",
            ChannelId::IgnitionAngle => "ignition_angle",
            ChannelId::CoolantTemp => "coolant_temp",
            ChannelId::OilTemp => "oil_temp",
            ChannelId::RadiatorOutletTemp => "radiator_outlet_temp",
            ChannelId::IntakeTemp => "intake_temp",
            ChannelId::Egt => "egt",
            ChannelId::BatteryVoltage => "battery_voltage",
            ChannelId::Speed => "speed",
            ChannelId::FanSpeed => "fan_speed",
        }
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One canonical channel and its accepted column names, highest priority first.
#[derive(Debug, Clone, Copy)]
pub struct AliasEntry {
    pub channel: ChannelId,
    pub aliases: &'static [&'static str],
}

/// Declared priority list. The order of entries is also the report order.
pub const ALIAS_TABLE: &[AliasEntry] = &[
    AliasEntry { channel: ChannelId::Rpm, aliases: &["Motor RPM", "Engine RPM", "RPM", "Engine Speed", "nmot"] },
    AliasEntry { channel: ChannelId::Load, aliases: &["Engine load", "Load", "Engine Load (%)", "rl"] },
    AliasEntry { channel: ChannelId::Throttle, aliases: &["Throttle pos.", "Throttle Position", "TPS", "Throttle", "wdkba"] },
    AliasEntry { channel: ChannelId::InjectionTime, aliases: &["Injection time", "Injector PW", "IPW", "Injection Time (ms)", "ti"] },
    AliasEntry { channel: ChannelId::AirMass, aliases: &["Air mass", "MAF", "Air Mass Flow", "ml"] },
    AliasEntry { channel: ChannelId::Lambda1, aliases: &["Lambda #1 integrator", "Lambda 1", "Lambda", "lambda1"] },
    AliasEntry { channel: ChannelId::Lambda2, aliases: &["Lambda #2 integrator", "Lambda 2", "lambda2"] },
    AliasEntry { channel: ChannelId::Knock1, aliases: &["Knock sensor #1", "Knock 1", "Knock", "knock1"] },
    AliasEntry { channel: ChannelId::Knock2, aliases: &["Knock sensor #2", "Knock 2", "knock2"] },
    AliasEntry { channel: ChannelId::IgnitionAngle, aliases: &["Ignition angle", "Ignition Timing", "Timing", "zwout"] },
    AliasEntry { channel: ChannelId::CoolantTemp, aliases: &["Motor temp.", "Coolant temp.", "Coolant Temp", "ECT", "tmot"] },
    AliasEntry { channel: ChannelId::OilTemp, aliases: &["Oil temp.", "Oil Temp", "Oil Temperature", "toel"] },
    AliasEntry { channel: ChannelId::RadiatorOutletTemp, aliases: &["Radiator coolant outlet temp.", "Radiator Outlet Temp"] },
    AliasEntry { channel: ChannelId::IntakeTemp, aliases: &["Intake temp.", "IAT", "Intake Air Temp", "tans"] },
    AliasEntry { channel: ChannelId::Egt, aliases: &["EGT", "Exhaust temp.", "Exhaust Gas Temp", "EGT 1"] },
    AliasEntry { channel: ChannelId::BatteryVoltage, aliases: &["Battery voltage", "Battery", "Voltage", "ub"] },
    AliasEntry { channel: ChannelId::Speed, aliases: &["Speed", "Vehicle Speed", "vfzg"] },
    AliasEntry { channel: ChannelId::FanSpeed, aliases: &["Electric fan speed", "Fan Speed"] },
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingFlags {
    pub flatline: bool,
    pub dropout: bool,
    pub constant: bool,
}

impl BindingFlags {
    pub fn any(&self) -> bool {
        self.flatline || self.dropout || self.constant
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.flatline {
            out.push("flatline");
        }
        if self.dropout {
            out.push("dropout");
        }
        if self.constant {
            out.push("constant");
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelBinding {
    pub channel: ChannelId,
    /// Source column exactly as written in the file.
    pub column: Option<String>,
    /// 0..=100; 0 for unbound and constant channels.
    pub confidence: f64,
    pub null_pct: f64,
    pub flatline_pct: f64,
    pub flags: BindingFlags,
}

impl ChannelBinding {
    fn unbound(channel: ChannelId) -> Self {
        Self {
            channel,
            column: None,
            confidence: 0.0,
            null_pct: 100.0,
            flatline_pct: 0.0,
            flags: BindingFlags::default(),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.column.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// One entry per alias-table channel, in declaration order.
    pub bindings: Vec<ChannelBinding>,
    pub coverage_pct: f64,
    pub missing: Vec<ChannelId>,
    /// Bound channels carrying any quality flag.
    pub noisy: Vec<ChannelId>,
}

impl Resolution {
    pub fn binding(&self, channel: ChannelId) -> Option<&ChannelBinding> {
        self.bindings.iter().find(|b| b.channel == channel)
    }

    pub fn is_bound(&self, channel: ChannelId) -> bool {
        self.binding(channel).map(|b| b.is_bound()).unwrap_or(false)
    }

    pub fn confidence(&self, channel: ChannelId) -> f64 {
        self.binding(channel).map(|b| b.confidence).unwrap_or(0.0)
    }

    pub fn bound(&self) -> impl Iterator<Item = &ChannelBinding> {
        self.bindings.iter().filter(|b| b.is_bound())
    }
}

/// Percentage of missing samples above which a binding is flagged `dropout`.
pub const DROPOUT_NULL_PCT: f64 = 10.0;
/// Consecutive-repeat percentage above which a binding is flagged `flatline`.
pub const FLATLINE_PCT: f64 = 50.0;
const FLATLINE_PENALTY: f64 = 40.0;
/// Present samples needed before a zero spread means a constant sensor.
pub const MIN_SPREAD_SAMPLES: usize = 2;

fn log_empty_column(channel: ChannelId, column: &str) {
    log(
        Level::Warn,
        Domain::Channels,
        "empty_column",
        obj(&[("channel", v_str(channel.as_str())), ("column", v_str(column))]),
    );
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

pub struct ChannelResolver {
    table: &'static [AliasEntry],
    dropout_null_pct: f64,
}

impl Default for ChannelResolver {
    fn default() -> Self {
        Self::new(ALIAS_TABLE)
    }
}

impl ChannelResolver {
    pub fn new(table: &'static [AliasEntry]) -> Self {
        Self {
            table,
            dropout_null_pct: DROPOUT_NULL_PCT,
        }
    }

    pub fn with_dropout_threshold(mut self, pct: f64) -> Self {
        self.dropout_null_pct = pct;
        self
    }

    /// Column index matched for `entry`, honouring alias priority.
    fn match_column(entry: &AliasEntry, table: &Table) -> Option<usize> {
        let names: Vec<String> = table.column_names().map(normalize).collect();
        entry.aliases.iter().find_map(|alias| {
            let wanted = normalize(alias);
            names.iter().position(|n| *n == wanted)
        })
    }

    pub fn resolve(&self, table: &Table) -> Resolution {
        let mut bindings = Vec::with_capacity(self.table.len());
        for entry in self.table {
            let binding = match Self::match_column(entry, table) {
                // A column without a single finite sample carries nothing to bind.
                Some(idx) if stats::finite(&table.columns[idx].values).is_empty() => {
                    log_empty_column(entry.channel, &table.columns[idx].name);
                    ChannelBinding::unbound(entry.channel)
                }
                Some(idx) => self.assess(entry.channel, &table.columns[idx].name, &table.columns[idx].values),
                None => ChannelBinding::unbound(entry.channel),
            };
            log_binding(
                binding.channel.as_str(),
                binding.column.as_deref(),
                binding.confidence,
                &binding.flags.names(),
            );
            bindings.push(binding);
        }

        let total = self.table.len();
        let bound = bindings.iter().filter(|b| b.is_bound()).count();
        let coverage_pct = if total == 0 {
            0.0
        } else {
            bound as f64 / total as f64 * 100.0
        };
        let missing = bindings.iter().filter(|b| !b.is_bound()).map(|b| b.channel).collect();
        let noisy = bindings
            .iter()
            .filter(|b| b.is_bound() && b.flags.any())
            .map(|b| b.channel)
            .collect();

        Resolution {
            bindings,
            coverage_pct,
            missing,
            noisy,
        }
    }

    fn assess(&self, channel: ChannelId, column: &str, values: &[Option<f64>]) -> ChannelBinding {
        let null_pct = stats::null_pct(values);
        let present = stats::finite(values);
        let mut flags = BindingFlags {
            dropout: null_pct > self.dropout_null_pct,
            ..Default::default()
        };

        // One sample has no spread to judge.
        let variance_zero = present.len() >= MIN_SPREAD_SAMPLES
            && stats::std_dev(&present).map(|s| s == 0.0).unwrap_or(false);
        let flatline_pct = stats::flatline_pct(&present);
        let confidence = if present.is_empty() {
            0.0
        } else if variance_zero {
            flags.constant = true;
            0.0
        } else {
            let mut c = 100.0 - null_pct;
            if flatline_pct > FLATLINE_PCT {
                flags.flatline = true;
                c -= FLATLINE_PENALTY;
            }
            c.clamp(0.0, 100.0)
        };

        ChannelBinding {
            channel,
            column: Some(column.to_string()),
            confidence,
            null_pct,
            flatline_pct,
            flags,
        }
    }
}

/// Resolve with the built-in alias table.
pub fn resolve(table: &Table) -> Resolution {
    ChannelResolver::default().resolve(table)
}
