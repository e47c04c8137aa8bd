//! Structured logging for the diagnosis pipeline.
//!
//! Every record is one JSON object per line on stderr, so the report on
//! stdout stays machine-readable. Records carry a run id, a sequence number
//! and a domain for filtering:
//!
//! - `LOG_LEVEL`   minimum level (trace, debug, info, warn, error, fatal)
//! - `LOG_DOMAINS` comma-separated domain list or `all`
//! - `LOG_DIR`     when set, records are also appended to `<dir>/<run_id>/events.jsonl`
//! - `RUN_ID`      overrides the generated run id

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            Ok("fatal") => Level::Fatal,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

// =============================================================================
// Log Domains (categories for filtering)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Ingest,      // File loading, table shape
    Channels,    // Alias resolution, binding quality
    Modes,       // Regime segmentation
    Fuel,        // Fuel analyzer
    Ignition,    // Knock and timing analyzer
    Thermal,     // Oil, coolant, EGT analyzer
    Electrical,  // Supply voltage, sensor health
    Anomaly,     // Outlier detection
    Correlation, // Pairwise relationships
    Risk,        // Score aggregation
    System,      // Startup, pipeline orchestration
    Profile,     // Stage timings
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Ingest => "ingest",
            Domain::Channels => "channels",
            Domain::Modes => "modes",
            Domain::Fuel => "fuel",
            Domain::Ignition => "ignition",
            Domain::Thermal => "thermal",
            Domain::Electrical => "electrical",
            Domain::Anomaly => "anomaly",
            Domain::Correlation => "correlation",
            Domain::Risk => "risk",
            Domain::System => "system",
            Domain::Profile => "profile",
        }
    }

    pub fn is_enabled(&self) -> bool {
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static PROFILE_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    sink: Option<Mutex<BufWriter<File>>>,
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let sink = std::env::var("LOG_DIR").ok().and_then(|base| {
            let mut run_dir = PathBuf::from(base);
            run_dir.push(&run_id);
            if let Err(err) = create_dir_all(&run_dir) {
                eprintln!("[log] failed to create run dir: {}", err);
                return None;
            }
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(run_dir.join("events.jsonl"))
                .map_err(|err| eprintln!("[log] failed to open events log: {}", err))
                .ok()
                .map(|f| Mutex::new(BufWriter::new(f)))
        });
        RunContext { run_id, sink }
    })
}

/// Identifier shared by every record of this process.
pub fn run_id() -> &'static str {
    &ensure_run_context().run_id
}

fn write_line(writer: &Mutex<BufWriter<File>>, line: &str) {
    if let Ok(mut w) = writer.lock() {
        let _ = writeln!(w, "{}", line);
        let _ = w.flush();
    }
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Epoch milliseconds
pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    let min_level = Level::from_env();
    if level < min_level || !domain.is_enabled() {
        return;
    }
    emit_record(level, domain.as_str(), event, fields);
}

fn emit_record(level: Level, component: &str, event: &str, mut fields: Map<String, Value>) {
    let ctx = ensure_run_context();
    let msg = fields.remove("msg").unwrap_or(Value::String(String::new()));

    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(ctx.run_id.clone()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(component));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    entry.insert("data".to_string(), Value::Object(fields));

    let line = Value::Object(entry).to_string();
    if let Some(sink) = &ctx.sink {
        write_line(sink, &line);
    }
    eprintln!("{}", line);
}

// =============================================================================
// Domain-Specific Logging Helpers
// =============================================================================

pub fn log_binding(channel: &str, column: Option<&str>, confidence: f64, flags: &[&str]) {
    log(
        Level::Debug,
        Domain::Channels,
        "binding",
        obj(&[
            ("channel", v_str(channel)),
            ("column", column.map(v_str).unwrap_or(Value::Null)),
            ("confidence", v_num(confidence)),
            ("flags", json!(flags)),
        ]),
    );
}

pub fn log_rule_hit(domain: Domain, status: &str, severity: &str, metrics: &[(&str, f64)]) {
    let level = if severity == "safe" { Level::Debug } else { Level::Info };
    let mut fields = obj(&[("status", v_str(status)), ("severity", v_str(severity))]);
    for (k, v) in metrics {
        fields.insert((*k).to_string(), v_num(*v));
    }
    log(level, domain, "rule_hit", fields);
}

pub fn log_risk(score: f64, level: &str, factors: usize) {
    log(
        Level::Info,
        Domain::Risk,
        "assessment",
        obj(&[
            ("score", v_num(score)),
            ("level", v_str(level)),
            ("factors", json!(factors)),
        ]),
    );
}

// =============================================================================
// Utility Functions
// =============================================================================

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

/// Non-finite numbers become `null` so records stay valid JSON.
pub fn v_num(n: f64) -> Value {
    json!(n)
}

// =============================================================================
// Profiling Scope
// =============================================================================

/// Profiling scope that emits structured timing on drop.
pub struct ProfileScope {
    label: &'static str,
    context: Option<Map<String, Value>>,
    started: Instant,
    enabled: bool,
}

impl ProfileScope {
    pub fn new(label: &'static str) -> Self {
        let enabled = Self::should_sample();
        Self {
            label,
            context: None,
            started: Instant::now(),
            enabled,
        }
    }

    pub fn with_context(label: &'static str, fields: &[(&str, Value)]) -> Self {
        let enabled = Self::should_sample();
        Self {
            label,
            context: if enabled { Some(obj(fields)) } else { None },
            started: Instant::now(),
            enabled,
        }
    }

    fn should_sample() -> bool {
        std::env::var("PROFILE_SAMPLE")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .map(|p| {
                if p >= 1.0 {
                    true
                } else if p <= 0.0 {
                    false
                } else {
                    let seq = PROFILE_SEQ.fetch_add(1, Ordering::SeqCst);
                    let bucket = (seq % 10_000) as f64 / 10_000.0;
                    bucket < p
                }
            })
            .unwrap_or(true)
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        if !self.enabled {
            return;
        }
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let mut fields = self.context.take().unwrap_or_default();
        fields.insert("label".to_string(), v_str(self.label));
        fields.insert("elapsed_ms".to_string(), v_num(elapsed_ms));
        log(Level::Trace, Domain::Profile, "profile", fields);
    }
}

// =============================================================================
// Tests
// =============================================================================
