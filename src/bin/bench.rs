//! Profiling binary: times the diagnosis pipeline sequentially and with
//! fork/join over a synthetic recording.
//!
//! Usage: `bench [samples]` (default 50000). Prints a JSON summary on stdout.

use std::fs;
use std::time::Instant;

use enginescope::data::{Column, Table};
use enginescope::{diagnose, Config, Report};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

const SEED: u64 = 0x5eed_e7c0;
const ROUNDS: usize = 5;

#[derive(Debug, Serialize)]
struct ModeTiming {
    parallel: bool,
    rounds: usize,
    best_ms: f64,
    mean_ms: f64,
    throughput_samples_per_sec: f64,
}

#[derive(Debug, Serialize)]
struct BenchReport {
    timestamp: String,
    samples: usize,
    columns: usize,
    fingerprint: String,
    risk_score: f64,
    findings: usize,
    anomalies: usize,
    sequential: ModeTiming,
    fork_join: ModeTiming,
    speedup: f64,
    peak_rss_kb: Option<u64>,
    system_info: String,
}

/// Read peak RSS from /proc/self/status (Linux only).
fn peak_rss_kb() -> Option<u64> {
    let status = fs::read_to_string("/proc/self/status").ok()?;
    status
        .lines()
        .find(|l| l.starts_with("VmHWM:"))
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|v| v.parse().ok())
}

/// A pull from idle to redline and back, repeated, with sensor noise and the
/// occasional dropped cell.
fn synth_table(samples: usize) -> Table {
    let mut rng = StdRng::seed_from_u64(SEED);
    let mut rpm = Vec::with_capacity(samples);
    let mut load = Vec::with_capacity(samples);
    let mut throttle = Vec::with_capacity(samples);
    let mut inj = Vec::with_capacity(samples);
    let mut air = Vec::with_capacity(samples);
    let mut lambda1 = Vec::with_capacity(samples);
    let mut lambda2 = Vec::with_capacity(samples);
    let mut knock1 = Vec::with_capacity(samples);
    let mut knock2 = Vec::with_capacity(samples);
    let mut ign = Vec::with_capacity(samples);
    let mut coolant = Vec::with_capacity(samples);
    let mut oil = Vec::with_capacity(samples);
    let mut batt = Vec::with_capacity(samples);
    let mut speed = Vec::with_capacity(samples);

    let mut oil_t = 80.0_f64;
    for i in 0..samples {
        let phase = (i % 600) as f64 / 600.0;
        let pull = (phase * std::f64::consts::PI).sin();
        let r = 900.0 + pull * 5800.0 + rng.gen_range(-40.0..40.0);
        let l = 12.0 + pull * 85.0 + rng.gen_range(-2.0..2.0);
        oil_t += (pull - 0.4) * 0.02;
        oil_t = oil_t.clamp(75.0, 130.0);

        let gap = |rng: &mut StdRng, v: f64| if rng.gen_bool(0.002) { None } else { Some(v) };
        rpm.push(gap(&mut rng, r));
        load.push(gap(&mut rng, l));
        throttle.push(Some((pull * 100.0).clamp(0.0, 100.0)));
        inj.push(Some(1.5 + pull * 13.0 + rng.gen_range(-0.1..0.1)));
        air.push(Some(8.0 + pull * 900.0 + rng.gen_range(-5.0..5.0)));
        lambda1.push(Some(1.0 - pull * 0.17 + rng.gen_range(-0.01..0.01)));
        lambda2.push(Some(1.0 - pull * 0.16 + rng.gen_range(-0.01..0.01)));
        knock1.push(Some(rng.gen_range(0.0..0.6) + if rng.gen_bool(0.001) { 1.0 } else { 0.0 }));
        knock2.push(Some(rng.gen_range(0.0..0.6)));
        ign.push(Some(32.0 - pull * 22.0 + rng.gen_range(-1.0..1.0)));
        coolant.push(Some(88.0 + pull * 6.0 + rng.gen_range(-0.5..0.5)));
        oil.push(Some(oil_t));
        batt.push(Some(14.1 - pull * 0.4 + rng.gen_range(-0.05..0.05)));
        speed.push(Some(pull * 210.0));
    }

    let time = (0..samples).map(|i| Some(i as f64 * 0.1)).collect();
    Table::new(
        Some(time),
        vec![
            Column::new("Motor RPM", rpm),
            Column::new("Engine load", load),
            Column::new("Throttle pos.", throttle),
            Column::new("Injection time", inj),
            Column::new("Air mass", air),
            Column::new("Lambda #1 integrator ", lambda1),
            Column::new("Lambda #2 integrator", lambda2),
            Column::new("Knock sensor #1", knock1),
            Column::new("Knock sensor #2", knock2),
            Column::new("Ignition angle", ign),
            Column::new("Motor temp.", coolant),
            Column::new("Oil temp.", oil),
            Column::new("Battery voltage", batt),
            Column::new("Speed", speed),
        ],
    )
}

fn time_mode(table: &Table, parallel: bool) -> (ModeTiming, Report) {
    let cfg = Config {
        parallel,
        ..Config::default()
    };
    let mut elapsed = Vec::with_capacity(ROUNDS);
    let mut last = None;
    for _ in 0..ROUNDS {
        let start = Instant::now();
        last = Some(diagnose(table, &cfg));
        elapsed.push(start.elapsed().as_secs_f64() * 1000.0);
    }
    let best_ms = elapsed.iter().copied().fold(f64::INFINITY, f64::min);
    let mean_ms = elapsed.iter().sum::<f64>() / elapsed.len() as f64;
    let timing = ModeTiming {
        parallel,
        rounds: ROUNDS,
        best_ms,
        mean_ms,
        throughput_samples_per_sec: if best_ms > 0.0 {
            table.len() as f64 / (best_ms / 1000.0)
        } else {
            0.0
        },
    };
    let report = last.unwrap_or_else(|| diagnose(table, &cfg));
    (timing, report)
}

fn main() {
    let samples = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(50_000usize);

    eprintln!("=== enginescope bench === samples={}", samples);
    let table = synth_table(samples);

    let (sequential, report) = time_mode(&table, false);
    let (fork_join, par_report) = time_mode(&table, true);
    if report != par_report {
        eprintln!("WARNING: sequential and fork/join reports differ");
    }

    let speedup = if fork_join.best_ms > 0.0 {
        sequential.best_ms / fork_join.best_ms
    } else {
        0.0
    };
    let out = BenchReport {
        timestamp: chrono::Utc::now().to_rfc3339(),
        samples: table.len(),
        columns: table.columns.len(),
        fingerprint: report.fingerprint.clone(),
        risk_score: report.risk.score,
        findings: report.findings.len(),
        anomalies: report.anomalies.len(),
        sequential,
        fork_join,
        speedup,
        peak_rss_kb: peak_rss_kb(),
        system_info: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
    };

    match serde_json::to_string_pretty(&out) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("failed to serialize bench report: {}", e),
    }
}
