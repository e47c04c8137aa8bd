use anyhow::{bail, Context, Result};
use std::path::PathBuf;

use enginescope::logging::{log, obj, run_id, v_num, v_str, Domain, Level};
use enginescope::{diagnose, load_csv, Config};

fn usage() -> &'static str {
    "usage: enginescope <log.csv> [--compact]"
}

fn main() -> Result<()> {
    let mut path: Option<PathBuf> = None;
    let mut compact = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--compact" => compact = true,
            "-h" | "--help" => {
                println!("{}", usage());
                return Ok(());
            }
            a if a.starts_with('-') => bail!("unknown flag {}\n{}", a, usage()),
            a => path = Some(PathBuf::from(a)),
        }
    }
    let Some(path) = path else {
        bail!("{}", usage());
    };

    let cfg = Config::from_env();
    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("run_id", v_str(run_id())),
            ("input", v_str(&path.display().to_string())),
            ("parallel", serde_json::Value::Bool(cfg.parallel)),
        ]),
    );

    let table = load_csv(&path)?;
    log(
        Level::Info,
        Domain::Ingest,
        "loaded",
        obj(&[
            ("rows", v_num(table.len() as f64)),
            ("columns", v_num(table.columns.len() as f64)),
            ("has_time", serde_json::Value::Bool(table.time.is_some())),
        ]),
    );

    let report = diagnose(&table, &cfg);
    let out = if compact {
        serde_json::to_string(&report)
    } else {
        serde_json::to_string_pretty(&report)
    }
    .context("serializing report")?;
    println!("{}", out);

    log(
        Level::Info,
        Domain::System,
        "done",
        obj(&[
            ("risk_score", v_num(report.risk.score)),
            ("risk_level", v_str(report.risk.level.as_str())),
            ("findings", v_num(report.findings.len() as f64)),
        ]),
    );
    Ok(())
}
