use enginescope::analyzers::{Status, Subsystem};
use enginescope::channels::ChannelId;
use enginescope::risk::RiskLevel;
use enginescope::data::{fingerprint, load_csv};
use enginescope::{diagnose, Config, Report};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_export(path: &Path, delimiter: &str, header: &[&str], rows: &[&str]) {
    let mut out = String::new();
    out.push_str(&header.join(delimiter));
    out.push('\n');
    for row in rows {
        out.push_str(row);
        out.push('\n');
    }
    fs::write(path, out).unwrap();
}

#[test]
fn semicolon_export_keeps_header_and_decimal_commas() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ecu.csv");
    write_export(
        &path,
        ";",
        &["time", "Motor RPM", "Lambda #1 integrator ", "Oil temp."],
        &["0,0;850;0,98;88,5", "0,1;900;1,01;88,6", "0,2;;0,99;88,7"],
    );
    let table = load_csv(&path).unwrap();
    assert_eq!(table.len(), 3);
    assert_eq!(table.columns[1].name, "Lambda #1 integrator ");
    assert_eq!(table.columns[0].values[2], None);
    assert_eq!(table.columns[2].values[0], Some(88.5));
    assert!((table.sample_period().unwrap() - 0.1).abs() < 1e-9);
}

#[test]
fn missing_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let err = load_csv(&dir.path().join("nope.csv")).unwrap_err();
    assert!(format!("{:#}", err).contains("nope.csv"));
}

#[test]
fn garbage_cells_become_missing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dirty.csv");
    write_export(
        &path,
        ",",
        &["Time", "Engine RPM", "Battery voltage"],
        &["0,1000,n/a", "1,1100,13.9", "2,oops,14.0"],
    );
    let table = load_csv(&path).unwrap();
    assert_eq!(table.columns[0].values, vec![Some(1000.0), Some(1100.0), None]);
    assert_eq!(table.columns[1].values[0], None);
}

#[test]
fn engine_rpm_alias_resolves_end_to_end() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("alias.csv");
    write_export(
        &path,
        ",",
        &["time", "Engine RPM", "Engine load", "Injection time"],
        &["0.0,2500,40,4.0", "0.5,3000,55,5.0", "1.0,3500,60,6.0"],
    );
    let table = load_csv(&path).unwrap();
    let report = diagnose(&table, &Config::default());

    let rpm = report.bindings.iter().find(|b| b.channel == ChannelId::Rpm).unwrap();
    assert_eq!(rpm.column.as_deref(), Some("Engine RPM"));
    assert!(!report.missing.contains(&ChannelId::Rpm));
    assert_eq!(report.sample_period_secs, 0.5);
    assert_eq!(report.duration_secs, 1.5);
    assert_eq!(report.kpis.get("injector_duty_max"), Some(&17.5));
}

#[test]
fn empty_file_yields_empty_report() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.csv");
    fs::write(&path, "").unwrap();
    let table = load_csv(&path).unwrap();
    assert!(table.is_empty());

    let report = diagnose(&table, &Config::default());
    assert_eq!(report.coverage_pct, 0.0);
    assert_eq!(report.risk.score, 0.0);
}

fn assert_no_data_everywhere(report: &Report) {
    assert_eq!(report.coverage_pct, 0.0);
    assert!(report.bindings.iter().all(|b| b.column.is_none()));
    assert!(report.modes.iter().all(|m| m.samples == 0));
    assert!(report.anomalies.is_empty());
    assert!(report.findings.iter().all(|f| f.status == Status::NoData));
    for subsystem in [Subsystem::Fuel, Subsystem::Ignition, Subsystem::Thermal, Subsystem::Electrical] {
        assert!(report.findings_for(subsystem).next().is_some());
    }
    assert_eq!(report.risk.score, 0.0);
    assert_eq!(report.risk.level, RiskLevel::Low);
}

#[test]
fn header_only_export_has_no_coverage() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("header.csv");
    write_export(&path, ";", &["time", "Motor RPM", "Oil temp.", "Battery voltage"], &[]);
    let table = load_csv(&path).unwrap();
    assert_eq!(table.columns.len(), 3);

    let report = diagnose(&table, &Config::default());
    assert_eq!(report.samples, 0);
    assert!(report.missing.contains(&ChannelId::Rpm));
    assert_no_data_everywhere(&report);
}

#[test]
fn unparseable_rows_have_no_coverage() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("junk.csv");
    write_export(&path, ",", &["Motor RPM", "Oil temp.", "Battery voltage"], &["x,y,z", "a,b,c"]);
    let table = load_csv(&path).unwrap();
    assert_eq!(table.len(), 2);

    let report = diagnose(&table, &Config::default());
    assert!(report.missing.contains(&ChannelId::BatteryVoltage));
    assert!(!report
        .findings
        .iter()
        .any(|f| f.status == Status::SensorDropout));
    assert_no_data_everywhere(&report);
}

#[test]
fn single_row_export_flags_no_flatline() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("one.csv");
    write_export(&path, ",", &["Motor RPM", "Oil temp."], &["2500,95"]);
    let report = diagnose(&load_csv(&path).unwrap(), &Config::default());
    assert!(report.noisy.is_empty());
    assert!(!report.findings.iter().any(|f| f.status == Status::SensorFlatline));
}

#[test]
fn single_column_semicolon_export_keeps_decimals() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rpm.csv");
    write_export(&path, ";", &["Motor RPM"], &["850,5", "900,0"]);
    let table = load_csv(&path).unwrap();
    assert_eq!(table.columns[0].values, vec![Some(850.5), Some(900.0)]);
}

#[test]
fn fingerprint_is_stable_and_content_sensitive() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("a.csv");
    let b = dir.path().join("b.csv");
    write_export(&a, ",", &["Motor RPM"], &["1000", "1100"]);
    write_export(&b, ",", &["Motor RPM"], &["1000", "1101"]);

    let fa = fingerprint(&load_csv(&a).unwrap());
    assert_eq!(fa, fingerprint(&load_csv(&a).unwrap()));
    assert_ne!(fa, fingerprint(&load_csv(&b).unwrap()));
    assert_eq!(fa.len(), 64);
}
