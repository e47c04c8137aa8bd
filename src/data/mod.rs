//! Recording ingestion.
//!
//! Loads an ECU log export into an immutable [`Table`]. Column names are kept
//! exactly as written in the header; cells that do not parse as numbers become
//! missing values instead of errors.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// Header names recognised as the time/index column (case-insensitive).
pub const TIME_COLUMNS: [&str; 5] = ["time", "timestamp", "ts", "t", "time (s)"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Column with every sample present.
    pub fn dense(name: impl Into<String>, values: &[f64]) -> Self {
        Self::new(name, values.iter().map(|v| Some(*v)).collect())
    }
}

/// Rectangular numeric table: one optional time column plus named channels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub time: Option<Vec<Option<f64>>>,
    pub columns: Vec<Column>,
}

impl Table {
    pub fn new(time: Option<Vec<Option<f64>>>, columns: Vec<Column>) -> Self {
        Self { time, columns }
    }

    pub fn from_columns(columns: Vec<Column>) -> Self {
        Self::new(None, columns)
    }

    /// Number of samples (rows).
    pub fn len(&self) -> usize {
        self.columns
            .iter()
            .map(|c| c.values.len())
            .chain(self.time.iter().map(|t| t.len()))
            .max()
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Exact-name lookup.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Median spacing of the time column, if it has at least two increasing samples.
    pub fn sample_period(&self) -> Option<f64> {
        let time = self.time.as_ref()?;
        let stamps: Vec<f64> = time.iter().flatten().copied().collect();
        let mut deltas: Vec<f64> = stamps
            .windows(2)
            .map(|w| w[1] - w[0])
            .filter(|d| d.is_finite() && *d > 0.0)
            .collect();
        if deltas.is_empty() {
            return None;
        }
        deltas.sort_by(|a, b| a.total_cmp(b));
        Some(deltas[deltas.len() / 2])
    }
}

/// Pick `;` when the header has more semicolons than commas.
///
/// A header with neither is a single-column export: rows are not split, and
/// a comma inside a cell is read as a decimal comma.
pub fn sniff_delimiter(header: &str) -> char {
    let semis = header.matches(';').count();
    let commas = header.matches(',').count();
    if semis > commas || (semis == 0 && commas == 0) {
        ';'
    } else {
        ','
    }
}

fn parse_cell(raw: &str, delimiter: char) -> Option<f64> {
    let trimmed = raw.trim().trim_matches('"');
    if trimmed.is_empty() {
        return None;
    }
    let parsed = if delimiter == ';' && trimmed.contains(',') {
        trimmed.replace(',', ".").parse::<f64>().ok()
    } else {
        trimmed.parse::<f64>().ok()
    };
    parsed.filter(|v| v.is_finite())
}

fn is_time_header(name: &str) -> bool {
    let lower = name.trim().to_lowercase();
    TIME_COLUMNS.iter().any(|t| *t == lower)
}

/// Parse delimited text. The first non-blank, non-comment line is the header.
pub fn parse_table(content: &str) -> Table {
    let mut lines = content
        .lines()
        .filter(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#'));

    let header_line = match lines.next() {
        Some(h) => h.trim_start_matches('\u{feff}'),
        None => return Table::default(),
    };
    let delimiter = sniff_delimiter(header_line);
    let header: Vec<String> = header_line
        .split(delimiter)
        .map(|s| s.trim_matches('"').to_string())
        .collect();
    let time_idx = header.iter().position(|h| is_time_header(h));

    let mut cells: Vec<Vec<Option<f64>>> = vec![Vec::new(); header.len()];
    for line in lines {
        let parts: Vec<&str> = line.split(delimiter).collect();
        for (i, slot) in cells.iter_mut().enumerate() {
            slot.push(parts.get(i).and_then(|raw| parse_cell(raw, delimiter)));
        }
    }

    let mut time = None;
    let mut columns = Vec::with_capacity(header.len());
    for (i, (name, values)) in header.into_iter().zip(cells).enumerate() {
        if Some(i) == time_idx {
            time = Some(values);
        } else if !name.trim().is_empty() {
            columns.push(Column::new(name, values));
        }
    }
    Table::new(time, columns)
}

/// Load a CSV/semicolon export from disk.
pub fn load_csv(path: &Path) -> Result<Table> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let content = String::from_utf8_lossy(&bytes);
    Ok(parse_table(&content))
}

/// SHA-256 over column names and cell bit patterns, stable across runs.
pub fn fingerprint(table: &Table) -> String {
    let mut hasher = Sha256::new();
    let mut feed = |name: &str, values: &[Option<f64>]| {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        for v in values {
            match v {
                Some(x) => hasher.update(x.to_bits().to_le_bytes()),
                None => hasher.update([0xffu8; 8]),
            }
        }
    };
    if let Some(time) = &table.time {
        feed("\u{0}time", time);
    }
    for c in &table.columns {
        feed(&c.name, &c.values);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semicolon_export_with_decimal_commas() {
        let csv = "time;Motor RPM;Lambda #1 integrator \n0,0;850;0,98\n0,1;900;1,01\n";
        let table = parse_table(csv);
        assert_eq!(table.len(), 2);
        assert_eq!(table.columns.len(), 2);
        assert_eq!(table.columns[1].name, "Lambda #1 integrator ");
        assert_eq!(table.columns[1].values, vec![Some(0.98), Some(1.01)]);
        assert_eq!(table.time.as_ref().unwrap()[1], Some(0.1));
    }

    #[test]
    fn test_single_column_keeps_decimal_commas() {
        let table = parse_table("Motor RPM\n850,5\n900\n");
        assert_eq!(table.columns.len(), 1);
        assert_eq!(table.columns[0].values, vec![Some(850.5), Some(900.0)]);
    }

    #[test]
    fn test_sniff_delimiter() {
        assert_eq!(sniff_delimiter("time;rpm;load"), ';');
        assert_eq!(sniff_delimiter("time,rpm,load"), ',');
        assert_eq!(sniff_delimiter("rpm"), ';');
    }

    #[test]
    fn test_blank_and_garbage_cells_are_missing() {
        let table = parse_table("ts,rpm,load\n1,1000,\n2,abc,40\n3\n");
        let rpm = table.column("rpm").unwrap();
        assert_eq!(rpm.values, vec![Some(1000.0), None, None]);
        let load = table.column("load").unwrap();
        assert_eq!(load.values, vec![None, Some(40.0), None]);
    }

    #[test]
    fn test_empty_input_gives_empty_table() {
        let table = parse_table("");
        assert!(table.is_empty());
        assert!(table.columns.is_empty());
    }

    #[test]
    fn test_sample_period_is_median_spacing() {
        let table = parse_table("time,rpm\n0,1\n0.5,1\n1.0,1\n5.0,1\n");
        assert_eq!(table.sample_period(), Some(0.5));
    }

    #[test]
    fn test_fingerprint_stable_and_sensitive() {
        let a = parse_table("rpm,load\n1000,20\n2000,30\n");
        let b = parse_table("rpm,load\n1000,20\n2000,30\n");
        let c = parse_table("rpm,load\n1000,20\n2000,31\n");
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert_ne!(fingerprint(&a), fingerprint(&c));
        assert_eq!(fingerprint(&a).len(), 64);
    }
}
