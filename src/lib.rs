//! Engine telemetry diagnosis.
//!
//! Takes an ECU log export with non-standard column names and produces a
//! structured [`pipeline::Report`]: channel bindings and their quality,
//! operating-mode shares, per-subsystem findings, anomalies, correlations and
//! an aggregate risk score.

pub mod analyzers;
pub mod anomaly;
pub mod channels;
pub mod config;
pub mod correlation;
pub mod data;
pub mod frame;
pub mod logging;
pub mod modes;
pub mod pipeline;
pub mod risk;
pub mod stats;

pub use config::{Config, Thresholds};
pub use data::{load_csv, Table};
pub use pipeline::{diagnose, Report};
