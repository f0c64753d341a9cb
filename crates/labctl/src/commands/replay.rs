//! Replay archived telemetry through the analytics engine

use analyzer_lib::{Alert, Analyzer, EngineConfig, TelemetryRecord};
use anyhow::{Context, Result};
use colored::Colorize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::output::{print_alerts, print_counts, print_info, print_warning, OutputFormat};

/// Outcome of one replay run
#[derive(Debug, Default)]
pub struct ReplayReport {
    pub records: usize,
    pub skipped: usize,
    pub alerts: Vec<Alert>,
}

impl ReplayReport {
    pub fn counts_by_type(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for alert in &self.alerts {
            *counts.entry(alert.alert_type().to_string()).or_insert(0) += 1;
        }
        counts
    }
}

/// Feed every line of `files` (in order) to a fresh analyzer
///
/// The outlier model is fitted inline so results do not depend on timing.
/// Lines that are not valid telemetry are counted and skipped.
pub fn replay_files(files: &[PathBuf], config: EngineConfig) -> Result<ReplayReport> {
    let mut analyzer = Analyzer::new(config.with_inline_fit());
    let mut report = ReplayReport::default();

    for path in files {
        replay_file(path, &mut analyzer, &mut report)?;
    }

    Ok(report)
}

fn replay_file(path: &Path, analyzer: &mut Analyzer, report: &mut ReplayReport) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let record = match TelemetryRecord::from_payload(line.as_bytes(), None) {
            Ok(record) => record,
            Err(e) => {
                print_warning(&format!("{}:{}: {}", path.display(), line_no + 1, e));
                report.skipped += 1;
                continue;
            }
        };

        match analyzer.process(&record) {
            Ok(alerts) => {
                report.records += 1;
                report.alerts.extend(alerts);
            }
            Err(e) => {
                print_warning(&format!("{}:{}: {}", path.display(), line_no + 1, e));
                report.skipped += 1;
            }
        }
    }

    Ok(())
}

/// `labctl replay`
pub fn run(files: &[PathBuf], format: OutputFormat) -> Result<()> {
    let report = replay_files(files, EngineConfig::default())?;

    match format {
        OutputFormat::Json => print_alerts(&report.alerts, format)?,
        OutputFormat::Table => {
            println!("{}", "Replay".bold());
            println!("{}", "=".repeat(60));
            print_info(&format!(
                "{} records analyzed, {} skipped, {} alerts",
                report.records,
                report.skipped,
                report.alerts.len()
            ));
            println!();

            print_alerts(&report.alerts, format)?;
            if !report.alerts.is_empty() {
                println!();
                print_counts("Alerts by type", &report.counts_by_type(), format)?;
            }
        }
    }

    Ok(())
}
