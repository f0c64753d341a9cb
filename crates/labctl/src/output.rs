//! Output formatting utilities

use analyzer_lib::{Alert, AlertKind};
use clap::ValueEnum;
use colored::Colorize;
use std::collections::BTreeMap;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Row for the alerts table
#[derive(Tabled)]
struct AlertRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Type")]
    alert_type: String,
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Details")]
    details: String,
}

/// Row for count summaries
#[derive(Tabled)]
struct CountRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Count")]
    count: usize,
}

/// Print alerts as a table or a JSON array
pub fn print_alerts(alerts: &[Alert], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(alerts)?);
        }
        OutputFormat::Table => {
            if alerts.is_empty() {
                println!("{}", "No alerts found".yellow());
                return Ok(());
            }
            let rows: Vec<AlertRow> = alerts
                .iter()
                .map(|alert| AlertRow {
                    time: format_timestamp(alert.ts),
                    alert_type: color_alert_type(alert.alert_type()),
                    device: alert.device.clone().unwrap_or_else(|| "-".to_string()),
                    details: describe(&alert.kind),
                })
                .collect();
            println!("{}", Table::new(rows).with(Style::rounded()));
        }
    }
    Ok(())
}

/// Print a titled count table (or a JSON object)
pub fn print_counts(
    title: &str,
    counts: &BTreeMap<String, usize>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(counts)?);
        }
        OutputFormat::Table => {
            println!("{}", title.bold());
            let rows: Vec<CountRow> = counts
                .iter()
                .map(|(key, count)| CountRow {
                    key: key.clone(),
                    count: *count,
                })
                .collect();
            println!("{}", Table::new(rows).with(Style::rounded()));
        }
    }
    Ok(())
}

/// Print a warning message
pub fn print_warning(message: &str) {
    eprintln!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// One-line summary of an alert body
pub fn describe(kind: &AlertKind) -> String {
    match kind {
        AlertKind::StatisticalAnomaly {
            metric,
            value,
            mean,
            z,
            ..
        } => format!("{metric}={value:.4} (mean {mean:.4}, z {z:.2})"),
        AlertKind::Drift { metric, slope, ema } => {
            format!("{metric} slope {slope:+.5}/sample (ema {ema:.4})")
        }
        AlertKind::AiAnomaly { score, message } => format!("{message} (score {score:.3})"),
        AlertKind::MaintenanceRecommendation {
            health_score,
            recommendations,
        } => format!(
            "health {health_score:.2}: {}",
            recommendations.join(" ")
        ),
        AlertKind::CorrelationDiscovery { correlations } => correlations
            .iter()
            .map(|c| {
                format!(
                    "{}.{} ~ {}.{} r={:+.2}",
                    c.device1, c.metric1, c.device2, c.metric2, c.correlation
                )
            })
            .collect::<Vec<_>>()
            .join(", "),
    }
}

/// Format epoch seconds for display (UTC)
pub fn format_timestamp(ts: f64) -> String {
    let millis = (ts * 1000.0).round() as i64;
    match chrono::DateTime::from_timestamp_millis(millis) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        None => ts.to_string(),
    }
}

/// Color alert type by severity
pub fn color_alert_type(alert_type: &str) -> String {
    match alert_type {
        "statistical_anomaly" | "ai_anomaly" => alert_type.red().to_string(),
        "drift" | "maintenance_recommendation" => alert_type.yellow().to_string(),
        "correlation_discovery" => alert_type.blue().to_string(),
        _ => alert_type.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(1_700_000_021.25), "2023-11-14 22:13:41.250");
    }

    #[test]
    fn test_describe_drift() {
        let kind = AlertKind::Drift {
            metric: "voltage".to_string(),
            slope: 0.0031,
            ema: 3.4,
        };
        assert_eq!(describe(&kind), "voltage slope +0.00310/sample (ema 3.4000)");
    }
}
