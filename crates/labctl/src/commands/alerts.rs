//! Inspect a daily alert log

use analyzer_lib::Alert;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;

use crate::output::{print_alerts, print_counts, print_warning, OutputFormat};

/// Alert filter from the command line
#[derive(Debug, Default, Clone)]
pub struct AlertFilter {
    pub alert_type: Option<String>,
    pub device: Option<String>,
}

impl AlertFilter {
    pub fn matches(&self, alert: &Alert) -> bool {
        let type_ok = self
            .alert_type
            .as_deref()
            .map_or(true, |t| alert.alert_type() == t);
        let device_ok = self
            .device
            .as_deref()
            .map_or(true, |d| alert.device.as_deref() == Some(d));
        type_ok && device_ok
    }
}

/// Read an NDJSON alert log, skipping lines that are not alerts
pub fn read_alert_log(path: &Path) -> Result<(Vec<Alert>, usize)> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read alert log {}", path.display()))?;

    let mut alerts = Vec::new();
    let mut skipped = 0;
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Alert>(line) {
            Ok(alert) => alerts.push(alert),
            Err(e) => {
                print_warning(&format!("{}:{}: {}", path.display(), line_no + 1, e));
                skipped += 1;
            }
        }
    }
    Ok((alerts, skipped))
}

/// Count alerts per type and per device
pub fn summarize(alerts: &[Alert]) -> (BTreeMap<String, usize>, BTreeMap<String, usize>) {
    let mut by_type = BTreeMap::new();
    let mut by_device = BTreeMap::new();
    for alert in alerts {
        *by_type.entry(alert.alert_type().to_string()).or_insert(0) += 1;
        let device = alert.device.clone().unwrap_or_else(|| "-".to_string());
        *by_device.entry(device).or_insert(0) += 1;
    }
    (by_type, by_device)
}

/// `labctl alerts`
pub fn run(path: &Path, filter: &AlertFilter, summary: bool, format: OutputFormat) -> Result<()> {
    let (alerts, _) = read_alert_log(path)?;
    let selected: Vec<Alert> = alerts.into_iter().filter(|a| filter.matches(a)).collect();

    if !summary {
        return print_alerts(&selected, format);
    }

    let (by_type, by_device) = summarize(&selected);
    match format {
        OutputFormat::Json => {
            let value = serde_json::json!({ "by_type": by_type, "by_device": by_device });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Table => {
            print_counts("Alerts by type", &by_type, format)?;
            println!();
            print_counts("Alerts by device", &by_device, format)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const LOG: &str = r#"{"ts":21.0,"device":"scope1","type":"statistical_anomaly","metric":"voltage","value":4.0,"mean":3.33,"std":0.15,"z":4.36}
{"ts":40.0,"device":"psu2","type":"drift","metric":"voltage","slope":0.004,"ema":5.2}
{"ts":41.0,"device":"psu2","type":"drift","metric":"voltage","slope":0.0041,"ema":5.21}
this line is garbage
{"ts":100.0,"type":"correlation_discovery","correlations":[]}
"#;

    fn write_log() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(LOG.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_read_skips_invalid_lines() {
        let file = write_log();
        let (alerts, skipped) = read_alert_log(file.path()).unwrap();

        assert_eq!(alerts.len(), 4);
        assert_eq!(skipped, 1);
        assert_eq!(alerts[3].device, None);
    }

    #[test]
    fn test_filter_by_type_and_device() {
        let file = write_log();
        let (alerts, _) = read_alert_log(file.path()).unwrap();

        let drift = AlertFilter {
            alert_type: Some("drift".to_string()),
            device: None,
        };
        assert_eq!(alerts.iter().filter(|a| drift.matches(a)).count(), 2);

        let scope = AlertFilter {
            alert_type: None,
            device: Some("scope1".to_string()),
        };
        let selected: Vec<_> = alerts.iter().filter(|a| scope.matches(a)).collect();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].alert_type(), "statistical_anomaly");
    }

    #[test]
    fn test_summary_counts() {
        let file = write_log();
        let (alerts, _) = read_alert_log(file.path()).unwrap();
        let (by_type, by_device) = summarize(&alerts);

        assert_eq!(by_type.get("drift"), Some(&2));
        assert_eq!(by_type.get("correlation_discovery"), Some(&1));
        assert_eq!(by_device.get("psu2"), Some(&2));
        assert_eq!(by_device.get("-"), Some(&1));
    }
}
