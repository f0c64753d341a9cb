//! Day-partitioned NDJSON files
//!
//! Layout: `<root>/<YYYY-MM-DD>/<name>.ndjson`, where the day is the UTC day of
//! the record's own timestamp rather than the wall clock.

use crate::error::SinkError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Appends serialized records to per-day files under a root directory
#[derive(Debug, Clone)]
pub struct DailyNdjson {
    root: PathBuf,
}

impl DailyNdjson {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file `name` for the day containing `ts`
    pub fn path_for(&self, ts: f64, name: &str) -> PathBuf {
        self.root
            .join(day_for_ts(ts))
            .join(format!("{}.ndjson", sanitize_file_name(name)))
    }

    /// Append `record` as one JSON line, creating the day directory on demand
    pub async fn append<T: Serialize>(
        &self,
        ts: f64,
        name: &str,
        record: &T,
    ) -> Result<PathBuf, SinkError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let path = self.path_for(ts, name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        // One write per line so concurrent appenders never interleave mid-record
        file.write_all(&line).await?;
        file.flush().await?;

        Ok(path)
    }
}

/// UTC calendar day (`YYYY-MM-DD`) of an epoch-seconds timestamp
///
/// Timestamps outside chrono's range fall back to the epoch day.
pub fn day_for_ts(ts: f64) -> String {
    let secs = ts.floor();
    let nanos = ((ts - secs) * 1e9) as u32;
    DateTime::<Utc>::from_timestamp(secs as i64, nanos.min(999_999_999))
        .unwrap_or_default()
        .format("%Y-%m-%d")
        .to_string()
}

/// Make a device id safe to use as a single path component
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    match cleaned.trim_matches('.') {
        "" => "_".to_string(),
        trimmed => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_day_for_ts() {
        assert_eq!(day_for_ts(0.0), "1970-01-01");
        assert_eq!(day_for_ts(1_700_000_000.5), "2023-11-14");
        assert_eq!(day_for_ts(86_399.999), "1970-01-01");
        assert_eq!(day_for_ts(f64::NAN), "1970-01-01");
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("scope1"), "scope1");
        assert_eq!(sanitize_file_name("../etc/passwd"), "_etc_passwd");
        assert_eq!(sanitize_file_name("bench 2/psu"), "bench_2_psu");
        assert_eq!(sanitize_file_name(".."), "_");
    }

    #[tokio::test]
    async fn test_append_creates_day_directory() {
        let dir = TempDir::new().unwrap();
        let sink = DailyNdjson::new(dir.path());

        let first = sink.append(1_700_000_000.0, "alerts", &json!({"n": 1})).await.unwrap();
        let second = sink.append(1_700_000_100.0, "alerts", &json!({"n": 2})).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, dir.path().join("2023-11-14").join("alerts.ndjson"));

        let content = std::fs::read_to_string(&first).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines, vec![r#"{"n":1}"#, r#"{"n":2}"#]);
    }

    #[tokio::test]
    async fn test_next_day_goes_to_new_file() {
        let dir = TempDir::new().unwrap();
        let sink = DailyNdjson::new(dir.path());

        let a = sink.append(86_399.0, "alerts", &json!({})).await.unwrap();
        let b = sink.append(86_400.0, "alerts", &json!({})).await.unwrap();
        assert_ne!(a, b);
        assert!(b.ends_with("1970-01-02/alerts.ndjson"));
    }
}
