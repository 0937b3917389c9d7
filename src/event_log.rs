// Append-only event log
//
// Every record is one JSON object on its own line. The file is opened,
// appended and closed on each write so external readers (tail -f, log
// shippers) never contend with a held handle. Write failures are logged and
// swallowed: losing a log line must never stop a chaos run.

use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

/// Current wall-clock time as fractional UNIX seconds
pub fn now_ts() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Newline-delimited JSON sink, tagged with the run identifier
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
    run_id: Uuid,
}

impl EventLog {
    /// Create a sink for `path` with a fresh run identifier
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_run_id(path, Uuid::new_v4())
    }

    pub fn with_run_id(path: impl Into<PathBuf>, run_id: Uuid) -> Self {
        Self {
            path: path.into(),
            run_id,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Append one record; object records gain a `run_id` field
    pub fn append<T: Serialize>(&self, record: &T) {
        let mut value = match serde_json::to_value(record) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to serialize log record: {}", e);
                return;
            }
        };
        if let Value::Object(ref mut map) = value {
            map.entry("run_id")
                .or_insert_with(|| Value::String(self.run_id.to_string()));
        }

        if let Err(e) = self.write_line(&value) {
            warn!("Failed to append to {:?}: {}", self.path, e);
        }
    }

    fn write_line(&self, value: &Value) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut line = value.to_string();
        line.push('\n');
        file.write_all(line.as_bytes())
    }

    /// Read every parseable record back; used for post-run inspection
    pub fn read_all(&self) -> Vec<Value> {
        fs::read_to_string(&self.path)
            .map(|content| {
                content
                    .lines()
                    .filter_map(|line| serde_json::from_str(line).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deeper").join("chaos.log");
        let log = EventLog::new(&path);

        log.append(&json!({"action": "pause"}));

        assert!(path.exists());
        let records = log.read_all();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["action"], "pause");
        assert_eq!(records[0]["run_id"], log.run_id().to_string());
    }

    #[test]
    fn test_appends_one_line_per_record() {
        let dir = TempDir::new().unwrap();
        let log = EventLog::new(dir.path().join("chaos.log"));

        for i in 0..3 {
            log.append(&json!({"i": i}));
        }

        let content = fs::read_to_string(log.path()).unwrap();
        assert_eq!(content.lines().count(), 3);
        assert!(content.ends_with('\n'));
        assert_eq!(log.read_all()[2]["i"], 2);
    }

    #[test]
    fn test_existing_run_id_is_kept() {
        let dir = TempDir::new().unwrap();
        let log = EventLog::new(dir.path().join("chaos.log"));
        log.append(&json!({"run_id": "external"}));
        assert_eq!(log.read_all()[0]["run_id"], "external");
    }

    #[test]
    fn test_unwritable_path_is_swallowed() {
        let dir = TempDir::new().unwrap();
        // a directory cannot be opened for appending
        let log = EventLog::new(dir.path());
        log.append(&json!({"action": "restart"}));
        assert!(log.read_all().is_empty());
    }

    #[test]
    fn test_now_ts_is_recent() {
        let ts = now_ts();
        assert!(ts > 1_600_000_000.0);
    }
}
