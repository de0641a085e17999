use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, WorkflowError};

/// One stored result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub unit_id: Uuid,
    pub unit_name: String,
    pub label: String,
    pub timestamp: DateTime<Utc>,
    /// Final cell volume (Å^3), when a geometry was produced.
    pub volume: Option<f64>,
    /// Mass density (g/cm^3).
    pub density: Option<f64>,
    /// Raw averaged pressure.
    pub pressure: Option<f64>,
    /// Reported pressure (raw * 1000).
    pub avg_pres: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub density_calculated: Option<bool>,
}

impl ResultRecord {
    pub fn new(unit_id: Uuid, unit_name: &str, label: &str) -> Self {
        Self {
            unit_id,
            unit_name: unit_name.to_string(),
            label: label.to_string(),
            timestamp: Utc::now(),
            volume: None,
            density: None,
            pressure: None,
            avg_pres: None,
            density_calculated: None,
        }
    }
}

/// Destination for result records. Shared by concurrently running chains.
pub trait ResultSink: Send + Sync {
    fn store(&self, record: &ResultRecord) -> Result<()>;
}

/// Appends one JSON object per line.
pub struct JsonLinesSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesSink {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| WorkflowError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| WorkflowError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_all(path: &Path) -> Result<Vec<ResultRecord>> {
        let text = std::fs::read_to_string(path).map_err(|e| WorkflowError::io(path, e))?;
        text.lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty())
            .map(|(n, l)| {
                serde_json::from_str(l).map_err(|e| {
                    let source = io::Error::new(io::ErrorKind::InvalidData, format!("line {}: {}", n + 1, e));
                    WorkflowError::io(path, source)
                })
            })
            .collect()
    }
}

impl ResultSink for JsonLinesSink {
    fn store(&self, record: &ResultRecord) -> Result<()> {
        let line = serde_json::to_string(record).map_err(|e| WorkflowError::io(&self.path, e.into()))?;
        let mut file = self.file.lock();
        writeln!(file, "{}", line).map_err(|e| WorkflowError::io(&self.path, e))
    }
}

/// Keeps records in memory.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<ResultRecord>>,
}

impl MemorySink {
    pub fn records(&self) -> Vec<ResultRecord> {
        self.records.lock().clone()
    }
}

impl ResultSink for MemorySink {
    fn store(&self, record: &ResultRecord) -> Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// One row of a chain's convergence history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub chain: String,
    pub unit: String,
    pub spawn_count: u32,
    pub pressure: f64,
    pub avg_pres: f64,
    pub volume_before: Option<f64>,
    pub volume_after: Option<f64>,
    pub decision: String,
}

/// Storage failures, including malformed rows, surface as
/// [`WorkflowError::Io`] against the history file.
pub fn write_history(path: &Path, rows: &[CycleRecord]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path).map_err(|e| WorkflowError::io(path, e.into()))?;
    for row in rows {
        wtr.serialize(row).map_err(|e| WorkflowError::io(path, e.into()))?;
    }
    wtr.flush().map_err(|e| WorkflowError::io(path, e))
}

pub fn read_history(path: &Path) -> Result<Vec<CycleRecord>> {
    let mut rdr = csv::Reader::from_path(path).map_err(|e| WorkflowError::io(path, e.into()))?;
    rdr.deserialize()
        .map(|r| r.map_err(|e| WorkflowError::io(path, e.into())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_lines_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.jsonl");
        let sink = JsonLinesSink::open(&path).unwrap();
        let mut r = ResultRecord::new(Uuid::new_v4(), "run0", "initial_md");
        r.volume = Some(1000.0);
        sink.store(&r).unwrap();
        sink.store(&r).unwrap();
        let back = JsonLinesSink::read_all(&path).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[0], r);
    }

    #[test]
    fn history_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.csv");
        let rows = vec![CycleRecord {
            chain: "c".into(),
            unit: "c_run1".into(),
            spawn_count: 1,
            pressure: 12.5,
            avg_pres: 12500.0,
            volume_before: Some(1000.0),
            volume_after: None,
            decision: "converged".into(),
        }];
        write_history(&path, &rows).unwrap();
        assert_eq!(read_history(&path).unwrap(), rows);
    }

    #[test]
    fn missing_history_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.csv");
        match read_history(&path) {
            Err(WorkflowError::Io { path: p, source }) => {
                assert_eq!(p, path);
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("expected an io error, got {:?}", other),
        }

        let unwritable = dir.path().join("no_such_dir").join("history.csv");
        assert!(matches!(write_history(&unwritable, &[]), Err(WorkflowError::Io { .. })));
    }

    #[test]
    fn malformed_rows_are_storage_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.csv");
        std::fs::write(&path, "chain,unit,spawn_count\nc,c_run1,not_a_number\n").unwrap();
        assert!(matches!(read_history(&path), Err(WorkflowError::Io { .. })));

        let results = dir.path().join("results.jsonl");
        std::fs::write(&results, "{\"unit_name\": \"run0\"\n").unwrap();
        match JsonLinesSink::read_all(&results) {
            Err(WorkflowError::Io { source, .. }) => {
                assert_eq!(source.kind(), io::ErrorKind::InvalidData);
                assert!(source.to_string().starts_with("line 1:"));
            }
            other => panic!("expected an io error, got {:?}", other),
        }
    }
}
