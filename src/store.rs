// Copyright 2026 The Streamtap Project
// SPDX-License-Identifier: Apache-2.0

// Persistence collaborator
//
// The pipeline reports every tool result, every indexed tool-call name,
// every reporter flush and every session outcome here. Failures are logged
// by the caller and never interrupt the stream.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::config::StoreConfig;
use crate::names::ToolCallName;
use crate::session::Report;
use crate::stream::{SessionOutcome, ToolResult};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Write-only sink for analytics facts.
///
/// Implementations must be thread-safe: analytic workers for many sessions
/// call in concurrently through `Arc<dyn ResultStore>`.
pub trait ResultStore: Send + Sync {
    fn save_tool_result(&self, result: &ToolResult) -> Result<(), StoreError>;

    fn save_tool_call_name(&self, entry: &ToolCallName) -> Result<(), StoreError>;

    fn save_report(&self, report: &Report) -> Result<(), StoreError>;

    fn save_outcome(&self, outcome: &SessionOutcome) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// NullStore
// ---------------------------------------------------------------------------

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullStore;

impl ResultStore for NullStore {
    fn save_tool_result(&self, _result: &ToolResult) -> Result<(), StoreError> {
        Ok(())
    }

    fn save_tool_call_name(&self, _entry: &ToolCallName) -> Result<(), StoreError> {
        Ok(())
    }

    fn save_report(&self, _report: &Report) -> Result<(), StoreError> {
        Ok(())
    }

    fn save_outcome(&self, _outcome: &SessionOutcome) -> Result<(), StoreError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Keeps every record in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    results: Mutex<Vec<ToolResult>>,
    names: Mutex<Vec<ToolCallName>>,
    reports: Mutex<Vec<Report>>,
    outcomes: Mutex<Vec<SessionOutcome>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<ToolResult> {
        lock(&self.results).clone()
    }

    pub fn names(&self) -> Vec<ToolCallName> {
        lock(&self.names).clone()
    }

    pub fn reports(&self) -> Vec<Report> {
        lock(&self.reports).clone()
    }

    pub fn outcomes(&self) -> Vec<SessionOutcome> {
        lock(&self.outcomes).clone()
    }
}

impl ResultStore for MemoryStore {
    fn save_tool_result(&self, result: &ToolResult) -> Result<(), StoreError> {
        lock(&self.results).push(result.clone());
        Ok(())
    }

    fn save_tool_call_name(&self, entry: &ToolCallName) -> Result<(), StoreError> {
        lock(&self.names).push(entry.clone());
        Ok(())
    }

    fn save_report(&self, report: &Report) -> Result<(), StoreError> {
        lock(&self.reports).push(report.clone());
        Ok(())
    }

    fn save_outcome(&self, outcome: &SessionOutcome) -> Result<(), StoreError> {
        lock(&self.outcomes).push(outcome.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JsonlStore
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Line<'a> {
    ToolResult(&'a ToolResult),
    ToolCallName(&'a ToolCallName),
    Report(&'a Report),
    Outcome(&'a SessionOutcome),
}

/// Appends one JSON object per record to a file, tagged with `"kind"`.
#[derive(Debug)]
pub struct JsonlStore {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlStore {
    /// Open (or create) `path` for appending. Parent directories are
    /// created as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::info!(path = %path.display(), "jsonl store opened");
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, line: &Line<'_>) -> Result<(), StoreError> {
        let json = serde_json::to_string(line)?;
        let mut file = lock(&self.file);
        writeln!(file, "{json}")?;
        Ok(())
    }
}

impl ResultStore for JsonlStore {
    fn save_tool_result(&self, result: &ToolResult) -> Result<(), StoreError> {
        self.append(&Line::ToolResult(result))
    }

    fn save_tool_call_name(&self, entry: &ToolCallName) -> Result<(), StoreError> {
        self.append(&Line::ToolCallName(entry))
    }

    fn save_report(&self, report: &Report) -> Result<(), StoreError> {
        self.append(&Line::Report(report))
    }

    fn save_outcome(&self, outcome: &SessionOutcome) -> Result<(), StoreError> {
        self.append(&Line::Outcome(outcome))
    }
}

// ---------------------------------------------------------------------------
// Construction from config
// ---------------------------------------------------------------------------

/// Build the store named by the `store:` section.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn ResultStore>, StoreError> {
    let store: Arc<dyn ResultStore> = match config {
        StoreConfig::None => Arc::new(NullStore),
        StoreConfig::Memory => Arc::new(MemoryStore::new()),
        StoreConfig::Jsonl { path } => Arc::new(JsonlStore::open(path)?),
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::Value;

    fn result(call_id: &str) -> ToolResult {
        ToolResult {
            session_id: "s1".into(),
            tool_call_id: call_id.into(),
            agent: Some("coder".into()),
            result_id: Some("m1".into()),
            role: Some("tool".into()),
            content: Some("ok".into()),
            received_at: Utc::now(),
        }
    }

    fn report() -> Report {
        Report {
            session_id: "s1".into(),
            agent: "reporter".into(),
            content: "Hello".into(),
            reasoning_content: String::new(),
            flushed_at: Utc::now(),
        }
    }

    fn read_lines(path: &Path) -> Vec<Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn memory_store_keeps_arrival_order() {
        let store = MemoryStore::new();
        store.save_tool_result(&result("a")).unwrap();
        store.save_tool_result(&result("b")).unwrap();
        store.save_report(&report()).unwrap();
        let ids: Vec<_> = store.results().into_iter().map(|r| r.tool_call_id).collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(store.reports().len(), 1);
        assert!(store.outcomes().is_empty());
    }

    #[test]
    fn jsonl_lines_are_tagged_by_kind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.jsonl");
        let store = JsonlStore::open(&path).unwrap();

        store.save_tool_result(&result("c1")).unwrap();
        store.save_report(&report()).unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["kind"], "tool_result");
        assert_eq!(lines[0]["tool_call_id"], "c1");
        assert_eq!(lines[1]["kind"], "report");
        assert_eq!(lines[1]["content"], "Hello");
    }

    #[test]
    fn jsonl_reopen_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        JsonlStore::open(&path)
            .unwrap()
            .save_tool_result(&result("first"))
            .unwrap();
        JsonlStore::open(&path)
            .unwrap()
            .save_tool_result(&result("second"))
            .unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["tool_call_id"], "second");
    }

    #[test]
    fn jsonl_concurrent_writers_never_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let store = std::sync::Arc::new(JsonlStore::open(&path).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        store.save_tool_result(&result(&format!("t{t}-{i}"))).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(read_lines(&path).len(), 200);
    }

    #[test]
    fn open_store_follows_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("facts.jsonl");

        let store = open_store(&StoreConfig::Jsonl { path: path.clone() }).unwrap();
        store.save_report(&report()).unwrap();
        assert_eq!(read_lines(&path).len(), 1);

        let store = open_store(&StoreConfig::None).unwrap();
        assert!(store.save_tool_result(&result("c1")).is_ok());
    }
}
