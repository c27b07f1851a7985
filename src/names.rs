// Copyright 2026 The Streamtap Project
// SPDX-License-Identifier: Apache-2.0

// Tool-call name index
//
// Maps a tool call id to the name (and metadata) it was declared with. The
// index is process-wide, not per session: declarations and results for the
// same call can arrive in either order, and a lookup after both have been
// seen must find the name regardless.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;

use crate::stream::ToolCallDeclaration;

/// Returned by [`CallNameIndex::lookup`] when no declaration was recorded.
pub const UNKNOWN_TOOL_NAME: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallName {
    pub call_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub call_type: Option<String>,
    pub args: Option<Value>,
    pub index: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

/// Concurrent `call_id -> ToolCallName` map. Last write wins.
#[derive(Debug, Default)]
pub struct CallNameIndex {
    entries: DashMap<String, ToolCallName>,
}

impl CallNameIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert the declaration under its call id.
    ///
    /// Declarations with a blank id cannot be looked up and are not stored;
    /// `None` is returned for them.
    pub fn write(&self, declaration: &ToolCallDeclaration) -> Option<ToolCallName> {
        if declaration.call_id.trim().is_empty() {
            tracing::debug!(name = %declaration.name, "tool call declared without id, not indexed");
            return None;
        }

        let entry = ToolCallName {
            call_id: declaration.call_id.clone(),
            name: declaration.name.clone(),
            call_type: declaration.call_type.clone(),
            args: declaration.args.clone(),
            index: declaration.index,
            updated_at: Utc::now(),
        };
        if let Some(previous) = self.entries.insert(entry.call_id.clone(), entry.clone()) {
            if previous.name != entry.name {
                tracing::debug!(
                    tool_call_id = %entry.call_id,
                    previous = %previous.name,
                    name = %entry.name,
                    "tool call name overwritten"
                );
            }
        }
        Some(entry)
    }

    pub fn get(&self, call_id: &str) -> Option<ToolCallName> {
        self.entries.get(call_id).map(|e| e.value().clone())
    }

    /// Name declared for `call_id`, or [`UNKNOWN_TOOL_NAME`].
    pub fn lookup(&self, call_id: &str) -> String {
        self.entries
            .get(call_id)
            .map(|e| e.name.clone())
            .unwrap_or_else(|| UNKNOWN_TOOL_NAME.to_string())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn decl(call_id: &str, name: &str) -> ToolCallDeclaration {
        ToolCallDeclaration {
            call_id: call_id.into(),
            name: name.into(),
            call_type: Some("tool_call".into()),
            args: Some(json!({"query": "rust"})),
            index: Some(0),
        }
    }

    #[test]
    fn lookup_miss_is_unknown() {
        let index = CallNameIndex::new();
        assert_eq!(index.lookup("nope"), UNKNOWN_TOOL_NAME);
        assert!(index.get("nope").is_none());
    }

    #[test]
    fn write_then_lookup() {
        let index = CallNameIndex::new();
        let stored = index.write(&decl("c1", "web_search")).unwrap();
        assert_eq!(stored.name, "web_search");
        assert_eq!(index.lookup("c1"), "web_search");

        let entry = index.get("c1").unwrap();
        assert_eq!(entry.call_type.as_deref(), Some("tool_call"));
        assert_eq!(entry.args, Some(json!({"query": "rust"})));
        assert_eq!(entry.index, Some(0));
    }

    #[test]
    fn last_write_wins() {
        let index = CallNameIndex::new();
        index.write(&decl("c1", "first"));
        index.write(&decl("c1", "second"));
        assert_eq!(index.lookup("c1"), "second");
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn blank_id_not_indexed() {
        let index = CallNameIndex::new();
        assert!(index.write(&decl("  ", "web_search")).is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn serializes_call_type_as_type() {
        let index = CallNameIndex::new();
        let entry = index.write(&decl("c1", "crawl")).unwrap();
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["type"], "tool_call");
        assert_eq!(value["call_id"], "c1");
    }

    #[test]
    fn concurrent_writers_on_distinct_ids() {
        let index = Arc::new(CallNameIndex::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let index = index.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        index.write(&decl(&format!("t{t}-c{i}"), &format!("tool-{t}")));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(index.len(), 800);
        assert_eq!(index.lookup("t3-c42"), "tool-3");
    }
}
