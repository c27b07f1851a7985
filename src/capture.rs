// Copyright 2026 The Streamtap Project
// SPDX-License-Identifier: Apache-2.0

// Offline inspection of a saved upstream capture
//
// Only `data:` lines are considered. Lines that fail to decode are skipped.

use serde::Serialize;
use serde_json::Value;

use crate::stream::{parse_record, text_field, Record, DATA_PREFIX};

/// Identity fields of the first decodable record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CaptureInfo {
    pub thread_id: Option<String>,
    pub agent: Option<String>,
    pub id: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CaptureSummary {
    pub info: CaptureInfo,
    pub records: usize,
    /// Every non-empty `content`, in stream order.
    pub fragments: Vec<String>,
    /// Distinct names from `tool_calls[].name` and `enabled_tools[]`, in
    /// first-seen order.
    pub tool_names: Vec<String>,
}

impl CaptureSummary {
    pub fn content(&self) -> String {
        self.fragments.concat()
    }
}

pub fn summarize(text: &str) -> CaptureSummary {
    let mut summary = CaptureSummary::default();

    let records = text
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with(DATA_PREFIX))
        .filter_map(parse_record);

    for record in records {
        if summary.records == 0 {
            summary.info = CaptureInfo {
                thread_id: text_field(&record, "thread_id"),
                agent: text_field(&record, "agent"),
                id: text_field(&record, "id"),
                role: text_field(&record, "role"),
            };
        }
        summary.records += 1;

        if let Some(content) = text_field(&record, "content").filter(|c| !c.is_empty()) {
            summary.fragments.push(content);
        }
        collect_tool_names(&record, &mut summary.tool_names);
    }

    tracing::debug!(
        records = summary.records,
        fragments = summary.fragments.len(),
        tools = summary.tool_names.len(),
        "capture summarized"
    );
    summary
}

fn collect_tool_names(record: &Record, names: &mut Vec<String>) {
    let declared = record
        .get("tool_calls")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|call| call.get("name").and_then(Value::as_str));
    let enabled = record
        .get("enabled_tools")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str);

    for name in declared.chain(enabled) {
        if !name.trim().is_empty() && !names.iter().any(|seen| seen == name) {
            names.push(name.to_string());
        }
    }
}
