// Copyright 2026 The Streamtap Project
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Concatenated reporter output, persisted once per flush.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub session_id: String,
    pub agent: String,
    pub content: String,
    pub reasoning_content: String,
    pub flushed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Buffers {
    content: String,
    reasoning: String,
}

/// Per-session buffers for reporter `content` and `reasoning_content`.
#[derive(Debug, Default)]
pub struct ReporterAccumulator {
    buffers: Mutex<Buffers>,
}

impl ReporterAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Buffers> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append the non-blank halves of a fragment. Returns whether anything
    /// was appended.
    pub fn append(&self, content: Option<&str>, reasoning: Option<&str>) -> bool {
        let mut buffers = self.lock();
        let mut appended = false;
        if let Some(text) = content.filter(|t| !t.trim().is_empty()) {
            buffers.content.push_str(text);
            appended = true;
        }
        if let Some(text) = reasoning.filter(|t| !t.trim().is_empty()) {
            buffers.reasoning.push_str(text);
            appended = true;
        }
        appended
    }

    /// Take both buffers, leaving them empty.
    ///
    /// Returns `None` when both were empty, so an idle flush produces no
    /// report.
    pub fn take(&self) -> Option<(String, String)> {
        let mut buffers = self.lock();
        let content = std::mem::take(&mut buffers.content);
        let reasoning = std::mem::take(&mut buffers.reasoning);
        if content.is_empty() && reasoning.is_empty() {
            None
        } else {
            Some((content, reasoning))
        }
    }

    pub fn is_empty(&self) -> bool {
        let buffers = self.lock();
        buffers.content.is_empty() && buffers.reasoning.is_empty()
    }
}
