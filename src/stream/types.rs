// Copyright 2026 The Streamtap Project
// SPDX-License-Identifier: Apache-2.0

// Stream types
//
// Records, the facts classified out of them, and the per-subscription
// lifecycle values the pipeline reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One upstream line, decoded as a JSON object.
pub type Record = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// Classified events
// ---------------------------------------------------------------------------

/// A fact extracted from a single record.
///
/// A record can yield several events at once (a reporter fragment next to a
/// tool result, or a batch of tool-call declarations). The classifier emits
/// them in routing order.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ToolResult(ToolResultFact),
    ToolCallDeclaration(ToolCallDeclaration),
    ReporterFragment(ReporterFragment),
    /// `finish_reason == "stop"`: flush the reporter buffers.
    Terminator,
    Unrecognized,
}

/// A tool result as it appeared on the wire, before it is bound to the
/// subscribing session.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResultFact {
    pub tool_call_id: String,
    pub agent: Option<String>,
    pub result_id: Option<String>,
    pub role: Option<String>,
    pub content: Option<String>,
    /// `thread_id` carried by the record itself. Informational only.
    pub thread_id: Option<String>,
}

impl ToolResultFact {
    /// Attach the fact to the session that subscribed to the stream.
    ///
    /// The record's own `thread_id` is discarded: the subscription's session
    /// id is authoritative.
    pub fn bind(self, session_id: &str) -> ToolResult {
        ToolResult {
            session_id: session_id.to_string(),
            tool_call_id: self.tool_call_id,
            agent: self.agent,
            result_id: self.result_id,
            role: self.role,
            content: self.content,
            received_at: Utc::now(),
        }
    }
}

/// A tool result owned by a session queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub session_id: String,
    pub tool_call_id: String,
    pub agent: Option<String>,
    pub result_id: Option<String>,
    pub role: Option<String>,
    pub content: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// One element of a record's `tool_calls` array with a non-blank name.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallDeclaration {
    /// May be blank; such declarations are counted but never indexed.
    pub call_id: String,
    pub name: String,
    pub call_type: Option<String>,
    pub args: Option<Value>,
    /// Index of the matching `tool_call_chunks` element, when present.
    pub index: Option<i64>,
}

/// Reporter text from a record whose `agent` is the reporter.
#[derive(Debug, Clone, PartialEq)]
pub struct ReporterFragment {
    pub content: Option<String>,
    pub reasoning_content: Option<String>,
}

// ---------------------------------------------------------------------------
// Subscription lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Subscribed,
    Streaming,
    Completed,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Failed)
    }
}

/// Bookkeeping written at subscribe time and again when a subscription ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub session_id: String,
    pub subscription_id: String,
    pub state: PipelineState,
    /// `None` while the subscription is still running.
    pub success: Option<bool>,
    pub message: String,
    pub results_count: usize,
    pub tool_calls_count: usize,
    pub reports_flushed: usize,
    pub elapsed_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a subscription ended in `Failed`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamError {
    #[error("upstream failed: {0}")]
    Upstream(String),

    #[error("subscription exceeded {millis}ms ceiling")]
    Timeout { millis: u64 },

    #[error("upstream stream ended without a completion signal")]
    Abandoned,
}
