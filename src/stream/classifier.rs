// Copyright 2026 The Streamtap Project
// SPDX-License-Identifier: Apache-2.0

// Record parsing and event classification
//
// A line becomes a Record (JSON object) or nothing. A Record becomes zero or
// more Events. Neither step ever fails the stream.

use serde_json::Value;

use super::types::{Event, Record, ReporterFragment, ToolCallDeclaration, ToolResultFact};

pub const DATA_PREFIX: &str = "data:";

/// Decode one upstream line into a JSON object.
///
/// An optional `data:` prefix is stripped and whitespace trimmed. Blank lines,
/// SSE comments, `[DONE]`, non-JSON and non-object JSON all yield `None`.
pub fn parse_record(line: &str) -> Option<Record> {
    let trimmed = line.trim();
    let payload = trimmed.strip_prefix(DATA_PREFIX).unwrap_or(trimmed).trim();
    if payload.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Trait: EventClassifier
// ---------------------------------------------------------------------------

/// Turns a record into the events the pipeline routes.
///
/// Held as `Arc<dyn EventClassifier>` by every subscription.
pub trait EventClassifier: Send + Sync {
    fn classify(&self, record: &Record) -> Vec<Event>;
}

// ---------------------------------------------------------------------------
// Agent-aware classifier
// ---------------------------------------------------------------------------

/// Classifies records from the multi-agent chat service.
///
/// - `finish_reason == "stop"` -> `Terminator`, and nothing else
/// - `agent == <reporter>` with non-blank `content`/`reasoning_content` -> `ReporterFragment`
/// - non-blank `tool_call_id` -> `ToolResult`
/// - each `tool_calls[]` element with a non-blank `name` -> `ToolCallDeclaration`
/// - none of the above -> `Unrecognized`
pub struct AgentEventClassifier {
    reporter_agent: String,
}

impl AgentEventClassifier {
    pub fn new(reporter_agent: impl Into<String>) -> Self {
        Self {
            reporter_agent: reporter_agent.into(),
        }
    }

    fn reporter_fragment(&self, record: &Record) -> Option<ReporterFragment> {
        if text_field(record, "agent").as_deref() != Some(self.reporter_agent.as_str()) {
            return None;
        }
        let content = text_field(record, "content");
        let reasoning_content = text_field(record, "reasoning_content");
        if is_blank(content.as_deref()) && is_blank(reasoning_content.as_deref()) {
            return None;
        }
        Some(ReporterFragment {
            content,
            reasoning_content,
        })
    }
}

impl Default for AgentEventClassifier {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_REPORTER_AGENT)
    }
}

impl EventClassifier for AgentEventClassifier {
    fn classify(&self, record: &Record) -> Vec<Event> {
        if record.get("finish_reason").and_then(Value::as_str) == Some("stop") {
            return vec![Event::Terminator];
        }

        let mut events = Vec::new();

        if let Some(fragment) = self.reporter_fragment(record) {
            events.push(Event::ReporterFragment(fragment));
        }

        if let Some(tool_call_id) = text_field(record, "tool_call_id").filter(|s| !s.trim().is_empty()) {
            events.push(Event::ToolResult(ToolResultFact {
                tool_call_id,
                agent: text_field(record, "agent"),
                result_id: text_field(record, "id"),
                role: text_field(record, "role"),
                content: text_field(record, "content"),
                thread_id: text_field(record, "thread_id"),
            }));
        }

        if let Some(calls) = record.get("tool_calls").and_then(Value::as_array) {
            let chunks = record
                .get("tool_call_chunks")
                .and_then(Value::as_array)
                .map(Vec::as_slice);
            events.extend(
                calls
                    .iter()
                    .filter_map(Value::as_object)
                    .filter_map(|call| declaration(call, chunks))
                    .map(Event::ToolCallDeclaration),
            );
        }

        if events.is_empty() {
            events.push(Event::Unrecognized);
        }
        events
    }
}

fn declaration(call: &Record, chunks: Option<&[Value]>) -> Option<ToolCallDeclaration> {
    let name = text_field(call, "name").filter(|n| !n.trim().is_empty())?;
    let call_id = text_field(call, "id").unwrap_or_default();
    let index = chunks.and_then(|chunks| chunk_index(chunks, &call_id));
    Some(ToolCallDeclaration {
        call_id,
        name,
        call_type: text_field(call, "type"),
        args: call.get("args").filter(|v| !v.is_null()).cloned(),
        index,
    })
}

/// `index` of the first `tool_call_chunks` element whose `id` matches.
fn chunk_index(chunks: &[Value], call_id: &str) -> Option<i64> {
    if call_id.trim().is_empty() {
        return None;
    }
    let chunk = chunks
        .iter()
        .filter_map(Value::as_object)
        .find(|chunk| text_field(chunk, "id").as_deref() == Some(call_id))?;
    match chunk.get("index")? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// String view of a field. JSON `null` and missing fields are `None`;
/// non-string values are rendered as compact JSON.
pub(crate) fn text_field(record: &Record, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

pub(crate) fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |s| s.trim().is_empty())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    fn classify(value: Value) -> Vec<Event> {
        AgentEventClassifier::default().classify(&record(value))
    }

    #[test]
    fn parse_strips_data_prefix() {
        let rec = parse_record(r#"data: {"agent":"coder"}"#).unwrap();
        assert_eq!(rec["agent"], "coder");
    }

    #[test]
    fn parse_accepts_bare_json_and_surrounding_whitespace() {
        assert!(parse_record("  {\"a\":1}\r").is_some());
        assert!(parse_record("data:{\"a\":1}").is_some());
    }

    #[test]
    fn parse_rejects_non_objects_and_noise() {
        assert!(parse_record("").is_none());
        assert!(parse_record("data:").is_none());
        assert!(parse_record("data: [DONE]").is_none());
        assert!(parse_record(": keep-alive").is_none());
        assert!(parse_record("event: message").is_none());
        assert!(parse_record("data: [1,2]").is_none());
        assert!(parse_record("data: \"text\"").is_none());
        assert!(parse_record("data: {\"truncated\": ").is_none());
    }

    #[test]
    fn stop_is_terminator_only() {
        let events = classify(json!({
            "finish_reason": "stop",
            "agent": "reporter",
            "content": "final words",
            "tool_call_id": "c1"
        }));
        assert_eq!(events, vec![Event::Terminator]);
    }

    #[test]
    fn other_finish_reasons_are_not_terminators() {
        let events = classify(json!({"finish_reason": "tool_calls"}));
        assert_eq!(events, vec![Event::Unrecognized]);
    }

    #[test]
    fn reporter_content_becomes_fragment() {
        let events = classify(json!({"agent": "reporter", "content": "Hello"}));
        assert_eq!(
            events,
            vec![Event::ReporterFragment(ReporterFragment {
                content: Some("Hello".into()),
                reasoning_content: None,
            })]
        );
    }

    #[test]
    fn blank_reporter_fragment_is_dropped() {
        let events = classify(json!({"agent": "reporter", "content": "  ", "reasoning_content": ""}));
        assert_eq!(events, vec![Event::Unrecognized]);
    }

    #[test]
    fn reporter_agent_name_is_configurable() {
        let classifier = AgentEventClassifier::new("summarizer");
        let events = classifier.classify(&record(json!({"agent": "reporter", "content": "x"})));
        assert_eq!(events, vec![Event::Unrecognized]);
        let events = classifier.classify(&record(json!({"agent": "summarizer", "content": "x"})));
        assert!(matches!(events[0], Event::ReporterFragment(_)));
    }

    #[test]
    fn tool_result_fields_extracted() {
        let events = classify(json!({
            "thread_id": "other-thread",
            "agent": "researcher",
            "id": "msg-9",
            "role": "tool",
            "content": "{\"id\":\"v1\"}",
            "tool_call_id": "call-1"
        }));
        assert_eq!(
            events,
            vec![Event::ToolResult(ToolResultFact {
                tool_call_id: "call-1".into(),
                agent: Some("researcher".into()),
                result_id: Some("msg-9".into()),
                role: Some("tool".into()),
                content: Some("{\"id\":\"v1\"}".into()),
                thread_id: Some("other-thread".into()),
            })]
        );
    }

    #[test]
    fn blank_tool_call_id_is_not_a_result() {
        assert_eq!(classify(json!({"tool_call_id": " "})), vec![Event::Unrecognized]);
        assert_eq!(classify(json!({"tool_call_id": null})), vec![Event::Unrecognized]);
    }

    #[test]
    fn reporter_tool_result_yields_both_events_in_order() {
        let events = classify(json!({"agent": "reporter", "content": "r", "tool_call_id": "c9"}));
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Event::ReporterFragment(_)));
        assert!(matches!(events[1], Event::ToolResult(_)));
    }

    #[test]
    fn declarations_keep_array_order_and_skip_unnamed() {
        let events = classify(json!({
            "id": "chunk-1",
            "tool_calls": [
                {"id": "c1", "name": "web_search", "type": "tool_call", "args": {"query": "x"}},
                {"id": "c2", "name": ""},
                {"id": "c3", "name": "crawl"},
                "not-an-object"
            ],
            "tool_call_chunks": [
                {"id": "c3", "index": 1},
                {"id": "c1", "index": "0"}
            ]
        }));
        assert_eq!(
            events,
            vec![
                Event::ToolCallDeclaration(ToolCallDeclaration {
                    call_id: "c1".into(),
                    name: "web_search".into(),
                    call_type: Some("tool_call".into()),
                    args: Some(json!({"query": "x"})),
                    index: Some(0),
                }),
                Event::ToolCallDeclaration(ToolCallDeclaration {
                    call_id: "c3".into(),
                    name: "crawl".into(),
                    call_type: None,
                    args: None,
                    index: Some(1),
                }),
            ]
        );
    }

    #[test]
    fn declaration_without_id_has_no_index() {
        let events = classify(json!({
            "tool_calls": [{"name": "lookup"}],
            "tool_call_chunks": [{"id": "", "index": 3}]
        }));
        match &events[0] {
            Event::ToolCallDeclaration(decl) => {
                assert_eq!(decl.call_id, "");
                assert_eq!(decl.index, None);
            }
            other => panic!("expected declaration, got {other:?}"),
        }
    }

    #[test]
    fn non_string_fields_rendered_as_json() {
        let events = classify(json!({"tool_call_id": 42, "content": {"rows": [1]}}));
        match &events[0] {
            Event::ToolResult(fact) => {
                assert_eq!(fact.tool_call_id, "42");
                assert_eq!(fact.content.as_deref(), Some(r#"{"rows":[1]}"#));
            }
            other => panic!("expected tool result, got {other:?}"),
        }
    }
}
