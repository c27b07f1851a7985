// Copyright 2026 The Streamtap Project
// SPDX-License-Identifier: Apache-2.0

// Result decoration for consumers
//
// A polled tool result is returned with the tool name it was declared under,
// the ids mentioned in its content and, when a graph lookup is wired in, the
// vertices for the entity names found in its arguments.

use std::sync::Arc;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::json_walk::{self, DEFAULT_MAX_DEPTH};
use crate::names::CallNameIndex;
use crate::stream::ToolResult;

/// Argument fields checked first, in order, for entity names.
pub const ENTITY_NAME_FIELDS: &[&str] = &[
    "names",
    "entityNames",
    "celebrities",
    "persons",
    "people",
    "actors",
    "stars",
    "entities",
    "targets",
    "subjects",
    "name",
    "celebrity",
    "person",
    "actor",
    "star",
];

const ID_PATTERNS: &[&str] = &[
    r#""id"\s*:\s*"([^"]+)""#,
    r"'id'\s*:\s*'([^']+)'",
    r"\bid\s*=\s*([\w\-]+)",
    r"\bid\s*:\s*([\w\-]+)",
];

// ---------------------------------------------------------------------------
// Trait: GraphLookup
// ---------------------------------------------------------------------------

/// Resolves entity names to graph vertices.
///
/// Must answer synchronously. Unknown names are simply absent from the
/// returned list.
pub trait GraphLookup: Send + Sync {
    fn vertices(&self, names: &[String]) -> Vec<Value>;
}

// ---------------------------------------------------------------------------
// DecoratedResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecoratedResult {
    #[serde(flatten)]
    pub result: ToolResult,
    pub tool_name: String,
    pub extracted_ids: Vec<String>,
    pub entity_names: Vec<String>,
    pub vertices: Vec<Value>,
}

// ---------------------------------------------------------------------------
// ResultDecorator
// ---------------------------------------------------------------------------

pub struct ResultDecorator {
    names: Arc<CallNameIndex>,
    graph: Option<Arc<dyn GraphLookup>>,
    id_patterns: Vec<Regex>,
    max_depth: usize,
}

impl ResultDecorator {
    pub fn new(names: Arc<CallNameIndex>, graph: Option<Arc<dyn GraphLookup>>) -> Self {
        let id_patterns = ID_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("built-in id pattern is invalid"))
            .collect();
        Self {
            names,
            graph,
            id_patterns,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn decorate(&self, result: ToolResult) -> DecoratedResult {
        let tool_name = self.names.lookup(&result.tool_call_id);

        let parsed = result
            .content
            .as_deref()
            .and_then(|c| serde_json::from_str::<Value>(c).ok());

        let extracted_ids = match (&parsed, result.content.as_deref()) {
            (Some(json), _) => json_walk::collect_ids(json, self.max_depth)
                .into_iter()
                .collect(),
            (None, Some(text)) => self.ids_from_text(text),
            (None, None) => Vec::new(),
        };

        let entity_names = parsed
            .as_ref()
            .and_then(|json| json_walk::find_args(json, self.max_depth))
            .map(|args| extract_entity_names(args, self.max_depth))
            .unwrap_or_default();

        let vertices = match &self.graph {
            Some(graph) if !entity_names.is_empty() => graph.vertices(&entity_names),
            _ => Vec::new(),
        };

        tracing::debug!(
            session_id = %result.session_id,
            tool_call_id = %result.tool_call_id,
            tool_name = %tool_name,
            ids = extracted_ids.len(),
            names = entity_names.len(),
            vertices = vertices.len(),
            "tool result decorated"
        );

        DecoratedResult {
            result,
            tool_name,
            extracted_ids,
            entity_names,
            vertices,
        }
    }

    /// Regex fallback for content that is not JSON. First occurrence of
    /// each id wins; order follows the pattern list, then position.
    fn ids_from_text(&self, text: &str) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for pattern in &self.id_patterns {
            for caps in pattern.captures_iter(text) {
                let id = caps[1].trim();
                if !id.is_empty() && !ids.iter().any(|seen| seen == id) {
                    ids.push(id.to_string());
                }
            }
        }
        ids
    }
}

// ---------------------------------------------------------------------------
// Entity names
// ---------------------------------------------------------------------------

/// Entity names from a tool call's `args`.
///
/// 1. the first priority field ([`ENTITY_NAME_FIELDS`]) holding a string or
///    string array
/// 2. otherwise the first field of any name holding one
/// 3. otherwise the union over nested objects (and objects inside arrays),
///    down to `max_depth`
pub fn extract_entity_names(args: &Map<String, Value>, max_depth: usize) -> Vec<String> {
    for field in ENTITY_NAME_FIELDS {
        if let Some(names) = args.get(*field).map(string_values).filter(|n| !n.is_empty()) {
            return names;
        }
    }

    if let Some(names) = args.values().map(string_values).find(|n| !n.is_empty()) {
        return names;
    }

    if max_depth == 0 {
        return Vec::new();
    }
    let mut names = Vec::new();
    for value in args.values() {
        match value {
            Value::Object(inner) => names.extend(extract_entity_names(inner, max_depth - 1)),
            Value::Array(items) => {
                for inner in items.iter().filter_map(Value::as_object) {
                    names.extend(extract_entity_names(inner, max_depth - 1));
                }
            }
            _ => {}
        }
    }
    names
}

fn string_values(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
