// Copyright 2026 The Streamtap Project
// SPDX-License-Identifier: Apache-2.0

// Depth-bounded JSON traversal
//
// Pre-order, depth-first. Object members are visited in map iteration order,
// array elements by index. Nothing below `max_depth` is visited, so hostile
// nesting cannot exhaust the stack.

use std::collections::BTreeSet;
use std::ops::ControlFlow;

use serde_json::{Map, Value};

pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Visit `root` and its descendants. `visit` receives each node and its
/// depth (root = 0); returning `Break` stops the walk.
pub fn walk<'a, F>(root: &'a Value, max_depth: usize, visit: &mut F) -> ControlFlow<()>
where
    F: FnMut(&'a Value, usize) -> ControlFlow<()>,
{
    walk_at(root, 0, max_depth, visit)
}

fn walk_at<'a, F>(node: &'a Value, depth: usize, max_depth: usize, visit: &mut F) -> ControlFlow<()>
where
    F: FnMut(&'a Value, usize) -> ControlFlow<()>,
{
    visit(node, depth)?;
    if depth >= max_depth {
        return ControlFlow::Continue(());
    }
    match node {
        Value::Object(map) => {
            for child in map.values() {
                walk_at(child, depth + 1, max_depth, visit)?;
            }
        }
        Value::Array(items) => {
            for child in items {
                walk_at(child, depth + 1, max_depth, visit)?;
            }
        }
        _ => {}
    }
    ControlFlow::Continue(())
}

/// First object (in pre-order) holding `key` whose value satisfies `accept`.
pub fn find_field<'a>(
    root: &'a Value,
    key: &str,
    max_depth: usize,
    accept: impl Fn(&Value) -> bool,
) -> Option<&'a Value> {
    let mut found = None;
    let _ = walk(root, max_depth, &mut |node: &'a Value, _: usize| {
        if let Some(value) = node.as_object().and_then(|m| m.get(key)) {
            if accept(value) {
                found = Some(value);
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    });
    found
}

/// First non-empty `args` object anywhere in `root`.
pub fn find_args(root: &Value, max_depth: usize) -> Option<&Map<String, Value>> {
    find_field(root, "args", max_depth, |v| {
        v.as_object().is_some_and(|m| !m.is_empty())
    })
    .and_then(Value::as_object)
}

/// Every non-null `id` value in `root`, rendered as text and de-duplicated.
pub fn collect_ids(root: &Value, max_depth: usize) -> BTreeSet<String> {
    let mut ids = BTreeSet::new();
    let _ = walk(root, max_depth, &mut |node, _| {
        match node.as_object().and_then(|m| m.get("id")) {
            Some(Value::String(s)) if !s.trim().is_empty() => {
                ids.insert(s.trim().to_string());
            }
            Some(Value::Null) | Some(Value::String(_)) | None => {}
            Some(other) => {
                ids.insert(other.to_string());
            }
        }
        ControlFlow::Continue(())
    });
    ids
}
