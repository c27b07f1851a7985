// Copyright 2026 The Streamtap Project
// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::stream::ToolResult;

/// FIFO of tool results for one session.
///
/// Producers and consumers of the same session contend on one short-held
/// mutex; different sessions never share a lock.
#[derive(Debug, Default)]
pub struct SessionQueue {
    items: Mutex<VecDeque<ToolResult>>,
}

impl SessionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave the deque half-updated,
    // so a poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, VecDeque<ToolResult>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, item: ToolResult) {
        self.lock().push_back(item);
    }

    pub fn pop(&self) -> Option<ToolResult> {
        self.lock().pop_front()
    }

    /// Copy of the current contents, oldest first. Nothing is removed.
    pub fn snapshot(&self) -> Vec<ToolResult> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop everything, returning how many items were held.
    pub fn clear(&self) -> usize {
        let mut items = self.lock();
        let n = items.len();
        items.clear();
        n
    }
}
