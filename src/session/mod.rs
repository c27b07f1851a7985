// Copyright 2026 The Streamtap Project
// SPDX-License-Identifier: Apache-2.0

// Session registry
//
// Owns every session's result queue, reporter buffers and latest outcome,
// keyed by session id. Sessions are created lazily on first touch and
// evicted by an idle sweep.

mod queue;
mod reporter;
mod sweeper;

pub use queue::SessionQueue;
pub use reporter::{Report, ReporterAccumulator};
pub use sweeper::Sweeper;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::config::SessionConfig;
use crate::stream::{SessionOutcome, ToolResult};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Everything held in memory for one session id.
#[derive(Debug)]
pub struct Session {
    session_id: String,
    queue: SessionQueue,
    reporter: ReporterAccumulator,
    created_at: DateTime<Utc>,
    last_access: Mutex<DateTime<Utc>>,
    outcome: Mutex<Option<SessionOutcome>>,
}

impl Session {
    fn new(session_id: &str) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.to_string(),
            queue: SessionQueue::new(),
            reporter: ReporterAccumulator::new(),
            created_at: now,
            last_access: Mutex::new(now),
            outcome: Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn queue(&self) -> &SessionQueue {
        &self.queue
    }

    pub fn reporter(&self) -> &ReporterAccumulator {
        &self.reporter
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_access(&self) -> DateTime<Utc> {
        *lock(&self.last_access)
    }

    fn touch(&self) {
        self.touch_at(Utc::now());
    }

    pub(crate) fn touch_at(&self, at: DateTime<Utc>) {
        *lock(&self.last_access) = at;
    }

    fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.last_access())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistryStats {
    pub total_sessions: usize,
    pub total_results: usize,
    pub average_queue_size: f64,
    pub queue_sizes: BTreeMap<String, usize>,
}

// ---------------------------------------------------------------------------
// SessionRegistry
// ---------------------------------------------------------------------------

/// Concurrent map of live sessions.
///
/// Operations on different sessions never block each other beyond the
/// DashMap shard lock, which is released before any per-session lock is
/// taken for queue work.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    idle_ttl: Duration,
    sweep_interval: Duration,
    sweeper: Mutex<Option<Sweeper>>,
}

impl SessionRegistry {
    pub fn new(config: &SessionConfig) -> Self {
        let sessions = match config.shards {
            Some(shards) => DashMap::with_shard_amount(shards),
            None => DashMap::new(),
        };
        Self {
            sessions,
            idle_ttl: config.idle_ttl,
            sweep_interval: config.sweep_interval,
            sweeper: Mutex::new(None),
        }
    }

    pub fn idle_ttl(&self) -> Duration {
        self.idle_ttl
    }

    /// Existing session for `session_id`, or a fresh one. Refreshes the
    /// last-access time either way.
    pub fn get_or_create(&self, session_id: &str) -> Arc<Session> {
        if let Some(entry) = self.sessions.get(session_id) {
            // Touch under the shard read lock so a concurrent sweep (which
            // needs the write lock) sees the fresh timestamp.
            entry.touch();
            return Arc::clone(entry.value());
        }
        let entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(session_id, "session created");
                Arc::new(Session::new(session_id))
            });
        entry.touch();
        Arc::clone(entry.value())
    }

    fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(session_id).map(|e| Arc::clone(e.value()))
    }

    pub fn enqueue(&self, session_id: &str, item: ToolResult) {
        self.get_or_create(session_id).queue.push(item);
    }

    /// Oldest queued result, removed from the queue.
    pub fn dequeue_one(&self, session_id: &str) -> Option<ToolResult> {
        self.get_or_create(session_id).queue.pop()
    }

    /// All queued results, oldest first, without consuming them.
    pub fn peek_all(&self, session_id: &str) -> Vec<ToolResult> {
        self.get_or_create(session_id).queue.snapshot()
    }

    pub fn size(&self, session_id: &str) -> usize {
        self.get(session_id).map_or(0, |s| s.queue.len())
    }

    pub fn exists(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Remove the session entirely. Returns the number of queued results
    /// that were dropped.
    pub fn clear(&self, session_id: &str) -> usize {
        match self.sessions.remove(session_id) {
            Some((_, session)) => {
                let dropped = session.queue.clear();
                tracing::info!(session_id, dropped, "session cleared");
                dropped
            }
            None => 0,
        }
    }

    pub fn append_reporter(
        &self,
        session_id: &str,
        content: Option<&str>,
        reasoning: Option<&str>,
    ) -> bool {
        self.get_or_create(session_id)
            .reporter
            .append(content, reasoning)
    }

    /// Drain the reporter buffers into a [`Report`]. The buffers are empty
    /// afterwards whatever the caller does with the report.
    pub fn flush_and_clear(&self, session_id: &str, agent: &str) -> Option<Report> {
        let session = self.get(session_id)?;
        let (content, reasoning_content) = session.reporter.take()?;
        Some(Report {
            session_id: session_id.to_string(),
            agent: agent.to_string(),
            content,
            reasoning_content,
            flushed_at: Utc::now(),
        })
    }

    pub fn record_outcome(&self, outcome: SessionOutcome) {
        let session = self.get_or_create(&outcome.session_id);
        *lock(&session.outcome) = Some(outcome);
    }

    pub fn outcome(&self, session_id: &str) -> Option<SessionOutcome> {
        self.get(session_id)
            .and_then(|s| lock(&s.outcome).clone())
    }

    /// Evict sessions idle for longer than the configured TTL.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    /// [`sweep`](Self::sweep) with an explicit clock.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        let ttl = self.idle_ttl;
        self.sessions.retain(|_, session| session.idle_for(now) <= ttl);
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            tracing::info!(evicted, remaining = self.sessions.len(), "idle sessions evicted");
        } else {
            tracing::debug!(remaining = self.sessions.len(), "idle sweep found nothing");
        }
        evicted
    }

    pub fn stats(&self) -> RegistryStats {
        let sessions: Vec<Arc<Session>> =
            self.sessions.iter().map(|e| Arc::clone(e.value())).collect();
        let queue_sizes: BTreeMap<String, usize> = sessions
            .iter()
            .map(|s| (s.session_id.clone(), s.queue.len()))
            .collect();
        let total_results: usize = queue_sizes.values().sum();
        let total_sessions = queue_sizes.len();
        let average_queue_size = if total_sessions == 0 {
            0.0
        } else {
            total_results as f64 / total_sessions as f64
        };
        RegistryStats {
            total_sessions,
            total_results,
            average_queue_size,
            queue_sizes,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Start the periodic idle sweep. Calling it again while running is a
    /// no-op.
    pub fn start(self: &Arc<Self>) {
        let mut slot = lock(&self.sweeper);
        if slot.is_some() {
            return;
        }
        *slot = Some(Sweeper::spawn(Arc::downgrade(self), self.sweep_interval));
        tracing::info!(
            interval_secs = self.sweep_interval.as_secs(),
            idle_ttl_secs = self.idle_ttl.as_secs(),
            "session sweeper started"
        );
    }

    /// Stop the sweep task and wait for it to exit.
    pub async fn stop(&self) {
        let sweeper = lock(&self.sweeper).take();
        if let Some(sweeper) = sweeper {
            sweeper.stop().await;
            tracing::info!("session sweeper stopped");
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(&SessionConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::PipelineState;

    fn result(session_id: &str, call_id: &str) -> ToolResult {
        ToolResult {
            session_id: session_id.into(),
            tool_call_id: call_id.into(),
            agent: Some("researcher".into()),
            result_id: None,
            role: Some("tool".into()),
            content: Some("{}".into()),
            received_at: Utc::now(),
        }
    }

    fn registry_with_ttl(idle_ttl: Duration) -> SessionRegistry {
        SessionRegistry::new(&SessionConfig {
            idle_ttl,
            ..SessionConfig::default()
        })
    }

    #[test]
    fn unknown_session_reads_are_empty() {
        let registry = SessionRegistry::default();
        assert_eq!(registry.size("nope"), 0);
        assert!(!registry.exists("nope"));
        assert!(registry.dequeue_one("nope").is_none());
        assert!(registry.peek_all("nope").is_empty());
        assert!(registry.outcome("nope").is_none());
    }

    #[test]
    fn consumer_touch_creates_session() {
        let registry = SessionRegistry::default();
        assert!(registry.dequeue_one("s1").is_none());
        assert!(registry.exists("s1"));
        assert_eq!(registry.size("s1"), 0);
    }

    #[test]
    fn enqueue_then_dequeue_in_fifo_order() {
        let registry = SessionRegistry::default();
        registry.enqueue("s1", result("s1", "a"));
        registry.enqueue("s1", result("s1", "b"));
        registry.enqueue("s1", result("s1", "c"));
        assert_eq!(registry.size("s1"), 3);

        let peeked: Vec<_> = registry
            .peek_all("s1")
            .into_iter()
            .map(|r| r.tool_call_id)
            .collect();
        assert_eq!(peeked, ["a", "b", "c"]);
        assert_eq!(registry.size("s1"), 3);

        assert_eq!(registry.dequeue_one("s1").unwrap().tool_call_id, "a");
        assert_eq!(registry.dequeue_one("s1").unwrap().tool_call_id, "b");
        assert_eq!(registry.dequeue_one("s1").unwrap().tool_call_id, "c");
        assert!(registry.dequeue_one("s1").is_none());
    }

    #[test]
    fn sessions_are_isolated() {
        let registry = SessionRegistry::default();
        registry.enqueue("s1", result("s1", "a"));
        registry.enqueue("s2", result("s2", "b"));
        assert_eq!(registry.dequeue_one("s2").unwrap().tool_call_id, "b");
        assert_eq!(registry.size("s1"), 1);
        assert!(registry.dequeue_one("s2").is_none());
    }

    #[test]
    fn clear_removes_session_and_reports_count() {
        let registry = SessionRegistry::default();
        registry.enqueue("s1", result("s1", "a"));
        registry.enqueue("s1", result("s1", "b"));
        assert_eq!(registry.clear("s1"), 2);
        assert!(!registry.exists("s1"));
        assert_eq!(registry.clear("s1"), 0);
    }

    #[test]
    fn reporter_flush_produces_single_report() {
        let registry = SessionRegistry::default();
        registry.append_reporter("s1", Some("Hello"), None);
        registry.append_reporter("s1", Some(" world"), Some("thinking"));

        let report = registry.flush_and_clear("s1", "reporter").unwrap();
        assert_eq!(report.session_id, "s1");
        assert_eq!(report.agent, "reporter");
        assert_eq!(report.content, "Hello world");
        assert_eq!(report.reasoning_content, "thinking");

        assert!(registry.flush_and_clear("s1", "reporter").is_none());
    }

    #[test]
    fn flush_on_unknown_session_does_not_create_it() {
        let registry = SessionRegistry::default();
        assert!(registry.flush_and_clear("ghost", "reporter").is_none());
        assert!(!registry.exists("ghost"));
    }

    #[test]
    fn sweep_evicts_only_idle_sessions() {
        let registry = registry_with_ttl(Duration::from_secs(3600));
        registry.enqueue("old", result("old", "a"));
        registry.enqueue("fresh", result("fresh", "b"));

        registry
            .get_or_create("old")
            .touch_at(Utc::now() - chrono::Duration::seconds(7200));

        assert_eq!(registry.sweep(), 1);
        assert!(!registry.exists("old"));
        assert!(registry.exists("fresh"));
    }

    #[test]
    fn sweep_at_uses_supplied_clock() {
        let registry = registry_with_ttl(Duration::from_secs(60));
        registry.enqueue("s1", result("s1", "a"));
        assert_eq!(registry.sweep_at(Utc::now()), 0);
        assert_eq!(
            registry.sweep_at(Utc::now() + chrono::Duration::seconds(120)),
            1
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn access_refreshes_idle_clock() {
        let registry = registry_with_ttl(Duration::from_secs(3600));
        let session = registry.get_or_create("s1");
        session.touch_at(Utc::now() - chrono::Duration::seconds(7200));
        registry.peek_all("s1");
        assert_eq!(registry.sweep(), 0);
        assert!(registry.exists("s1"));
    }

    #[test]
    fn stats_report_sizes_and_average() {
        let registry = SessionRegistry::default();
        registry.enqueue("s1", result("s1", "a"));
        registry.enqueue("s1", result("s1", "b"));
        registry.enqueue("s2", result("s2", "c"));
        registry.get_or_create("s3");

        let stats = registry.stats();
        assert_eq!(stats.total_sessions, 3);
        assert_eq!(stats.total_results, 3);
        assert!((stats.average_queue_size - 1.0).abs() < f64::EPSILON);
        assert_eq!(stats.queue_sizes["s1"], 2);
        assert_eq!(stats.queue_sizes["s3"], 0);
    }

    #[test]
    fn empty_stats() {
        let stats = SessionRegistry::default().stats();
        assert_eq!(stats.total_sessions, 0);
        assert_eq!(stats.average_queue_size, 0.0);
    }

    #[test]
    fn outcome_is_latest_recorded() {
        let registry = SessionRegistry::default();
        let mut outcome = SessionOutcome {
            session_id: "s1".into(),
            subscription_id: "sub".into(),
            state: PipelineState::Subscribed,
            success: None,
            message: "processing".into(),
            results_count: 0,
            tool_calls_count: 0,
            reports_flushed: 0,
            elapsed_ms: 0,
            recorded_at: Utc::now(),
        };
        registry.record_outcome(outcome.clone());
        outcome.state = PipelineState::Completed;
        outcome.success = Some(true);
        registry.record_outcome(outcome);
        assert_eq!(
            registry.outcome("s1").unwrap().state,
            PipelineState::Completed
        );
    }

    #[test]
    fn concurrent_producers_and_consumer_lose_nothing() {
        let registry = Arc::new(SessionRegistry::default());
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        registry.enqueue("shared", result("shared", &format!("p{p}-{i}")));
                    }
                })
            })
            .collect();

        let consumer = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                let mut seen = Vec::new();
                while seen.len() < 1000 {
                    match registry.dequeue_one("shared") {
                        Some(r) => seen.push(r.tool_call_id),
                        None => std::thread::yield_now(),
                    }
                }
                seen
            })
        };

        for p in producers {
            p.join().unwrap();
        }
        let seen = consumer.join().unwrap();

        let mut unique = seen.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 1000);

        // Per-producer order survives interleaving.
        for p in 0..4 {
            let prefix = format!("p{p}-");
            let order: Vec<usize> = seen
                .iter()
                .filter_map(|id| id.strip_prefix(&prefix))
                .map(|n| n.parse().unwrap())
                .collect();
            assert!(order.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn concurrent_first_touch_creates_one_session() {
        let registry = Arc::new(SessionRegistry::default());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    registry.enqueue("race", result("race", &format!("c{i}")));
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.size("race"), 16);
    }

    #[tokio::test]
    async fn sweeper_evicts_in_background_and_stops() {
        let registry = Arc::new(SessionRegistry::new(&SessionConfig {
            idle_ttl: Duration::from_secs(60),
            sweep_interval: Duration::from_millis(20),
            shards: None,
        }));
        registry
            .get_or_create("stale")
            .touch_at(Utc::now() - chrono::Duration::seconds(600));
        registry.start();
        registry.start();

        let mut evicted = false;
        for _ in 0..100 {
            if !registry.exists("stale") {
                evicted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(evicted, "sweeper never evicted the stale session");

        registry.stop().await;
        registry
            .get_or_create("stale-after-stop")
            .touch_at(Utc::now() - chrono::Duration::seconds(600));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(registry.exists("stale-after-stop"));
    }
}
