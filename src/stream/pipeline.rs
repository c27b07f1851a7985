// Copyright 2026 The Streamtap Project
// SPDX-License-Identifier: Apache-2.0

// Subscription pipeline
//
// One upstream stream is tee'd: bytes go to the caller untouched and, in
// parallel, to an analytic worker that splits lines, classifies records and
// routes events into the session registry, the name index and the store.
//
//   Subscribed -> Streaming -> Completed | Failed
//
// Leaving the pipeline in either terminal state flushes the reporter
// buffers exactly once.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

use super::classifier::{parse_record, AgentEventClassifier, EventClassifier};
use super::types::{Event, PipelineState, SessionOutcome, StreamError};
use crate::config::{self, Config};
use crate::names::CallNameIndex;
use crate::session::{Report, SessionRegistry};
use crate::store::ResultStore;
use crate::upstream::{ByteStream, UpstreamError};

// ---------------------------------------------------------------------------
// Dependencies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub reporter_agent: String,
    /// Ceiling on a whole subscription, upstream open included.
    pub timeout: Duration,
    pub max_line_bytes: usize,
    pub channel_capacity: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            reporter_agent: config.pipeline.reporter_agent.clone(),
            timeout: config.upstream.timeout,
            max_line_bytes: config.upstream.max_line_bytes,
            channel_capacity: config.pipeline.channel_capacity,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            reporter_agent: config::DEFAULT_REPORTER_AGENT.to_string(),
            timeout: Duration::from_secs(config::DEFAULT_TIMEOUT_SECS),
            max_line_bytes: config::DEFAULT_MAX_LINE_BYTES,
            channel_capacity: config::DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Shared collaborators for every subscription.
#[derive(Clone)]
pub struct PipelineDeps {
    pub registry: Arc<SessionRegistry>,
    pub names: Arc<CallNameIndex>,
    pub store: Arc<dyn ResultStore>,
    pub classifier: Arc<dyn EventClassifier>,
    /// Bounds how many sessions are being routed at the same moment.
    pub workers: Arc<Semaphore>,
    pub settings: Arc<PipelineSettings>,
}

impl PipelineDeps {
    pub fn new(
        registry: Arc<SessionRegistry>,
        names: Arc<CallNameIndex>,
        store: Arc<dyn ResultStore>,
        config: &Config,
    ) -> Self {
        Self {
            registry,
            names,
            store,
            classifier: Arc::new(AgentEventClassifier::new(
                config.pipeline.reporter_agent.clone(),
            )),
            workers: Arc::new(Semaphore::new(config.pipeline.workers)),
            settings: Arc::new(PipelineSettings::from_config(config)),
        }
    }
}

// ---------------------------------------------------------------------------
// Line splitting
// ---------------------------------------------------------------------------

/// Reassembles `\n`-terminated lines across chunk boundaries.
///
/// A line growing past `max_line_bytes` is dropped whole: everything up to
/// its terminating newline is discarded.
struct LineBuffer {
    pending: Vec<u8>,
    max_line_bytes: usize,
    discarding: bool,
}

impl LineBuffer {
    fn new(max_line_bytes: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_line_bytes,
            discarding: false,
        }
    }

    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let head = &rest[..pos];
            rest = &rest[pos + 1..];

            if self.discarding {
                self.discarding = false;
                self.pending.clear();
                continue;
            }
            if self.pending.len() + head.len() > self.max_line_bytes {
                tracing::warn!(limit = self.max_line_bytes, "oversized line dropped");
                self.pending.clear();
                continue;
            }
            self.pending.extend_from_slice(head);
            lines.push(decode_line(&self.pending));
            self.pending.clear();
        }

        if !self.discarding {
            if self.pending.len() + rest.len() > self.max_line_bytes {
                tracing::warn!(limit = self.max_line_bytes, "oversized line dropped");
                self.pending.clear();
                self.discarding = true;
            } else {
                self.pending.extend_from_slice(rest);
            }
        }
        lines
    }

    /// Unterminated trailing line, if any.
    fn finish(&mut self) -> Option<String> {
        if self.discarding || self.pending.is_empty() {
            self.pending.clear();
            self.discarding = false;
            return None;
        }
        let line = decode_line(&self.pending);
        self.pending.clear();
        Some(line)
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

// ---------------------------------------------------------------------------
// StreamPipeline: synchronous routing core
// ---------------------------------------------------------------------------

/// Routing state for one subscription.
///
/// Everything here is synchronous; [`StreamTap`] drives it from an async
/// worker. Tests may drive it directly line by line.
pub struct StreamPipeline {
    deps: PipelineDeps,
    session_id: String,
    subscription_id: String,
    state: PipelineState,
    lines: LineBuffer,
    results_count: usize,
    tool_calls_count: usize,
    reports_flushed: usize,
    started: std::time::Instant,
    outcome: Option<SessionOutcome>,
}

impl StreamPipeline {
    /// Register the subscription and record its "started" outcome.
    pub fn subscribe(deps: PipelineDeps, session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        deps.registry.get_or_create(&session_id);

        let max_line_bytes = deps.settings.max_line_bytes;
        let pipeline = Self {
            deps,
            session_id,
            subscription_id: Uuid::new_v4().to_string(),
            state: PipelineState::Subscribed,
            lines: LineBuffer::new(max_line_bytes),
            results_count: 0,
            tool_calls_count: 0,
            reports_flushed: 0,
            started: std::time::Instant::now(),
            outcome: None,
        };

        let started = pipeline.snapshot(None, "processing".to_string());
        pipeline.persist_outcome(&started);
        tracing::info!(
            session_id = %pipeline.session_id,
            subscription_id = %pipeline.subscription_id,
            "subscription started"
        );
        pipeline
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn results_count(&self) -> usize {
        self.results_count
    }

    pub fn tool_calls_count(&self) -> usize {
        self.tool_calls_count
    }

    /// Append raw upstream bytes and route every completed line.
    pub fn feed(&mut self, chunk: &[u8]) {
        if self.state.is_terminal() {
            return;
        }
        for line in self.lines.push(chunk) {
            self.handle_line(&line);
        }
    }

    /// Parse, classify and route a single line.
    pub fn handle_line(&mut self, line: &str) {
        if self.state.is_terminal() {
            return;
        }
        self.state = PipelineState::Streaming;

        let Some(record) = parse_record(line) else {
            return;
        };
        for event in self.deps.classifier.classify(&record) {
            self.route(event);
        }
    }

    fn route(&mut self, event: Event) {
        match event {
            Event::ToolResult(fact) => {
                if let Some(thread_id) = fact.thread_id.as_deref() {
                    if thread_id != self.session_id {
                        tracing::debug!(
                            session_id = %self.session_id,
                            record_thread_id = %thread_id,
                            "record thread id differs from session, using session"
                        );
                    }
                }
                let result = fact.bind(&self.session_id);
                self.deps.registry.enqueue(&self.session_id, result.clone());
                self.results_count += 1;
                tracing::info!(
                    session_id = %self.session_id,
                    tool_call_id = %result.tool_call_id,
                    agent = ?result.agent,
                    "tool result queued"
                );
                if let Err(e) = self.deps.store.save_tool_result(&result) {
                    tracing::warn!(
                        session_id = %self.session_id,
                        tool_call_id = %result.tool_call_id,
                        "failed to persist tool result: {e}"
                    );
                }
            }
            Event::ToolCallDeclaration(declaration) => {
                self.tool_calls_count += 1;
                if let Some(entry) = self.deps.names.write(&declaration) {
                    tracing::debug!(
                        session_id = %self.session_id,
                        tool_call_id = %entry.call_id,
                        name = %entry.name,
                        "tool call declared"
                    );
                    if let Err(e) = self.deps.store.save_tool_call_name(&entry) {
                        tracing::warn!(
                            tool_call_id = %entry.call_id,
                            "failed to persist tool call name: {e}"
                        );
                    }
                }
            }
            Event::ReporterFragment(fragment) => {
                self.deps.registry.append_reporter(
                    &self.session_id,
                    fragment.content.as_deref(),
                    fragment.reasoning_content.as_deref(),
                );
            }
            Event::Terminator => {
                self.flush_reporter();
            }
            Event::Unrecognized => {}
        }
    }

    /// Persist whatever the reporter buffers hold, then empty them.
    /// Returns `None` (and persists nothing) when both were empty.
    pub fn flush_reporter(&mut self) -> Option<Report> {
        let report = self
            .deps
            .registry
            .flush_and_clear(&self.session_id, &self.deps.settings.reporter_agent)?;
        self.reports_flushed += 1;
        tracing::info!(
            session_id = %self.session_id,
            content_len = report.content.len(),
            reasoning_len = report.reasoning_content.len(),
            "reporter output flushed"
        );
        if let Err(e) = self.deps.store.save_report(&report) {
            tracing::warn!(session_id = %self.session_id, "failed to persist report: {e}");
        }
        Some(report)
    }

    /// Upstream ended normally.
    pub fn complete(&mut self) -> SessionOutcome {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }
        if let Some(line) = self.lines.finish() {
            self.handle_line(&line);
        }
        self.flush_reporter();
        self.state = PipelineState::Completed;
        self.finish(Some(true), "processing successful".to_string())
    }

    /// Upstream errored or the ceiling elapsed.
    pub fn fail(&mut self, error: &StreamError) -> SessionOutcome {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }
        self.flush_reporter();
        self.state = PipelineState::Failed;
        self.finish(Some(false), format!("processing failed: {error}"))
    }

    fn finish(&mut self, success: Option<bool>, message: String) -> SessionOutcome {
        let outcome = self.snapshot(success, message);
        self.persist_outcome(&outcome);
        tracing::info!(
            session_id = %self.session_id,
            subscription_id = %self.subscription_id,
            state = ?outcome.state,
            results = outcome.results_count,
            tool_calls = outcome.tool_calls_count,
            elapsed_ms = outcome.elapsed_ms,
            "subscription finished"
        );
        self.outcome = Some(outcome.clone());
        outcome
    }

    fn snapshot(&self, success: Option<bool>, message: String) -> SessionOutcome {
        SessionOutcome {
            session_id: self.session_id.clone(),
            subscription_id: self.subscription_id.clone(),
            state: self.state,
            success,
            message,
            results_count: self.results_count,
            tool_calls_count: self.tool_calls_count,
            reports_flushed: self.reports_flushed,
            elapsed_ms: u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            recorded_at: Utc::now(),
        }
    }

    fn persist_outcome(&self, outcome: &SessionOutcome) {
        self.deps.registry.record_outcome(outcome.clone());
        if let Err(e) = self.deps.store.save_outcome(outcome) {
            tracing::warn!(session_id = %self.session_id, "failed to persist outcome: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// StreamTap: async tee driver
// ---------------------------------------------------------------------------

/// How long a failed subscription waits for the caller to take the error
/// record before giving up on it.
const ERROR_RECORD_GRACE: Duration = Duration::from_millis(250);

enum Feed {
    Chunk(Bytes),
    End(Result<(), StreamError>),
}

/// A running subscription.
pub struct Subscription {
    subscription_id: String,
    output: ReceiverStream<Bytes>,
    analytics: JoinHandle<SessionOutcome>,
}

impl Subscription {
    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    /// Caller-facing bytes plus a handle resolving to the final outcome.
    pub fn into_parts(self) -> (ReceiverStream<Bytes>, JoinHandle<SessionOutcome>) {
        (self.output, self.analytics)
    }

    /// Caller-facing bytes only. Analytics keeps running detached.
    pub fn into_stream(self) -> ReceiverStream<Bytes> {
        self.output
    }
}

pub struct StreamTap {
    deps: PipelineDeps,
}

impl StreamTap {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }

    pub fn deps(&self) -> &PipelineDeps {
        &self.deps
    }

    /// Subscribe `session_id` to the stream produced by `open`.
    ///
    /// The returned output carries the upstream bytes unchanged, followed by
    /// a single `data: {"error": ...}` record if the upstream fails or the
    /// ceiling elapses. The caller dropping the output does not stop
    /// analytics.
    pub fn subscribe<F>(&self, session_id: impl Into<String>, open: F) -> Subscription
    where
        F: Future<Output = Result<ByteStream, UpstreamError>> + Send + 'static,
    {
        let pipeline = StreamPipeline::subscribe(self.deps.clone(), session_id);
        let subscription_id = pipeline.subscription_id().to_string();
        let session_id = pipeline.session_id().to_string();

        let capacity = self.deps.settings.channel_capacity.max(1);
        let (client_tx, client_rx) = mpsc::channel::<Bytes>(capacity);
        let (work_tx, work_rx) = mpsc::channel::<Feed>(capacity);

        tokio::spawn(pump(
            open,
            client_tx,
            work_tx,
            self.deps.settings.timeout,
            session_id,
            subscription_id.clone(),
        ));
        let analytics = tokio::spawn(analyze(pipeline, work_rx, self.deps.workers.clone()));

        Subscription {
            subscription_id,
            output: ReceiverStream::new(client_rx),
            analytics,
        }
    }
}

/// Reads upstream until it ends, errors or the deadline passes, forwarding
/// every chunk to the analytic worker and then to the caller.
async fn pump<F>(
    open: F,
    client: mpsc::Sender<Bytes>,
    work: mpsc::Sender<Feed>,
    timeout: Duration,
    session_id: String,
    subscription_id: String,
) where
    F: Future<Output = Result<ByteStream, UpstreamError>> + Send + 'static,
{
    let deadline = Instant::now() + timeout;
    let timed_out = || StreamError::Timeout {
        millis: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
    };
    let mut client_open = true;
    let mut work_open = true;

    let end = match tokio::time::timeout_at(deadline, open).await {
        Err(_) => Err(timed_out()),
        Ok(Err(e)) => Err(StreamError::Upstream(e.to_string())),
        Ok(Ok(mut input)) => loop {
            let chunk = match tokio::time::timeout_at(deadline, input.next()).await {
                Err(_) => break Err(timed_out()),
                Ok(None) => break Ok(()),
                Ok(Some(Err(e))) => break Err(StreamError::Upstream(e.to_string())),
                Ok(Some(Ok(chunk))) => chunk,
            };

            if work_open && work.send(Feed::Chunk(chunk.clone())).await.is_err() {
                work_open = false;
                tracing::warn!(
                    session_id = %session_id,
                    subscription_id = %subscription_id,
                    "analytic worker stopped early"
                );
            }
            if client_open {
                match tokio::time::timeout_at(deadline, client.send(chunk)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => {
                        client_open = false;
                        tracing::info!(
                            session_id = %session_id,
                            subscription_id = %subscription_id,
                            "client disconnected, analytics continues"
                        );
                    }
                    Err(_) => break Err(timed_out()),
                }
            }
            if !client_open && !work_open {
                break Ok(());
            }
        },
    };

    let record = match &end {
        Ok(()) => None,
        Err(err) => {
            tracing::warn!(
                session_id = %session_id,
                subscription_id = %subscription_id,
                "stream failed: {err}"
            );
            Some(error_record(err))
        }
    };

    // Analytics first; a stalled caller must not hold back the terminal transition.
    if work_open {
        let _ = work.send(Feed::End(end)).await;
    }
    if let (Some(record), true) = (record, client_open) {
        if tokio::time::timeout(ERROR_RECORD_GRACE, client.send(record))
            .await
            .is_err()
        {
            tracing::debug!(
                session_id = %session_id,
                subscription_id = %subscription_id,
                "caller not reading, error record dropped"
            );
        }
    }
}

/// Routes everything the pump forwards. Holds a worker permit only while
/// routing, never while waiting for input.
async fn analyze(
    pipeline: StreamPipeline,
    mut work: mpsc::Receiver<Feed>,
    workers: Arc<Semaphore>,
) -> SessionOutcome {
    let pipeline = Arc::new(Mutex::new(pipeline));
    while let Some(feed) = work.recv().await {
        let Ok(_permit) = workers.acquire().await else {
            break;
        };
        // Routing reaches the store, which may block on file I/O.
        let step = Arc::clone(&pipeline);
        let routed = tokio::task::spawn_blocking(move || {
            let mut pipeline = lock(&step);
            match feed {
                Feed::Chunk(bytes) => {
                    pipeline.feed(&bytes);
                    None
                }
                Feed::End(Ok(())) => Some(pipeline.complete()),
                Feed::End(Err(err)) => Some(pipeline.fail(&err)),
            }
        })
        .await;
        match routed {
            Ok(Some(outcome)) => return outcome,
            Ok(None) => {}
            Err(e) => {
                tracing::error!("analytic routing task failed: {e}");
                break;
            }
        }
    }
    let outcome = lock(&pipeline).fail(&StreamError::Abandoned);
    outcome
}

fn lock(pipeline: &Mutex<StreamPipeline>) -> MutexGuard<'_, StreamPipeline> {
    pipeline.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The in-band failure record: `data: {"error":"..."}` and a blank line.
fn error_record(err: &StreamError) -> Bytes {
    let payload = serde_json::json!({ "error": err.to_string() });
    Bytes::from(format!("data: {payload}\n\n"))
}
