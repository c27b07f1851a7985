// Copyright 2026 The Streamtap Project
// SPDX-License-Identifier: Apache-2.0

// Stream ingestion
//
// Responsibilities:
// - Tee an upstream SSE/JSON-lines stream to the caller without altering it
// - Split lines and decode records, skipping anything malformed
// - Classify records into tool results, tool-call declarations, reporter
//   fragments and terminators
// - Route events into the session registry, the name index and the store
// - Bound each subscription by a deadline and surface failures in-band

mod classifier;
mod pipeline;
mod types;

pub use classifier::{parse_record, AgentEventClassifier, EventClassifier, DATA_PREFIX};
pub use pipeline::{PipelineDeps, PipelineSettings, StreamPipeline, StreamTap, Subscription};
pub use types::{
    Event, PipelineState, Record, ReporterFragment, SessionOutcome, StreamError,
    ToolCallDeclaration, ToolResult, ToolResultFact,
};

pub(crate) use classifier::text_field;
