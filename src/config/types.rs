// Copyright 2026 The Streamtap Project
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:48558";
pub const DEFAULT_STREAM_PATH: &str = "/api/chat/stream";
pub const DEFAULT_TIMEOUT_SECS: u64 = 180;
pub const DEFAULT_MAX_LINE_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_IDLE_TTL_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60 * 60;
pub const DEFAULT_REPORTER_AGENT: &str = "reporter";
pub const DEFAULT_WORKERS: usize = 8;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Fully validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub upstream: UpstreamConfig,
    pub sessions: SessionConfig,
    pub pipeline: PipelineConfig,
    pub store: StoreConfig,
    pub environment: String,
    /// `sha256:<hex>` over the raw YAML text.
    pub config_hash: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub stream_path: String,
    /// Ceiling on the whole subscription, open included.
    pub timeout: Duration,
    pub max_line_bytes: usize,
}

impl UpstreamConfig {
    pub fn stream_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.stream_path.trim_start_matches('/')
        )
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            stream_path: DEFAULT_STREAM_PATH.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub idle_ttl: Duration,
    pub sweep_interval: Duration,
    /// DashMap shard count. `None` keeps the DashMap default.
    pub shards: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_ttl: Duration::from_secs(DEFAULT_IDLE_TTL_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            shards: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub reporter_agent: String,
    /// Upper bound on analytic routing running at once, across all sessions.
    pub workers: usize,
    pub channel_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            reporter_agent: DEFAULT_REPORTER_AGENT.to_string(),
            workers: DEFAULT_WORKERS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StoreConfig {
    #[default]
    None,
    Memory,
    Jsonl {
        path: PathBuf,
    },
}
