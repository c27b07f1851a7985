// Copyright 2026 The Streamtap Project
// SPDX-License-Identifier: Apache-2.0

// Raw YAML shapes. Everything is optional so that a file containing only
// `streamtap: v1` is valid; defaults and validation live in the loader.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct RawConfig {
    pub streamtap: String,
    pub upstream: Option<RawUpstreamConfig>,
    pub sessions: Option<RawSessionConfig>,
    pub pipeline: Option<RawPipelineConfig>,
    pub store: Option<RawStoreConfig>,
    pub environment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawUpstreamConfig {
    pub base_url: Option<String>,
    pub stream_path: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_line_bytes: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct RawSessionConfig {
    pub idle_ttl_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
    pub shards: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct RawPipelineConfig {
    pub reporter_agent: Option<String>,
    pub workers: Option<usize>,
    pub channel_capacity: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct RawStoreConfig {
    pub kind: Option<String>,
    pub path: Option<String>,
}
