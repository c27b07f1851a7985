// Copyright 2026 The Streamtap Project
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::time::Duration;

use sha2::{Digest, Sha256};

use super::error::ConfigError;
use super::interpolation::resolve_variables;
use super::raw;
use super::source::ConfigSource;
use super::types::*;

/// Load and validate a streamtap config from the given source.
///
/// Steps:
/// 1. Read raw YAML text and hash it
/// 2. Parse into raw deserialization types
/// 3. Check the version marker
/// 4. Resolve `${VAR}` in string fields and fill defaults
/// 5. Validate ranges and cross-field rules
pub fn load_config(source: &dyn ConfigSource) -> Result<Config, ConfigError> {
    let raw_yaml = source.load()?;
    let config_hash = compute_hash(&raw_yaml);

    let raw: raw::RawConfig = serde_yaml::from_str(&raw_yaml)?;

    if raw.streamtap != "v1" {
        return Err(ConfigError::Validation(format!(
            "unsupported config version \"{}\", expected \"v1\"",
            raw.streamtap
        )));
    }

    let upstream = build_upstream_config(raw.upstream)?;
    let sessions = build_session_config(raw.sessions)?;
    let pipeline = build_pipeline_config(raw.pipeline)?;
    let store = build_store_config(raw.store)?;
    let environment = match raw.environment {
        Some(env) => resolve_variables(&env)?,
        None => String::new(),
    };

    Ok(Config {
        upstream,
        sessions,
        pipeline,
        store,
        environment,
        config_hash,
    })
}

/// SHA-256 over the exact YAML text, rendered as `sha256:<hex>`.
pub fn compute_hash(raw_yaml: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_yaml.as_bytes());
    format!("sha256:{:x}", hasher.finalize())
}

fn build_upstream_config(
    raw: Option<raw::RawUpstreamConfig>,
) -> Result<UpstreamConfig, ConfigError> {
    let defaults = UpstreamConfig::default();
    let Some(raw) = raw else {
        return Ok(defaults);
    };

    let base_url = match raw.base_url {
        Some(url) => resolve_variables(&url)?,
        None => defaults.base_url,
    };
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(ConfigError::Validation(format!(
            "upstream.base_url must be an http(s) URL, got \"{base_url}\""
        )));
    }

    let stream_path = match raw.stream_path {
        Some(path) => resolve_variables(&path)?,
        None => defaults.stream_path,
    };
    if !stream_path.starts_with('/') {
        return Err(ConfigError::Validation(format!(
            "upstream.stream_path must start with '/', got \"{stream_path}\""
        )));
    }

    let timeout_secs = raw.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "upstream.timeout_secs must be greater than 0".into(),
        ));
    }

    let max_line_bytes = raw.max_line_bytes.unwrap_or(defaults.max_line_bytes);
    if max_line_bytes == 0 {
        return Err(ConfigError::Validation(
            "upstream.max_line_bytes must be greater than 0".into(),
        ));
    }

    Ok(UpstreamConfig {
        base_url,
        stream_path,
        timeout: Duration::from_secs(timeout_secs),
        max_line_bytes,
    })
}

fn build_session_config(raw: Option<raw::RawSessionConfig>) -> Result<SessionConfig, ConfigError> {
    let Some(raw) = raw else {
        return Ok(SessionConfig::default());
    };

    let idle_ttl_secs = raw.idle_ttl_secs.unwrap_or(DEFAULT_IDLE_TTL_SECS);
    let sweep_interval_secs = raw.sweep_interval_secs.unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS);
    if sweep_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "sessions.sweep_interval_secs must be greater than 0".into(),
        ));
    }

    // DashMap panics on shard counts that are not a power of two above 1.
    if let Some(shards) = raw.shards {
        if shards < 2 || !shards.is_power_of_two() {
            return Err(ConfigError::Validation(format!(
                "sessions.shards must be a power of two >= 2, got {shards}"
            )));
        }
    }

    Ok(SessionConfig {
        idle_ttl: Duration::from_secs(idle_ttl_secs),
        sweep_interval: Duration::from_secs(sweep_interval_secs),
        shards: raw.shards,
    })
}

fn build_pipeline_config(
    raw: Option<raw::RawPipelineConfig>,
) -> Result<PipelineConfig, ConfigError> {
    let defaults = PipelineConfig::default();
    let Some(raw) = raw else {
        return Ok(defaults);
    };

    let reporter_agent = raw.reporter_agent.unwrap_or(defaults.reporter_agent);
    if reporter_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "pipeline.reporter_agent must not be blank".into(),
        ));
    }

    let workers = raw.workers.unwrap_or(defaults.workers);
    if workers == 0 {
        return Err(ConfigError::Validation(
            "pipeline.workers must be greater than 0".into(),
        ));
    }

    let channel_capacity = raw.channel_capacity.unwrap_or(defaults.channel_capacity);
    if channel_capacity == 0 {
        return Err(ConfigError::Validation(
            "pipeline.channel_capacity must be greater than 0".into(),
        ));
    }

    Ok(PipelineConfig {
        reporter_agent,
        workers,
        channel_capacity,
    })
}

fn build_store_config(raw: Option<raw::RawStoreConfig>) -> Result<StoreConfig, ConfigError> {
    let Some(raw) = raw else {
        return Ok(StoreConfig::None);
    };

    match raw.kind.as_deref().unwrap_or("none") {
        "none" => Ok(StoreConfig::None),
        "memory" => Ok(StoreConfig::Memory),
        "jsonl" => {
            let path = raw.path.ok_or_else(|| {
                ConfigError::Validation("store.path is required when store.kind is jsonl".into())
            })?;
            let path = resolve_variables(&path)?;
            if path.trim().is_empty() {
                return Err(ConfigError::Validation("store.path must not be blank".into()));
            }
            Ok(StoreConfig::Jsonl {
                path: PathBuf::from(path),
            })
        }
        other => Err(ConfigError::Validation(format!(
            "unknown store.kind \"{other}\": expected one of: none, memory, jsonl"
        ))),
    }
}
