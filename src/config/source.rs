// Copyright 2026 The Streamtap Project
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use super::error::ConfigError;

/// Where the YAML text comes from.
pub trait ConfigSource {
    fn load(&self) -> Result<String, ConfigError>;
}

/// Reads `streamtap.yaml` (or whatever `--config` names) from disk.
pub struct FileSource {
    pub path: PathBuf,
}

impl ConfigSource for FileSource {
    fn load(&self) -> Result<String, ConfigError> {
        let text = std::fs::read_to_string(&self.path)?;
        tracing::debug!(path = %self.path.display(), bytes = text.len(), "config file read");
        Ok(text)
    }
}

/// Inline YAML. Tests and embedders use it to skip the filesystem.
pub struct StringSource {
    pub content: String,
}

impl StringSource {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

impl ConfigSource for StringSource {
    fn load(&self) -> Result<String, ConfigError> {
        Ok(self.content.clone())
    }
}
