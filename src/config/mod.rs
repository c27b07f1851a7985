// Copyright 2026 The Streamtap Project
// SPDX-License-Identifier: Apache-2.0

// Config loading: YAML source -> raw types -> interpolated, validated Config.

mod error;
mod interpolation;
mod loader;
mod raw;
mod source;
mod types;

pub use error::ConfigError;
pub use loader::{compute_hash, load_config};
pub use source::{ConfigSource, FileSource, StringSource};
pub use types::*;
