// Copyright 2026 The Streamtap Project
// SPDX-License-Identifier: Apache-2.0

use regex::{Captures, Regex};

use super::error::ConfigError;

/// Expand `${NAME}` references from the process environment.
///
/// Names follow shell rules (`[A-Za-z_][A-Za-z0-9_]*`). Anything else that
/// merely looks like `${...}` is left untouched. An unset variable is a load
/// error rather than an empty string.
pub fn resolve_variables(input: &str) -> Result<String, ConfigError> {
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let pattern = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| ConfigError::Validation(format!("interpolation pattern: {e}")))?;

    let mut missing: Option<String> = None;
    let expanded = pattern.replace_all(input, |caps: &Captures<'_>| {
        let name = &caps[1];
        match std::env::var(name) {
            Ok(value) => value,
            Err(_) => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(ConfigError::UndefinedVariable { name }),
        None => Ok(expanded.into_owned()),
    }
}
