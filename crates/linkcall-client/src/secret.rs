//! Secret references in configuration values.
//!
//! The bearer token in `config.toml` may point elsewhere instead of holding
//! the secret inline:
//!
//! - `pass::entry/name`: first line of `pass show entry/name`
//! - `env::VAR_NAME`: the value of `$VAR_NAME`
//!
//! Any other value is the secret itself.

use std::process::Command;

use thiserror::Error;

const PASS_PREFIX: &str = "pass::";
const ENV_PREFIX: &str = "env::";

/// A secret reference that could not be resolved.
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("environment variable `{0}` is not set")]
    MissingVar(String),

    #[error("failed to run `pass show {entry}`: {source}")]
    PassSpawn {
        entry: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`pass show {entry}` failed: {stderr}")]
    PassFailed { entry: String, stderr: String },

    #[error("`pass show {0}` printed nothing")]
    Empty(String),
}

/// True if `value` is a `pass::` or `env::` reference.
pub fn is_reference(value: &str) -> bool {
    value.starts_with(PASS_PREFIX) || value.starts_with(ENV_PREFIX)
}

/// Resolves `value`, following a `pass::` or `env::` reference.
pub fn resolve(value: &str) -> Result<String, SecretError> {
    if let Some(entry) = value.strip_prefix(PASS_PREFIX) {
        from_pass(entry)
    } else if let Some(var) = value.strip_prefix(ENV_PREFIX) {
        std::env::var(var).map_err(|_| SecretError::MissingVar(var.to_string()))
    } else {
        Ok(value.to_string())
    }
}

fn from_pass(entry: &str) -> Result<String, SecretError> {
    let output = Command::new("pass")
        .args(["show", entry])
        .output()
        .map_err(|source| SecretError::PassSpawn {
            entry: entry.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(SecretError::PassFailed {
            entry: entry.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .ok_or_else(|| SecretError::Empty(entry.to_string()))
}
