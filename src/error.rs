//! Error categories that callers need to tell apart.
//!
//! Most functions in this crate return `anyhow::Result` and attach context as
//! errors bubble up. The variants here are raised inside that chain so the
//! CLI and the orchestrator can recover them with `downcast_ref`.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RebuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The source download ran but left no matching file behind.
    #[error("source package for '{nvr}' not found in '{}' after download", .cache_dir.display())]
    SourceNotFound { nvr: String, cache_dir: PathBuf },

    #[error("dependency cycle detected: {}", .chain.join(" -> "))]
    CycleDetected { chain: Vec<String> },

    #[error("this command must be run as root (effective uid {euid})")]
    PrivilegeRequired { euid: u32 },

    #[error("'{command}' failed with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
}

/// One override value that did not fit the declared type of its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidKey {
    pub section: String,
    pub key: String,
    pub value: String,
    pub expected: &'static str,
}

impl fmt::Display for InvalidKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} = '{}' (expected {})",
            self.section, self.key, self.value, self.expected
        )
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration in '{}':\n  {}", .path.display(), join_invalid(.keys))]
    Invalid { path: PathBuf, keys: Vec<InvalidKey> },

    #[error("malformed line {line} in '{}': {text}", .path.display())]
    Syntax {
        path: PathBuf,
        line: usize,
        text: String,
    },
}

fn join_invalid(keys: &[InvalidKey]) -> String {
    keys.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n  ")
}
