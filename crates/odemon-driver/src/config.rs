//! Driver configuration
//!
//! The caller supplies the tool executable and launch arguments; timeouts and
//! the tool's ready/quit strings have sensible defaults. All durations are in
//! milliseconds; a zero timeout means "no time bound".

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use odemon_core::prelude::*;

use crate::classify::DEFAULT_READY_MARKER;

/// Configuration for one [`ProcessDriver`](crate::driver::ProcessDriver).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct DriverConfig {
    /// Tool executable: an absolute path or a bare name resolved via PATH
    pub program: String,

    /// Fixed launch arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Exact output line that marks the tool as ready for commands
    #[serde(default = "default_ready_marker")]
    pub ready_marker: String,

    /// Command written to the tool's stdin to request a graceful exit
    #[serde(default = "default_quit_command")]
    pub quit_command: String,

    /// Bound on `start()`'s readiness wait (0 = unbounded)
    #[serde(default = "default_lifecycle_timeout_ms")]
    pub start_timeout_ms: u64,

    /// Bound on `stop()`'s graceful-exit wait (0 = unbounded)
    #[serde(default = "default_lifecycle_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Grace period after a forced kill to confirm the exit
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
}

fn default_ready_marker() -> String {
    DEFAULT_READY_MARKER.to_string()
}

fn default_quit_command() -> String {
    "quit".to_string()
}

fn default_lifecycle_timeout_ms() -> u64 {
    60_000
}

fn default_kill_grace_ms() -> u64 {
    2_000
}

impl DriverConfig {
    /// Config for `program` with default markers and timeouts.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            ready_marker: default_ready_marker(),
            quit_command: default_quit_command(),
            start_timeout_ms: default_lifecycle_timeout_ms(),
            stop_timeout_ms: default_lifecycle_timeout_ms(),
            kill_grace_ms: default_kill_grace_ms(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_ready_marker(mut self, marker: impl Into<String>) -> Self {
        self.ready_marker = marker.into();
        self
    }

    pub fn with_quit_command(mut self, command: impl Into<String>) -> Self {
        self.quit_command = command.into();
        self
    }

    /// Parse a TOML document into a config.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).map_err(|e| Error::config(e.to_string()))
    }

    /// Load a config from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let input = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&input)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    /// Resolve the executable: explicit paths are checked for existence, bare
    /// names are looked up on PATH.
    pub fn resolve_program(&self) -> Result<PathBuf> {
        let path = Path::new(&self.program);
        if path.components().count() > 1 {
            if path.exists() {
                Ok(path.to_path_buf())
            } else {
                Err(Error::tool_not_found(&self.program))
            }
        } else {
            which::which(&self.program).map_err(|_| Error::tool_not_found(&self.program))
        }
    }
}
