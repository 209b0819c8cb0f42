//! Error taxonomy.
//!
//! Stage-level errors ([`BuildError`], [`ExecutionError`], [`ToolError`]) are
//! captured into an evaluation run and never abort the process.
//! [`GenerationError`] is captured the same way when tests are generated as
//! part of a run. [`ConfigError`] is fatal and surfaces before any stage runs.

use crate::language::Language;
use crate::tools::TestCounts;
use std::path::PathBuf;
use thiserror::Error;

/// Missing or invalid configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read configuration from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration from {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Failure to obtain usable test source from the LLM.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("LLM endpoint unreachable after {attempts} attempt(s): {message}")]
    Unreachable { attempts: u32, message: String },

    #[error("LLM request rejected: {0}")]
    Rejected(String),

    #[error("LLM returned empty output")]
    EmptyOutput,

    #[error("LLM output is not a usable {language} test: {reason}")]
    MalformedOutput { language: Language, reason: String },

    #[error("no LLM client configured")]
    NoClient,
}

/// An external tool could not be run to completion, or its output could not
/// be understood.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to start `{program}` (is it installed and on PATH?): {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` timed out after {seconds}s")]
    Timeout {
        program: String,
        seconds: u64,
        output: String,
    },

    #[error("`{program}` was cancelled")]
    Cancelled { program: String, output: String },

    #[error("`{program}` exited with {}", exit_label(.code))]
    Failed {
        program: String,
        code: Option<i32>,
        output: String,
    },

    #[error("{tool} report not found: {detail}")]
    MissingReport { tool: &'static str, detail: String },

    #[error("could not parse {tool} output: {reason}")]
    Parse { tool: &'static str, reason: String },

    #[error("I/O error while running {tool}: {source}")]
    Io {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (killed by signal)".to_string(),
    }
}

impl ToolError {
    /// Output captured from the tool before it failed, if any.
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::Timeout { output, .. }
            | Self::Cancelled { output, .. }
            | Self::Failed { output, .. } => Some(output.as_str()),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Compile stage failure.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("test sources do not compile")]
    Compilation { output: String },

    #[error(transparent)]
    Tool(#[from] ToolError),
}

impl BuildError {
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::Compilation { output } => Some(output.as_str()),
            Self::Tool(e) => e.output(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Tool(e) if e.is_cancelled())
    }
}

/// Execute stage failure.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("{} of {} test(s) failed", .counts.unsuccessful(), .counts.total())]
    TestsFailed { counts: TestCounts, output: String },

    #[error("no tests were executed")]
    NoTests { output: String },

    #[error("test runner crashed before reporting results")]
    Crashed { output: String },

    #[error(transparent)]
    Tool(#[from] ToolError),
}

impl ExecutionError {
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::TestsFailed { output, .. }
            | Self::NoTests { output }
            | Self::Crashed { output } => Some(output.as_str()),
            Self::Tool(e) => e.output(),
        }
    }

    /// Counts parsed before the failure, when the runner got far enough to
    /// report any.
    pub fn partial_counts(&self) -> Option<&TestCounts> {
        match self {
            Self::TestsFailed { counts, .. } => Some(counts),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Tool(e) if e.is_cancelled())
    }
}
