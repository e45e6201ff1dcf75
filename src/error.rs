//! Error types for planning, transcoding and result collection.

use std::path::PathBuf;
use thiserror::Error;

use crate::job::JobId;

/// Errors that abort a batch before any job runs.
#[derive(Debug, Error)]
pub enum PlanningError {
    /// The output directory could not be created or resolved.
    #[error("failed to create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The inputs did not resolve to any job.
    #[error("no input files to convert")]
    NoJobs,

    /// An input looked like a glob pattern but could not be parsed.
    #[error("invalid pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    /// An input has no file name to derive a destination from.
    #[error("cannot derive an output name from {path}")]
    InvalidSource { path: PathBuf },
}

/// A single job's conversion failure. Never fatal to the batch.
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// Source file does not exist or is not a regular file.
    #[error("source not found: {path}")]
    SourceNotFound { path: PathBuf },

    /// The external tool could not be started.
    #[error("failed to launch {tool}: {source}")]
    Launch {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// The external tool ran and reported an error.
    #[error("{tool} exited with {status}")]
    ProcessFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    /// The source could not be decoded.
    #[error("cannot decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// The destination could not be encoded or written.
    #[error("cannot encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// The tool reported success but left no output behind.
    #[error("no output written to {path}")]
    MissingOutput { path: PathBuf },

    /// I/O error during conversion.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TranscodeError {
    /// Creates a process failure from captured stderr.
    pub fn process_failed(tool: impl Into<String>, status: impl ToString, stderr: &[u8]) -> Self {
        Self::ProcessFailed {
            tool: tool.into(),
            status: status.to_string(),
            stderr: String::from_utf8_lossy(stderr).trim().to_string(),
        }
    }

    /// The message plus whatever diagnostic output the tool produced.
    pub fn detail(&self) -> String {
        match self {
            Self::ProcessFailed { stderr, .. } if !stderr.is_empty() => {
                format!("{}: {}", self, stderr)
            }
            _ => self.to_string(),
        }
    }
}

/// Internal bookkeeping failures of the result collector.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Fewer results arrived than jobs were planned.
    #[error("expected {expected} results, collected {collected}")]
    MissingResults { expected: usize, collected: usize },

    /// The same job reported twice.
    #[error("duplicate result for job {0}")]
    DuplicateResult(JobId),
}

/// Anything that stops a batch from producing a summary.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Planning(#[from] PlanningError),

    #[error("failed to start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Collector(#[from] CollectorError),
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("unknown profile '{name}' (available: {available})")]
    UnknownProfile { name: String, available: String },

    #[error("invalid parameter '{0}', expected KEY=VALUE")]
    InvalidParam(String),
}
