//! Units of work and their outcomes.

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Position of a job in its planned batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct JobId(pub usize);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque parameters forwarded to the transcoder.
///
/// Keys iterate in sorted order so generated command lines are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversionParams(BTreeMap<String, String>);

impl ConversionParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a parameter
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Layer `other` on top of these parameters, `other` winning on conflicts.
    pub fn merged(mut self, other: &ConversionParams) -> Self {
        for (k, v) in other.iter() {
            self.insert(k, v);
        }
        self
    }

    /// Parse a `KEY=VALUE` pair as given on the command line.
    ///
    /// A bare `KEY` yields an empty value, which transcoders treat as a flag.
    pub fn parse_pair(raw: &str) -> Result<(String, String), ConfigError> {
        let (key, value) = match raw.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => (raw.trim(), ""),
        };
        if key.is_empty() || key.starts_with('-') {
            return Err(ConfigError::InvalidParam(raw.to_string()));
        }
        Ok((key.to_string(), value.to_string()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ConversionParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// One source file mapped to one destination file.
///
/// Fields are private: a job is never modified once planned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    id: JobId,
    source: PathBuf,
    destination: PathBuf,
    params: ConversionParams,
}

impl Job {
    pub fn new(id: JobId, source: impl Into<PathBuf>, destination: impl Into<PathBuf>, params: ConversionParams) -> Self {
        Self {
            id,
            source: source.into(),
            destination: destination.into(),
            params,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn params(&self) -> &ConversionParams {
        &self.params
    }

    /// File name of the source, for status lines
    pub fn source_name(&self) -> String {
        self.source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source.display().to_string())
    }
}

/// Settings shared by every job of a batch.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Where converted files are written
    pub output_dir: PathBuf,
    /// Maximum number of conversions running at once
    pub concurrency: NonZeroUsize,
    /// Parameters forwarded to every job
    pub params: ConversionParams,
    /// Extensions picked up when an input is a directory (without the dot)
    pub source_extensions: Vec<String>,
    /// Extension of produced files (without the dot)
    pub target_extension: String,
}

impl BatchConfig {
    pub fn new(output_dir: impl Into<PathBuf>, source_extensions: &[&str], target_extension: &str) -> Self {
        Self {
            output_dir: output_dir.into(),
            concurrency: default_concurrency(),
            params: ConversionParams::new(),
            source_extensions: source_extensions.iter().map(|e| e.to_string()).collect(),
            target_extension: target_extension.to_string(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: NonZeroUsize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_params(mut self, params: ConversionParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key, value);
        self
    }
}

/// Number of execution units on the host, or 1 if unknown.
pub fn default_concurrency() -> NonZeroUsize {
    std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
}

/// Lifecycle of a job inside the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    /// Waiting in the queue
    Pending,
    /// Picked up by a worker
    Running,
    /// Finished, one way or another
    Completed,
}

impl JobState {
    /// Whether moving from `self` to `next` is allowed.
    pub fn can_advance_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::Running)
                | (JobState::Running, JobState::Completed)
                | (JobState::Pending, JobState::Completed)
        )
    }
}

/// Terminal outcome of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum JobOutcome {
    /// Conversion produced this file
    Success(PathBuf),
    /// Conversion failed with this diagnostic
    Failure(String),
    /// The batch was cancelled before this job started
    Cancelled,
}

/// Immutable record of how one job ended.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    job: Job,
    outcome: JobOutcome,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    elapsed: Duration,
}

fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl JobResult {
    pub fn new(job: Job, outcome: JobOutcome, elapsed: Duration) -> Self {
        Self { job, outcome, elapsed }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn outcome(&self) -> &JobOutcome {
        &self.outcome
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, JobOutcome::Success(_))
    }
}

/// Every result of a batch, ordered by job id.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    results: Vec<JobResult>,
}

impl BatchSummary {
    pub(crate) fn new(mut results: Vec<JobResult>) -> Self {
        results.sort_by_key(|r| r.job.id);
        Self { results }
    }

    pub fn results(&self) -> &[JobResult] {
        &self.results
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Success(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Failure(_)))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Cancelled))
    }

    /// Files produced by successful jobs, in job order
    pub fn artifacts(&self) -> Vec<&Path> {
        self.results
            .iter()
            .filter_map(|r| match &r.outcome {
                JobOutcome::Success(path) => Some(path.as_path()),
                _ => None,
            })
            .collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = &JobResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, JobOutcome::Failure(_)))
    }

    /// True when every job converted
    pub fn is_success(&self) -> bool {
        self.succeeded() == self.total()
    }

    fn count(&self, pred: impl Fn(&JobOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} converted, {} failed", self.succeeded(), self.failed())?;
        if self.cancelled() > 0 {
            write!(f, ", {} cancelled", self.cancelled())?;
        }
        Ok(())
    }
}
