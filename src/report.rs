//! Collecting job results and reporting progress as they arrive.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashSet;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::warn;

use crate::error::CollectorError;
use crate::job::{BatchSummary, Job, JobOutcome, JobResult};

/// Receives progress notifications from the worker pool.
///
/// Calls are serialized by [`ResultCollector`], so implementations never see
/// two notifications at once.
pub trait ProgressReporter: Send + Sync {
    /// A worker picked up `job`
    fn on_started(&self, _job: &Job) {}

    /// `result` is final; called exactly once per job
    fn on_result(&self, result: &JobResult);

    /// The whole batch is done
    fn on_finished(&self, _summary: &BatchSummary) {}
}

/// Reporter that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl ProgressReporter for NullReporter {
    fn on_result(&self, _result: &JobResult) {}
}

/// Thread-safe accumulator of job results.
pub struct ResultCollector {
    expected: usize,
    results: Mutex<Vec<JobResult>>,
    reporter: Box<dyn ProgressReporter>,
}

impl ResultCollector {
    pub fn new(expected: usize, reporter: impl ProgressReporter + 'static) -> Self {
        Self {
            expected,
            results: Mutex::new(Vec::with_capacity(expected)),
            reporter: Box::new(reporter),
        }
    }

    pub fn on_started(&self, job: &Job) {
        let _guard = self.results.lock().unwrap_or_else(PoisonError::into_inner);
        self.reporter.on_started(job);
    }

    /// Record `result` and report it immediately.
    pub fn on_result(&self, result: JobResult) {
        let mut results = self.results.lock().unwrap_or_else(PoisonError::into_inner);
        self.reporter.on_result(&result);
        results.push(result);
    }

    /// Number of results recorded so far
    pub fn collected(&self) -> usize {
        self.results.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Check that every job reported exactly once and build the summary.
    pub fn finalize(self) -> Result<BatchSummary, CollectorError> {
        let results = self.results.into_inner().unwrap_or_else(PoisonError::into_inner);

        let mut seen = HashSet::with_capacity(results.len());
        for r in &results {
            if !seen.insert(r.job().id()) {
                return Err(CollectorError::DuplicateResult(r.job().id()));
            }
        }
        if results.len() != self.expected {
            return Err(CollectorError::MissingResults {
                expected: self.expected,
                collected: results.len(),
            });
        }

        let summary = BatchSummary::new(results);
        self.reporter.on_finished(&summary);
        Ok(summary)
    }
}

/// Status line for one finished job.
///
/// Successful destinations are shown relative to `base` when they live under it.
pub fn format_line(result: &JobResult, base: &Path) -> String {
    let name = result.job().source_name();
    match result.outcome() {
        JobOutcome::Success(path) => {
            let shown = path.strip_prefix(base).unwrap_or(path);
            format!("✓ {}  →  {}", name, shown.display())
        }
        JobOutcome::Failure(detail) => format!("✗ {}: {}", name, detail),
        JobOutcome::Cancelled => format!("⊘ {}: cancelled", name),
    }
}

/// Write one line, logging instead of failing when the output is gone.
fn print_line(mut out: impl Write, line: &str) {
    if let Err(e) = writeln!(out, "{}", line) {
        warn!(error = %e, "could not write status line");
    }
}

/// Prints one line per job to stdout with a progress bar on stderr.
pub struct ConsoleReporter {
    bar: ProgressBar,
    base: PathBuf,
}

impl ConsoleReporter {
    /// `base` is the directory destinations are shown relative to.
    pub fn new(total: usize, base: impl Into<PathBuf>) -> Self {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Self { bar, base: base.into() }
    }

    /// Same lines, no bar
    pub fn without_bar(total: usize, base: impl Into<PathBuf>) -> Self {
        let reporter = Self::new(total, base);
        reporter.bar.set_draw_target(ProgressDrawTarget::hidden());
        reporter
    }
}

impl ProgressReporter for ConsoleReporter {
    fn on_started(&self, job: &Job) {
        self.bar.set_message(job.source_name());
    }

    fn on_result(&self, result: &JobResult) {
        let line = format_line(result, &self.base);
        self.bar.suspend(|| print_line(io::stdout().lock(), &line));
        self.bar.inc(1);
    }

    fn on_finished(&self, summary: &BatchSummary) {
        self.bar.finish_and_clear();
        print_line(io::stdout().lock(), &summary.to_string());
    }
}
