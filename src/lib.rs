//! # mediabatch - parallel batch media conversion
//!
//! `mediabatch` converts many media files at once: HEIC photos to PNG, the
//! audio of MOV/MP4 clips to WAV, raster images between formats, and more.
//! The codec work is done by external tools behind the [`Transcoder`] trait;
//! this crate plans the jobs, runs them on a bounded worker pool, and reports
//! each outcome as soon as it is known.
//!
//! ## Features
//!
//! - Expand files, directories and glob patterns into conversion jobs
//! - Run jobs in parallel with a configurable concurrency limit
//! - One failing file never stops the rest of the batch
//! - Streaming per-file status plus a final summary
//! - Cooperative cancellation of pending jobs
//!
//! ## Example
//!
//! ```no_run
//! use mediabatch::{AppConfig, BatchConverter, ConsoleReporter, FfmpegTranscoder};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let profile = AppConfig::default().profile("video-to-wav")?.clone();
//! let config = profile.batch_config("audio").with_param("ac", "1");
//! let converter = BatchConverter::new(FfmpegTranscoder::default(), config);
//!
//! let jobs = converter.plan(&["clips/"])?;
//! let reporter = ConsoleReporter::new(jobs.len(), ".");
//! let summary = converter.run(jobs, reporter)?;
//! println!("{} of {} converted", summary.succeeded(), summary.total());
//! # Ok(())
//! # }
//! ```

mod error;

pub mod config;
pub mod job;
pub mod planner;
pub mod pool;
pub mod report;
pub mod transcoder;
pub mod visualize;

pub use config::{AppConfig, Profile};
pub use error::{BatchError, CollectorError, ConfigError, PlanningError, TranscodeError};
pub use job::{BatchConfig, BatchSummary, ConversionParams, Job, JobId, JobOutcome, JobResult, JobState};
pub use planner::JobPlanner;
pub use pool::{CancelToken, PoolStats, WorkerPool};
pub use report::{ConsoleReporter, NullReporter, ProgressReporter, ResultCollector};
pub use transcoder::{Backend, FfmpegTranscoder, HeifTranscoder, ImageTranscoder, ToolPaths, Transcoder};

use std::path::Path;
use tracing::info;

/// Plans and runs batches with one transcoder and one set of settings.
pub struct BatchConverter<T> {
    transcoder: T,
    config: BatchConfig,
    cancel: CancelToken,
}

impl<T: Transcoder> BatchConverter<T> {
    pub fn new(transcoder: T, config: BatchConfig) -> Self {
        Self {
            transcoder,
            config,
            cancel: CancelToken::new(),
        }
    }

    /// Handle for stopping the batch from another thread
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Expand `inputs` into jobs, creating the output directory.
    pub fn plan<P: AsRef<Path>>(&self, inputs: &[P]) -> Result<Vec<Job>, PlanningError> {
        JobPlanner::new(&self.config).plan(inputs)
    }

    /// Run already planned jobs and return their summary.
    pub fn run<R>(&self, jobs: Vec<Job>, reporter: R) -> Result<BatchSummary, BatchError>
    where
        R: ProgressReporter + 'static,
    {
        let collector = ResultCollector::new(jobs.len(), reporter);
        let stats = WorkerPool::new(self.config.concurrency)
            .with_cancel_token(self.cancel.clone())
            .run(jobs, &self.transcoder, &collector)?;
        let summary = collector.finalize()?;
        info!(
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            cancelled = summary.cancelled(),
            peak_running = stats.peak_running,
            "batch finished"
        );
        Ok(summary)
    }

    /// Plan `inputs` and run the resulting jobs.
    ///
    /// Planning errors abort before any conversion starts.
    pub fn convert<P, R>(&self, inputs: &[P], reporter: R) -> Result<BatchSummary, BatchError>
    where
        P: AsRef<Path>,
        R: ProgressReporter + 'static,
    {
        let jobs = self.plan(inputs)?;
        self.run(jobs, reporter)
    }
}
