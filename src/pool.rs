//! Bounded worker pool that runs jobs and isolates their failures.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::BatchError;
use crate::job::{Job, JobId, JobOutcome, JobResult, JobState};
use crate::report::ResultCollector;
use crate::transcoder::Transcoder;

/// Batch-level cancellation flag.
///
/// Once set, workers stop taking pending jobs. Jobs already running finish.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counters from one pool run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Worker threads started
    pub workers: usize,
    /// Jobs that ran to completion
    pub completed: usize,
    /// Jobs never started because of cancellation
    pub cancelled: usize,
    /// Highest number of jobs running at the same time
    pub peak_running: usize,
}

struct QueueState {
    pending: VecDeque<Job>,
    states: HashMap<JobId, JobState>,
    running: usize,
    peak_running: usize,
    completed: usize,
}

/// Pending jobs plus the state of every job, behind one lock.
struct JobQueue {
    inner: Mutex<QueueState>,
}

impl JobQueue {
    fn new(jobs: Vec<Job>) -> Self {
        let states = jobs.iter().map(|j| (j.id(), JobState::Pending)).collect();
        Self {
            inner: Mutex::new(QueueState {
                pending: jobs.into(),
                states,
                running: 0,
                peak_running: 0,
                completed: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the next pending job and mark it running.
    fn next(&self) -> Option<Job> {
        let mut q = self.lock();
        let job = q.pending.pop_front()?;
        advance(&mut q.states, job.id(), JobState::Running);
        q.running += 1;
        q.peak_running = q.peak_running.max(q.running);
        Some(job)
    }

    fn finish(&self, id: JobId) {
        let mut q = self.lock();
        advance(&mut q.states, id, JobState::Completed);
        q.running -= 1;
        q.completed += 1;
    }

    /// Remove every job still pending, marking it completed.
    fn drain(&self) -> Vec<Job> {
        let mut q = self.lock();
        let drained: Vec<Job> = q.pending.drain(..).collect();
        for job in &drained {
            advance(&mut q.states, job.id(), JobState::Completed);
        }
        drained
    }

    fn stats(&self, workers: usize, cancelled: usize) -> PoolStats {
        let q = self.lock();
        debug_assert!(q.states.values().all(|s| *s == JobState::Completed));
        PoolStats {
            workers,
            completed: q.completed,
            cancelled,
            peak_running: q.peak_running,
        }
    }
}

fn advance(states: &mut HashMap<JobId, JobState>, id: JobId, next: JobState) {
    if let Some(state) = states.get_mut(&id) {
        debug_assert!(state.can_advance_to(next), "job {} cannot go from {:?} to {:?}", id, state, next);
        *state = next;
    }
}

/// Runs jobs on at most `concurrency` threads.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    concurrency: NonZeroUsize,
    cancel: CancelToken,
}

impl WorkerPool {
    pub fn new(concurrency: NonZeroUsize) -> Self {
        Self {
            concurrency,
            cancel: CancelToken::new(),
        }
    }

    /// Share a cancellation flag with the caller
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run every job, pushing one result per job into `collector`.
    ///
    /// Results arrive in completion order. Transcoder errors and panics become
    /// failed results; they never stop the other jobs.
    pub fn run<T>(&self, jobs: Vec<Job>, transcoder: &T, collector: &ResultCollector) -> Result<PoolStats, BatchError>
    where
        T: Transcoder + ?Sized,
    {
        if jobs.is_empty() {
            return Ok(PoolStats::default());
        }

        let workers = self.concurrency.get().min(jobs.len());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("mediabatch-worker-{}", i))
            .build()?;

        info!(jobs = jobs.len(), workers, transcoder = transcoder.name(), "starting batch");
        let queue = JobQueue::new(jobs);

        pool.scope(|s| {
            for worker in 0..workers {
                let queue = &queue;
                s.spawn(move |_| self.work(worker, queue, transcoder, collector));
            }
        });

        let cancelled = queue.drain();
        let cancelled_count = cancelled.len();
        if cancelled_count > 0 {
            warn!(cancelled = cancelled_count, "batch cancelled before all jobs started");
        }
        for job in cancelled {
            collector.on_result(JobResult::new(job, JobOutcome::Cancelled, Duration::ZERO));
        }

        Ok(queue.stats(workers, cancelled_count))
    }

    fn work<T>(&self, worker: usize, queue: &JobQueue, transcoder: &T, collector: &ResultCollector)
    where
        T: Transcoder + ?Sized,
    {
        loop {
            if self.cancel.is_cancelled() {
                debug!(worker, "cancelled, not taking more jobs");
                break;
            }
            let Some(job) = queue.next() else { break };

            debug!(worker, job = %job.id(), source = %job.source().display(), "converting");
            collector.on_started(&job);
            let started = Instant::now();
            let outcome = execute(transcoder, &job);
            let elapsed = started.elapsed();

            if let JobOutcome::Failure(detail) = &outcome {
                warn!(job = %job.id(), source = %job.source().display(), error = %detail, "conversion failed");
            }
            queue.finish(job.id());
            collector.on_result(JobResult::new(job, outcome, elapsed));
        }
    }
}

/// Run one conversion, turning errors and panics into an outcome.
fn execute<T>(transcoder: &T, job: &Job) -> JobOutcome
where
    T: Transcoder + ?Sized,
{
    match panic::catch_unwind(AssertUnwindSafe(|| transcoder.convert(job))) {
        Ok(Ok(path)) => JobOutcome::Success(path),
        Ok(Err(e)) => JobOutcome::Failure(e.detail()),
        Err(payload) => JobOutcome::Failure(format!("{} panicked: {}", transcoder.name(), panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TranscodeError;
    use crate::job::ConversionParams;
    use crate::report::NullReporter;
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    /// Sleeps a little, tracks how many calls overlap, fails on `bad*` sources.
    #[derive(Default)]
    struct Instrumented {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    impl Transcoder for Instrumented {
        fn name(&self) -> &str {
            "instrumented"
        }

        fn convert(&self, job: &Job) -> Result<PathBuf, TranscodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(15));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let name = job.source_name();
            if name.starts_with("bad") {
                return Err(TranscodeError::process_failed("instrumented", "exit status: 1", b"corrupt input"));
            }
            if name.starts_with("panic") {
                panic!("decoder blew up on {}", name);
            }
            Ok(job.destination().to_path_buf())
        }
    }

    fn jobs(names: &[&str]) -> Vec<Job> {
        names
            .iter()
            .enumerate()
            .map(|(i, n)| Job::new(JobId(i), *n, format!("/out/{}.wav", n), ConversionParams::new()))
            .collect()
    }

    fn numbered(n: usize) -> Vec<Job> {
        let names: Vec<String> = (0..n).map(|i| format!("clip{}", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        jobs(&refs)
    }

    fn limit(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    fn outcome_by_name(summary: &crate::job::BatchSummary) -> HashMap<String, JobOutcome> {
        summary
            .results()
            .iter()
            .map(|r| (r.job().source_name(), r.outcome().clone()))
            .collect()
    }

    #[test]
    fn one_failure_does_not_affect_others() {
        let transcoder = Instrumented::default();
        let collector = ResultCollector::new(3, NullReporter);
        WorkerPool::new(limit(2))
            .run(jobs(&["a.src", "bad.src", "c.src"]), &transcoder, &collector)
            .unwrap();
        let summary = collector.finalize().unwrap();

        let outcomes = outcome_by_name(&summary);
        assert_eq!(outcomes["a.src"], JobOutcome::Success(PathBuf::from("/out/a.src.wav")));
        assert!(matches!(&outcomes["bad.src"], JobOutcome::Failure(d) if d.contains("corrupt input")));
        assert_eq!(outcomes["c.src"], JobOutcome::Success(PathBuf::from("/out/c.src.wav")));
        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.failed(), 1);
    }

    #[test]
    fn running_jobs_never_exceed_limit() {
        let transcoder = Instrumented::default();
        let collector = ResultCollector::new(10, NullReporter);
        let stats = WorkerPool::new(limit(4)).run(numbered(10), &transcoder, &collector).unwrap();

        assert!(transcoder.peak.load(Ordering::SeqCst) <= 4);
        assert!(stats.peak_running <= 4);
        assert_eq!(stats.workers, 4);
        assert_eq!(stats.completed, 10);
        assert_eq!(collector.finalize().unwrap().total(), 10);
    }

    #[test]
    fn every_job_yields_exactly_one_result() {
        for (n, workers) in [(0, 1), (1, 1), (5, 1), (7, 3), (16, 8), (3, 12)] {
            let transcoder = Instrumented::default();
            let collector = ResultCollector::new(n, NullReporter);
            WorkerPool::new(limit(workers)).run(numbered(n), &transcoder, &collector).unwrap();
            let summary = collector.finalize().unwrap();

            let ids: HashSet<JobId> = summary.results().iter().map(|r| r.job().id()).collect();
            assert_eq!(ids.len(), n);
            assert_eq!(summary.total(), n);
            assert_eq!(transcoder.calls.load(Ordering::SeqCst), n);
        }
    }

    #[test]
    fn workers_are_capped_by_job_count() {
        let transcoder = Instrumented::default();
        let collector = ResultCollector::new(2, NullReporter);
        let stats = WorkerPool::new(limit(16)).run(numbered(2), &transcoder, &collector).unwrap();
        assert_eq!(stats.workers, 2);
    }

    #[test]
    fn panicking_transcoder_is_isolated() {
        let transcoder = Instrumented::default();
        let collector = ResultCollector::new(3, NullReporter);
        WorkerPool::new(limit(2))
            .run(jobs(&["a", "panic.src", "b"]), &transcoder, &collector)
            .unwrap();
        let summary = collector.finalize().unwrap();
        let outcomes = outcome_by_name(&summary);
        assert!(matches!(&outcomes["panic.src"], JobOutcome::Failure(d) if d.contains("decoder blew up")));
        assert_eq!(summary.succeeded(), 2);
    }

    #[test]
    fn cancelled_before_start_runs_nothing() {
        let transcoder = Instrumented::default();
        let collector = ResultCollector::new(4, NullReporter);
        let cancel = CancelToken::new();
        cancel.cancel();
        let stats = WorkerPool::new(limit(2))
            .with_cancel_token(cancel)
            .run(numbered(4), &transcoder, &collector)
            .unwrap();

        assert_eq!(stats.cancelled, 4);
        assert_eq!(stats.completed, 0);
        assert_eq!(transcoder.calls.load(Ordering::SeqCst), 0);
        let summary = collector.finalize().unwrap();
        assert_eq!(summary.cancelled(), 4);
    }

    /// Cancels the batch from inside the first conversion.
    struct CancelOnFirst {
        cancel: CancelToken,
        calls: AtomicUsize,
    }

    impl Transcoder for CancelOnFirst {
        fn name(&self) -> &str {
            "cancel-on-first"
        }

        fn convert(&self, job: &Job) -> Result<PathBuf, TranscodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.cancel.cancel();
            thread::sleep(Duration::from_millis(10));
            Ok(job.destination().to_path_buf())
        }
    }

    #[test]
    fn cancellation_lets_running_jobs_finish() {
        let cancel = CancelToken::new();
        let transcoder = CancelOnFirst {
            cancel: cancel.clone(),
            calls: AtomicUsize::new(0),
        };
        let collector = ResultCollector::new(20, NullReporter);
        let stats = WorkerPool::new(limit(1))
            .with_cancel_token(cancel)
            .run(numbered(20), &transcoder, &collector)
            .unwrap();

        assert_eq!(transcoder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.cancelled, 19);
        let summary = collector.finalize().unwrap();
        assert_eq!(summary.succeeded(), 1);
        assert_eq!(summary.cancelled(), 19);
        assert_eq!(summary.total(), 20);
    }

    #[test]
    fn panic_message_handles_payload_types() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
