use mediabatch::{
    BatchConfig, BatchConverter, BatchError, JobOutcome, Job, NullReporter, PlanningError, ProgressReporter, JobResult,
    TranscodeError, Transcoder,
};
use std::collections::HashMap;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Copies the source upper-cased; sources containing "corrupt" fail.
struct Upcase;

impl Transcoder for Upcase {
    fn name(&self) -> &str {
        "upcase"
    }

    fn convert(&self, job: &Job) -> Result<PathBuf, TranscodeError> {
        let text = fs::read_to_string(job.source())?;
        if text.contains("corrupt") {
            return Err(TranscodeError::process_failed("upcase", "exit status: 1", b"invalid data found"));
        }
        fs::write(job.destination(), text.to_uppercase())?;
        Ok(job.destination().to_path_buf())
    }
}

#[derive(Clone, Default)]
struct Lines(Arc<Mutex<Vec<String>>>);

impl ProgressReporter for Lines {
    fn on_result(&self, result: &JobResult) {
        self.0.lock().unwrap().push(result.job().source_name());
    }
}

fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
    let p = dir.join(name);
    fs::write(&p, body).unwrap();
    p
}

fn config(out: &Path, limit: usize) -> BatchConfig {
    BatchConfig::new(out, &["src"], "out").with_concurrency(NonZeroUsize::new(limit).unwrap())
}

fn outcomes(summary: &mediabatch::BatchSummary) -> HashMap<String, bool> {
    summary
        .results()
        .iter()
        .map(|r| (r.job().source_name(), r.is_success()))
        .collect()
}

#[test]
fn corrupt_file_fails_alone() {
    let tmp = TempDir::new().unwrap();
    let a = write(tmp.path(), "a.src", "alpha");
    let b = write(tmp.path(), "b.src", "corrupt");
    let c = write(tmp.path(), "c.src", "gamma");
    let out = tmp.path().join("out");

    let lines = Lines::default();
    let converter = BatchConverter::new(Upcase, config(&out, 2));
    let summary = converter.convert(&[a, b, c], lines.clone()).unwrap();

    let got = outcomes(&summary);
    assert_eq!(got.len(), 3);
    assert!(got["a.src"]);
    assert!(!got["b.src"]);
    assert!(got["c.src"]);
    assert_eq!(lines.0.lock().unwrap().len(), 3);

    assert_eq!(fs::read_to_string(out.join("a.out")).unwrap(), "ALPHA");
    assert_eq!(fs::read_to_string(out.join("c.out")).unwrap(), "GAMMA");
    assert!(!out.join("b.out").exists());

    let failure = summary.failures().next().unwrap();
    match failure.outcome() {
        JobOutcome::Failure(detail) => {
            assert!(detail.contains("invalid data found"));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[test]
fn replacing_one_source_changes_only_its_result() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("in");
    fs::create_dir(&src).unwrap();
    for i in 0..6 {
        write(&src, &format!("f{}.src", i), &format!("file {}", i));
    }
    let out = tmp.path().join("out");
    let converter = BatchConverter::new(Upcase, config(&out, 3));

    let before = outcomes(&converter.convert(&[&src], NullReporter).unwrap());
    write(&src, "f3.src", "corrupt now");
    let after = outcomes(&converter.convert(&[&src], NullReporter).unwrap());

    for (name, ok) in &before {
        if name == "f3.src" {
            assert!(ok);
            assert!(!after[name]);
        } else {
            assert_eq!(after[name], *ok);
        }
    }
}

#[test]
fn rerun_overwrites_same_outputs() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("in");
    fs::create_dir(&src).unwrap();
    write(&src, "x.src", "first");
    write(&src, "y.src", "second");
    let out = tmp.path().join("out");
    let converter = BatchConverter::new(Upcase, config(&out, 2));

    converter.convert(&[&src], NullReporter).unwrap();
    write(&src, "x.src", "changed");
    let summary = converter.convert(&[&src], NullReporter).unwrap();

    let mut produced: Vec<String> = fs::read_dir(&out)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    produced.sort();
    assert_eq!(produced, vec!["x.out", "y.out"]);
    assert_eq!(fs::read_to_string(out.join("x.out")).unwrap(), "CHANGED");
    assert_eq!(summary.artifacts().len(), 2);
}

#[test]
fn empty_inputs_are_a_planning_error() {
    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("out");
    let lines = Lines::default();
    let converter = BatchConverter::new(Upcase, config(&out, 2));

    let inputs: Vec<PathBuf> = Vec::new();
    let err = converter.convert(&inputs, lines.clone()).unwrap_err();
    assert!(matches!(err, BatchError::Planning(PlanningError::NoJobs)));
    assert!(lines.0.lock().unwrap().is_empty());
    assert!(out.is_dir());
    assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
}

#[test]
fn missing_output_dir_is_created_and_reused() {
    let tmp = TempDir::new().unwrap();
    let a = write(tmp.path(), "a.src", "alpha");
    let out = tmp.path().join("deep").join("out");
    assert!(!out.exists());

    let converter = BatchConverter::new(Upcase, config(&out, 1));
    converter.convert(&[&a], NullReporter).unwrap();
    assert!(out.is_dir());

    let summary = converter.convert(&[&a], NullReporter).unwrap();
    assert!(summary.is_success());
}

#[test]
fn missing_source_is_reported_per_job() {
    let tmp = TempDir::new().unwrap();
    let a = write(tmp.path(), "a.src", "alpha");
    let gone = tmp.path().join("gone.src");
    let converter = BatchConverter::new(Upcase, config(&tmp.path().join("out"), 2));

    let summary = converter.convert(&[a, gone], NullReporter).unwrap();
    assert_eq!(summary.succeeded(), 1);
    assert_eq!(summary.failed(), 1);
    assert!(!summary.is_success());
}

#[test]
fn cancelled_batch_still_reports_every_job() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("in");
    fs::create_dir(&src).unwrap();
    for i in 0..5 {
        write(&src, &format!("f{}.src", i), "data");
    }
    let converter = BatchConverter::new(Upcase, config(&tmp.path().join("out"), 2));
    converter.cancel_token().cancel();

    let summary = converter.convert(&[&src], NullReporter).unwrap();
    assert_eq!(summary.total(), 5);
    assert_eq!(summary.cancelled(), 5);
    assert!(!summary.is_success());
}
