//! Expands input specifiers into an ordered list of jobs.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::PlanningError;
use crate::job::{BatchConfig, Job, JobId};

/// Turns files, directories and glob patterns into jobs for one batch.
pub struct JobPlanner<'a> {
    config: &'a BatchConfig,
}

impl<'a> JobPlanner<'a> {
    pub fn new(config: &'a BatchConfig) -> Self {
        Self { config }
    }

    /// Create the output directory and plan one job per resolved source.
    ///
    /// Jobs follow input order; directory and pattern matches are sorted.
    /// Two sources with the same stem share a destination and the later one
    /// overwrites the earlier one.
    pub fn plan<P: AsRef<Path>>(&self, inputs: &[P]) -> Result<Vec<Job>, PlanningError> {
        let output_dir = prepare_output_dir(&self.config.output_dir)?;

        let mut sources = Vec::new();
        for input in inputs {
            sources.extend(self.expand(input.as_ref())?);
        }
        if sources.is_empty() {
            return Err(PlanningError::NoJobs);
        }

        let mut seen = HashSet::new();
        let mut jobs = Vec::with_capacity(sources.len());
        for (idx, source) in sources.into_iter().enumerate() {
            let destination = destination_for(&source, &output_dir, &self.config.target_extension)?;
            if !seen.insert(destination.clone()) {
                warn!(
                    source = %source.display(),
                    destination = %destination.display(),
                    "destination already planned, later job overwrites it"
                );
            }
            jobs.push(Job::new(JobId(idx), source, destination, self.config.params.clone()));
        }

        debug!(jobs = jobs.len(), output_dir = %output_dir.display(), "planned batch");
        Ok(jobs)
    }

    fn expand(&self, input: &Path) -> Result<Vec<PathBuf>, PlanningError> {
        if input.is_dir() {
            return Ok(self.list_directory(input));
        }
        if input.exists() || !is_pattern(input) {
            return Ok(vec![input.to_path_buf()]);
        }

        let pattern = input.to_string_lossy();
        let entries = glob::glob(&pattern).map_err(|source| PlanningError::Pattern {
            pattern: pattern.to_string(),
            source,
        })?;
        let mut matches: Vec<PathBuf> = entries.flatten().filter(|p| p.is_file()).collect();
        matches.sort();
        if matches.is_empty() {
            warn!(pattern = %pattern, "pattern matched no files");
        }
        Ok(matches)
    }

    fn list_directory(&self, dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| self.matches_source_extension(p))
            .collect();
        files.sort();
        if files.is_empty() {
            warn!(dir = %dir.display(), extensions = ?self.config.source_extensions, "directory has no matching files");
        }
        files
    }

    fn matches_source_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                self.config
                    .source_extensions
                    .iter()
                    .any(|want| want.trim_start_matches('.').eq_ignore_ascii_case(ext))
            })
    }
}

/// Destination for `source`: its stem with `extension`, inside `output_dir`.
pub fn destination_for(source: &Path, output_dir: &Path, extension: &str) -> Result<PathBuf, PlanningError> {
    let name = source.file_name().ok_or_else(|| PlanningError::InvalidSource {
        path: source.to_path_buf(),
    })?;
    let file = PathBuf::from(name).with_extension(extension.trim_start_matches('.'));
    Ok(output_dir.join(file))
}

/// Create `dir` (and parents) if missing and return its absolute form.
pub fn prepare_output_dir(dir: &Path) -> Result<PathBuf, PlanningError> {
    let dir = expand_home(dir);
    fs::create_dir_all(&dir)
        .and_then(|_| fs::canonicalize(&dir))
        .map_err(|source| PlanningError::OutputDir { path: dir.clone(), source })
}

/// Replace a leading `~` with the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

fn is_pattern(path: &Path) -> bool {
    path.to_string_lossy().contains(['*', '?', '['])
}
