//! The conversion capability the engine delegates to, and its adapters.
//!
//! The engine only sees [`Transcoder::convert`]: a blocking call that either
//! leaves a file at the job's destination or explains why it could not.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command as ProcCommand;
use std::sync::Arc;
use tracing::trace;

use crate::error::TranscodeError;
use crate::job::Job;

/// Performs the actual conversion of one job.
///
/// Implementations are called from several worker threads at once, each with
/// a different job.
pub trait Transcoder: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Convert `job.source()` into `job.destination()` and return the path written.
    fn convert(&self, job: &Job) -> Result<PathBuf, TranscodeError>;
}

impl<T: Transcoder + ?Sized> Transcoder for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn convert(&self, job: &Job) -> Result<PathBuf, TranscodeError> {
        (**self).convert(job)
    }
}

impl<T: Transcoder + ?Sized> Transcoder for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn convert(&self, job: &Job) -> Result<PathBuf, TranscodeError> {
        (**self).convert(job)
    }
}

/// Which adapter a profile converts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    Ffmpeg,
    Heif,
    Image,
}

/// Locations of the external tools.
#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub ffmpeg: PathBuf,
    pub heif_convert: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            heif_convert: PathBuf::from("heif-convert"),
        }
    }
}

/// Build the transcoder for `backend`.
pub fn for_backend(backend: Backend, tools: &ToolPaths) -> Box<dyn Transcoder> {
    match backend {
        Backend::Ffmpeg => Box::new(FfmpegTranscoder::new(tools.ffmpeg.clone())),
        Backend::Heif => Box::new(HeifTranscoder::new(tools.heif_convert.clone())),
        Backend::Image => Box::new(ImageTranscoder),
    }
}

fn ensure_source(job: &Job) -> Result<(), TranscodeError> {
    if job.source().is_file() {
        Ok(())
    } else {
        Err(TranscodeError::SourceNotFound {
            path: job.source().to_path_buf(),
        })
    }
}

fn ensure_output(path: &Path) -> Result<PathBuf, TranscodeError> {
    if path.is_file() {
        Ok(path.to_path_buf())
    } else {
        Err(TranscodeError::MissingOutput {
            path: path.to_path_buf(),
        })
    }
}

fn run_tool(tool: &str, program: &Path, args: &[OsString]) -> Result<(), TranscodeError> {
    trace!(tool, ?args, "spawning");
    let output = ProcCommand::new(program)
        .args(args)
        .output()
        .map_err(|source| TranscodeError::Launch {
            tool: tool.to_string(),
            source,
        })?;
    if !output.status.success() {
        return Err(TranscodeError::process_failed(tool, output.status, &output.stderr));
    }
    Ok(())
}

/// Converts through the `ffmpeg` command line.
///
/// Every job parameter becomes an output option: `-key value`, or just `-key`
/// when the value is empty. Existing destinations are overwritten.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self { ffmpeg: ffmpeg.into() }
    }

    pub(crate) fn build_args(job: &Job) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-hide_banner", "-nostdin", "-loglevel", "error", "-y", "-i"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(job.source().into());
        for (key, value) in job.params().iter() {
            args.push(format!("-{}", key).into());
            if !value.is_empty() {
                args.push(value.into());
            }
        }
        args.push(job.destination().into());
        args
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl Transcoder for FfmpegTranscoder {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn convert(&self, job: &Job) -> Result<PathBuf, TranscodeError> {
        ensure_source(job)?;
        run_tool("ffmpeg", &self.ffmpeg, &Self::build_args(job))?;
        ensure_output(job.destination())
    }
}

/// Decodes HEIC/HEIF stills with libheif's `heif-convert`.
///
/// Reads the optional `quality` parameter (passed as `-q`).
#[derive(Debug, Clone)]
pub struct HeifTranscoder {
    heif_convert: PathBuf,
}

impl HeifTranscoder {
    pub fn new(heif_convert: impl Into<PathBuf>) -> Self {
        Self {
            heif_convert: heif_convert.into(),
        }
    }

    pub(crate) fn build_args(job: &Job) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        if let Some(q) = job.params().get("quality") {
            args.push("-q".into());
            args.push(q.into());
        }
        args.push(job.source().into());
        args.push(job.destination().into());
        args
    }
}

impl Transcoder for HeifTranscoder {
    fn name(&self) -> &str {
        "heif-convert"
    }

    fn convert(&self, job: &Job) -> Result<PathBuf, TranscodeError> {
        ensure_source(job)?;
        run_tool("heif-convert", &self.heif_convert, &Self::build_args(job))?;
        ensure_output(job.destination())
    }
}

/// Re-encodes raster images with the `image` crate.
///
/// The output format follows the destination extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageTranscoder;

impl Transcoder for ImageTranscoder {
    fn name(&self) -> &str {
        "image"
    }

    fn convert(&self, job: &Job) -> Result<PathBuf, TranscodeError> {
        ensure_source(job)?;
        let img = image::open(job.source()).map_err(|source| TranscodeError::Decode {
            path: job.source().to_path_buf(),
            source,
        })?;
        img.save(job.destination()).map_err(|source| TranscodeError::Encode {
            path: job.destination().to_path_buf(),
            source,
        })?;
        Ok(job.destination().to_path_buf())
    }
}
