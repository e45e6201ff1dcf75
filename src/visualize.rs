//! Waveform and spectrogram images for an audio file.
//!
//! Both renders are ordinary jobs for [`FfmpegTranscoder`](crate::FfmpegTranscoder):
//! the drawing is done by ffmpeg's `showwavespic` and `showspectrumpic`
//! filters after downmixing to mono.

use std::path::Path;

use crate::error::PlanningError;
use crate::job::{ConversionParams, Job, JobId};
use crate::planner::prepare_output_dir;

pub const WAVEFORM_FILE: &str = "waveform.png";
pub const SPECTROGRAM_FILE: &str = "spectrogram.png";

/// Image size of the renders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    pub width: u32,
    pub height: u32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            width: 1600,
            height: 600,
        }
    }
}

fn render_params(filter: String) -> ConversionParams {
    ConversionParams::new()
        .with("filter_complex", filter)
        .with("frames:v", "1")
}

/// Plan the two render jobs for `audio`, creating `output_dir` if needed.
///
/// Existing renders in `output_dir` are overwritten.
pub fn plan_renders(audio: &Path, output_dir: &Path, opts: &RenderOptions) -> Result<Vec<Job>, PlanningError> {
    let out = prepare_output_dir(output_dir)?;
    let size = format!("{}x{}", opts.width, opts.height);

    let waveform = render_params(format!("aformat=channel_layouts=mono,showwavespic=s={}:colors=white", size));
    let spectrogram = render_params(format!(
        "aformat=channel_layouts=mono,showspectrumpic=s={}:legend=1:scale=log",
        size
    ));

    Ok(vec![
        Job::new(JobId(0), audio, out.join(WAVEFORM_FILE), waveform),
        Job::new(JobId(1), audio, out.join(SPECTROGRAM_FILE), spectrogram),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcoder::FfmpegTranscoder;
    use tempfile::TempDir;

    #[test]
    fn plans_waveform_and_spectrogram() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("plots");
        let jobs = plan_renders(Path::new("take.wav"), &out, &RenderOptions::default()).unwrap();

        assert!(out.is_dir());
        assert_eq!(jobs.len(), 2);
        assert!(jobs[0].destination().ends_with(WAVEFORM_FILE));
        assert!(jobs[1].destination().ends_with(SPECTROGRAM_FILE));
        assert!(jobs.iter().all(|j| j.source() == Path::new("take.wav")));
        assert!(jobs[0].params().get("filter_complex").unwrap().contains("showwavespic=s=1600x600"));
        assert!(jobs[1].params().get("filter_complex").unwrap().contains("showspectrumpic=s=1600x600"));
        assert_eq!(jobs[1].params().get("frames:v"), Some("1"));
    }

    #[test]
    fn render_job_becomes_single_frame_ffmpeg_call() {
        let tmp = TempDir::new().unwrap();
        let opts = RenderOptions { width: 800, height: 200 };
        let jobs = plan_renders(Path::new("a.wav"), tmp.path(), &opts).unwrap();
        let args: Vec<String> = FfmpegTranscoder::build_args(&jobs[0])
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        let fc = args.iter().position(|a| a == "-filter_complex").unwrap();
        assert!(args[fc + 1].contains("800x200"));
        let frames = args.iter().position(|a| a == "-frames:v").unwrap();
        assert_eq!(args[frames + 1], "1");
        assert!(args.last().unwrap().ends_with(WAVEFORM_FILE));
    }
}
