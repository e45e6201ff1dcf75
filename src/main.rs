use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use mediabatch::visualize::{self, RenderOptions};
use mediabatch::{AppConfig, BatchConfig, BatchConverter, BatchSummary, ConsoleReporter, ConversionParams, FfmpegTranscoder, Profile, Transcoder};
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Exit status when the batch could not run at all
const EXIT_FATAL: u8 = 1;
/// Exit status when at least one job did not convert
const EXIT_JOB_FAILURES: u8 = 2;

#[derive(Parser, Debug)]
#[command(version, about = "Batch-convert images, audio and video in parallel.")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,

    /// Config file (JSON or TOML) instead of the default search
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output on stderr (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Write the batch summary as JSON to this file
    #[arg(long, global = true)]
    summary_json: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert HEIC photos to PNG
    #[command(name = "heic2png")]
    Heic2Png {
        #[command(flatten)]
        batch: BatchArgs,

        /// Output quality passed to heif-convert
        #[arg(long)]
        quality: Option<u8>,
    },

    /// Extract the audio of MOV/MP4 (or any video) files as WAV
    #[command(name = "video2wav", visible_aliases = ["mov2wav", "mp42wav"])]
    Video2Wav {
        #[command(flatten)]
        batch: BatchArgs,

        /// Output sample rate in Hz
        #[arg(long, default_value_t = 44100)]
        rate: u32,

        /// Force mono (1-channel) output
        #[arg(long, default_value_t = false)]
        mono: bool,
    },

    /// Convert with any configured profile
    Convert {
        /// Profile name (see `mediabatch profiles`)
        #[arg(long, short)]
        profile: String,

        #[command(flatten)]
        batch: BatchArgs,

        /// Extra transcoder parameter, KEY=VALUE (repeatable)
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
    },

    /// Render waveform.png and spectrogram.png for an audio file
    Visualize {
        /// Input WAV/FLAC/OGG/...
        audio: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        #[arg(long, default_value_t = 1600)]
        width: u32,

        #[arg(long, default_value_t = 600)]
        height: u32,
    },

    /// List the configured conversion profiles
    Profiles,
}

#[derive(Args, Debug)]
struct BatchArgs {
    /// Files, directories or glob patterns to convert
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output directory (created if missing)
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Maximum number of files converted at once [default: number of CPUs]
    #[arg(long, short = 'j')]
    concurrency: Option<NonZeroUsize>,
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(usage_status(&e));
        }
    };
    init_logging(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

/// `--help` and `--version` succeed; usage errors are fatal, not job failures.
fn usage_status(e: &clap::Error) -> u8 {
    if e.use_stderr() {
        EXIT_FATAL
    } else {
        0
    }
}

fn batch_status(summary: &BatchSummary) -> u8 {
    if summary.is_success() {
        0
    } else {
        EXIT_JOB_FAILURES
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let cfg = AppConfig::load(cli.config.as_deref())?;

    let summary = match cli.cmd {
        Command::Heic2Png { batch, quality } => {
            let mut overrides = ConversionParams::new();
            if let Some(q) = quality {
                overrides.insert("quality", q.to_string());
            }
            run_profile(&cfg, "heic-to-png", &batch, &overrides)?
        }
        Command::Video2Wav { batch, rate, mono } => {
            let overrides = ConversionParams::new()
                .with("ar", rate.to_string())
                .with("ac", if mono { "1" } else { "2" });
            run_profile(&cfg, "video-to-wav", &batch, &overrides)?
        }
        Command::Convert { profile, batch, params } => {
            let mut overrides = ConversionParams::new();
            for raw in &params {
                let (k, v) = ConversionParams::parse_pair(raw)?;
                overrides.insert(k, v);
            }
            run_profile(&cfg, &profile, &batch, &overrides)?
        }
        Command::Visualize { audio, output, width, height } => {
            run_visualize(&cfg, &audio, &output, RenderOptions { width, height })?
        }
        Command::Profiles => {
            print_profiles(&cfg);
            return Ok(ExitCode::SUCCESS);
        }
    };

    if let Some(path) = &cli.summary_json {
        write_summary(&summary, path)?;
    }

    Ok(ExitCode::from(batch_status(&summary)))
}

fn run_profile(cfg: &AppConfig, name: &str, args: &BatchArgs, overrides: &ConversionParams) -> Result<BatchSummary> {
    let profile: &Profile = cfg.profile(name)?;
    let mut batch = profile.batch_config(&args.output);
    batch.params = batch.params.merged(overrides);
    if let Some(n) = args.concurrency.or(cfg.concurrency) {
        batch = batch.with_concurrency(n);
    }

    let transcoder = mediabatch::transcoder::for_backend(profile.backend, &cfg.tool_paths());
    run_batch(transcoder, batch, &args.inputs)
}

fn run_batch<T: Transcoder>(transcoder: T, batch: BatchConfig, inputs: &[PathBuf]) -> Result<BatchSummary> {
    let converter = BatchConverter::new(transcoder, batch);
    let jobs = converter.plan(inputs)?;
    let reporter = ConsoleReporter::new(jobs.len(), current_dir());
    Ok(converter.run(jobs, reporter)?)
}

fn run_visualize(cfg: &AppConfig, audio: &Path, output: &Path, opts: RenderOptions) -> Result<BatchSummary> {
    let jobs = visualize::plan_renders(audio, output, &opts)?;
    let out_dir = jobs
        .first()
        .and_then(|j| j.destination().parent())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| output.to_path_buf());

    let mut batch = BatchConfig::new(&out_dir, &[], "png");
    batch = batch.with_concurrency(NonZeroUsize::new(jobs.len()).unwrap_or(NonZeroUsize::MIN));
    let converter = BatchConverter::new(FfmpegTranscoder::new(cfg.ffmpeg_path.clone()), batch);
    let reporter = ConsoleReporter::new(jobs.len(), &out_dir);
    let summary = converter.run(jobs, reporter)?;
    if summary.succeeded() > 0 {
        println!("saved in {}", out_dir.display());
    }
    Ok(summary)
}

fn print_profiles(cfg: &AppConfig) {
    for (name, p) in &cfg.profiles {
        println!(
            "{:<14} {} -> {}  [{:?}]  {}",
            name,
            p.source_extensions.join(","),
            p.target_extension,
            p.backend,
            p.description
        );
    }
}

fn write_summary(summary: &BatchSummary, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(summary).context("serializing summary")?;
    fs::write(path, json).with_context(|| format!("writing summary {}", path.display()))?;
    Ok(())
}

fn current_dir() -> PathBuf {
    std::env::current_dir()
        .map(|d| display_base(&d))
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Destinations are canonical, so the base they are shown against must be too.
fn display_base(dir: &Path) -> PathBuf {
    fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf())
}
