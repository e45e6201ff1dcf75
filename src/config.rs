//! Conversion profiles and tool locations.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::ConfigError;
use crate::job::{BatchConfig, ConversionParams};
use crate::transcoder::{Backend, ToolPaths};

const CONFIG_STEM: &str = "mediabatch";

/// A named source → target conversion.
#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    /// Extensions picked from input directories
    pub source_extensions: Vec<String>,
    /// Extension of the produced files
    pub target_extension: String,
    pub backend: Backend,
    /// Default parameters, overridable per run
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub description: String,
}

impl Profile {
    /// Batch settings for this profile writing into `output_dir`.
    pub fn batch_config(&self, output_dir: impl Into<PathBuf>) -> BatchConfig {
        let exts: Vec<&str> = self.source_extensions.iter().map(String::as_str).collect();
        BatchConfig::new(output_dir, &exts, &self.target_extension)
            .with_params(self.params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect::<ConversionParams>())
    }
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_heif_convert_path() -> PathBuf {
    PathBuf::from("heif-convert")
}

/// Application configuration
///
/// Profiles read from a file are layered over the built-in ones; a file entry
/// with a built-in name replaces it.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    #[serde(default = "default_heif_convert_path")]
    pub heif_convert_path: PathBuf,
    /// Worker count when none is given on the command line
    #[serde(default)]
    pub concurrency: Option<NonZeroUsize>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let default_json = r#"{
            "profiles": {
                "heic-to-png": {
                    "description": "HEIC/HEIF photos to PNG",
                    "source_extensions": ["heic", "heif"],
                    "target_extension": "png",
                    "backend": "heif"
                },
                "video-to-wav": {
                    "description": "Audio track of MOV/MP4/MKV video to 16-bit PCM WAV",
                    "source_extensions": ["mov", "mp4", "m4v", "mkv"],
                    "target_extension": "wav",
                    "backend": "ffmpeg",
                    "params": {"vn": "", "acodec": "pcm_s16le", "ar": "44100", "ac": "2", "f": "wav"}
                },
                "audio-to-mp3": {
                    "description": "Audio files to MP3 (VBR quality 2)",
                    "source_extensions": ["wav", "flac", "m4a", "ogg", "aiff"],
                    "target_extension": "mp3",
                    "backend": "ffmpeg",
                    "params": {"vn": "", "acodec": "libmp3lame", "q:a": "2"}
                },
                "image-to-png": {
                    "description": "JPEG/BMP/TIFF/WebP images to PNG",
                    "source_extensions": ["jpg", "jpeg", "bmp", "tif", "tiff", "webp"],
                    "target_extension": "png",
                    "backend": "image"
                }
            }
        }"#;
        serde_json::from_str(default_json).expect("built-in config is valid")
    }
}

impl AppConfig {
    /// Parse a config file; `.toml` files are read as TOML, anything else as JSON.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_err = |reason: String| ConfigError::Parse {
            path: path.to_path_buf(),
            reason,
        };
        let is_toml = path.extension().is_some_and(|e| e.eq_ignore_ascii_case("toml"));
        let cfg: Self = if is_toml {
            toml::from_str(&text).map_err(|e| parse_err(e.to_string()))?
        } else {
            serde_json::from_str(&text).map_err(|e| parse_err(e.to_string()))?
        };
        Ok(cfg.over_builtin_profiles())
    }

    fn over_builtin_profiles(mut self) -> Self {
        let mut profiles = Self::default().profiles;
        profiles.append(&mut self.profiles);
        self.profiles = profiles;
        self
    }

    /// Load `explicit` if given, else the first config found in the data
    /// directory or the current directory, else the built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        for p in candidate_paths() {
            if p.is_file() {
                debug!(path = %p.display(), "loading config");
                return Self::from_file(&p);
            }
        }
        Ok(Self::default())
    }

    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles.get(name).ok_or_else(|| ConfigError::UnknownProfile {
            name: name.to_string(),
            available: self.profiles.keys().cloned().collect::<Vec<_>>().join(", "),
        })
    }

    pub fn tool_paths(&self) -> ToolPaths {
        ToolPaths {
            ffmpeg: self.ffmpeg_path.clone(),
            heif_convert: self.heif_convert_path.clone(),
        }
    }
}

fn candidate_paths() -> Vec<PathBuf> {
    let mut tried = Vec::new();
    if let Some(d) = dirs::data_dir() {
        let d = d.join(CONFIG_STEM);
        tried.push(d.join(format!("{}.json", CONFIG_STEM)));
        tried.push(d.join(format!("{}.toml", CONFIG_STEM)));
    }
    tried.push(PathBuf::from(format!("{}.json", CONFIG_STEM)));
    tried.push(PathBuf::from(format!("{}.toml", CONFIG_STEM)));
    tried
}
