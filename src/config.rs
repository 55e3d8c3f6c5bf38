use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const APP_DIR: &str = "playlist-downloader";

/// Quality presets offered in the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    Highest,
    #[serde(rename = "1080p")]
    #[value(name = "1080p")]
    P1080,
    #[serde(rename = "720p")]
    #[value(name = "720p")]
    P720,
    #[serde(rename = "audio")]
    #[value(name = "audio")]
    AudioOnly,
}

impl Quality {
    pub const ALL: [Quality; 4] = [Quality::Highest, Quality::P1080, Quality::P720, Quality::AudioOnly];

    /// Format selector handed to the engine's `-f`.
    pub fn format_selector(self) -> &'static str {
        match self {
            Quality::Highest => "bestvideo+bestaudio/best",
            Quality::P1080 => "bestvideo[height<=1080]+bestaudio/best[height<=1080]",
            Quality::P720 => "bestvideo[height<=720]+bestaudio/best[height<=720]",
            Quality::AudioOnly => "bestaudio/best",
        }
    }

    /// Container the engine muxes into.
    pub fn merge_format(self) -> &'static str {
        match self {
            Quality::AudioOnly => "m4a",
            _ => "mp4",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Quality::Highest => "Highest",
            Quality::P1080 => "1080p",
            Quality::P720 => "720p",
            Quality::AudioOnly => "Audio Only",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// User settings read from `config.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Where playlists are saved
    pub download_dir: PathBuf,
    pub quality: Quality,
    /// Explicit yt-dlp binary; bundled copy or `PATH` otherwise
    pub yt_dlp_path: Option<PathBuf>,
    /// Folder containing ffmpeg; next to the executable otherwise
    pub ffmpeg_location: Option<PathBuf>,
    /// Keep going when single entries fail
    pub ignore_errors: bool,
    /// Directory for rolling log files
    pub log_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            quality: Quality::default(),
            yt_dlp_path: None,
            ffmpeg_location: None,
            ignore_errors: true,
            log_dir: None,
        }
    }
}

impl Settings {
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    pub fn default_log_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_DIR)
            .join("logs")
    }

    pub fn from_toml_str(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content, path)
    }

    /// Missing file means defaults (`Ok(None)` -> caller falls back).
    pub fn load_if_present(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        Self::load(path).map(Some)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// The user's download folder, computed once per start.
pub fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("./downloads"))
}
