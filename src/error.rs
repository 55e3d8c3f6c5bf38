use std::path::PathBuf;

use thiserror::Error;

/// Failures talking to the external download engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to start yt-dlp ({path}): {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not prepare bundled yt-dlp: {0}")]
    Bundle(#[source] std::io::Error),

    #[error("could not create output folder {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while reading yt-dlp output: {0}")]
    Io(#[from] std::io::Error),

    #[error("yt-dlp returned unreadable metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("yt-dlp exited with {code}: {message}")]
    ExitStatus { code: String, message: String },

    #[error("yt-dlp did not expose its {0} stream")]
    MissingPipe(&'static str),
}

/// Misuse of the tracker's batch lifecycle.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("a batch is already active")]
    BatchActive,

    #[error("no active batch")]
    NoActiveBatch,
}

/// Reasons a download request is rejected before any work starts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StartError {
    #[error("Please enter a playlist URL")]
    EmptyUrl,

    #[error("A download is already running")]
    AlreadyRunning,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("could not serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}
