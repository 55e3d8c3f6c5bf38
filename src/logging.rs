use std::path::Path;

use tracing_appender::{
    non_blocking,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    filter::{LevelFilter, Targets},
    fmt::Layer,
    layer::SubscriberExt,
    prelude::*,
};

const CRATE_TARGET: &str = "playlist_downloader";
const MAX_DAYS: usize = 7;

/// Keeps the non-blocking writers flushing; hold it until exit.
#[must_use]
pub struct LogGuard {
    _guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
}

/// Installs a stderr layer plus a daily rolling file in `log_dir`. If the
/// log directory cannot be used, only stderr logging is set up.
pub fn init_logging(log_dir: &Path, verbose: bool) -> LogGuard {
    let console_level = if verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
    let (stderr, stderr_guard) = non_blocking(std::io::stderr());
    let mut guards = vec![stderr_guard];

    let console = Layer::new()
        .with_ansi(true)
        .with_writer(stderr)
        .with_filter(
            Targets::new()
                .with_default(LevelFilter::WARN)
                .with_target(CRATE_TARGET, console_level),
        );

    let file_layer = match RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("playlist-downloader")
        .filename_suffix("log")
        .max_log_files(MAX_DAYS)
        .build(log_dir)
    {
        Ok(appender) => {
            let (writer, guard) = non_blocking(appender);
            guards.push(guard);
            Some(
                Layer::new().with_ansi(false).with_writer(writer).with_filter(
                    Targets::new()
                        .with_default(LevelFilter::INFO)
                        .with_target(CRATE_TARGET, LevelFilter::DEBUG),
                ),
            )
        }
        Err(e) => {
            eprintln!("file logging disabled ({}): {e}", log_dir.display());
            None
        }
    };

    tracing_subscriber::registry().with(console).with(file_layer).init();

    LogGuard { _guards: guards }
}
