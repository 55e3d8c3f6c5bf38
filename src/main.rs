//! Entry point: settings, logging, runtime, then the window or a headless run.

use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use tokio::runtime::Runtime;
use tracing::{info, warn};

use playlist_downloader::{
    app,
    cli::Args,
    config::Settings,
    engine::Engine,
    headless, logging,
    model::BatchStatus,
    session::{DownloadRequest, Session},
    tracker::LogObserver,
};

/// How long a closing app waits for the engine to be killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn main() -> Result<()> {
    let args = Args::parse();

    if args.generate_config {
        print!("{}", Settings::default().to_toml()?);
        return Ok(());
    }

    let config_path = args.config.clone().unwrap_or_else(Settings::config_path);
    // logging is not up yet; report the outcome once it is
    let loaded = Settings::load_if_present(&config_path);
    let (mut settings, config_found, config_error) = match loaded {
        Ok(Some(settings)) => (settings, true, None),
        Ok(None) => (Settings::default(), false, None),
        Err(e) => (Settings::default(), true, Some(e)),
    };
    args.apply_to(&mut settings);

    let log_dir = settings.log_dir.clone().unwrap_or_else(Settings::default_log_dir);
    let _log_guard = logging::init_logging(&log_dir, args.verbose);
    info!(
        config = %config_path.display(),
        found = config_found,
        download_dir = %settings.download_dir.display(),
        "starting"
    );
    if let Some(e) = config_error {
        warn!("{e}; using defaults");
    }

    let runtime = Runtime::new().context("could not start the async runtime")?;
    let engine = Engine::from_settings(&settings)?;
    let mut session = Session::new(runtime.handle().clone(), engine);
    session.subscribe(Box::new(LogObserver));

    let outcome = if args.headless {
        run_headless(&runtime, session, &settings, args.url)
    } else {
        // the app owns the session and drops it when the window closes
        app::run(session, runtime.handle().clone(), &settings, args.url)
            .map_err(|e| anyhow!("window closed with an error: {e}"))
    };

    // drops any engine task still alive, which kills its child process
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    outcome
}

fn run_headless(runtime: &Runtime, mut session: Session, settings: &Settings, url: Option<String>) -> Result<()> {
    let url = url.context("--headless needs a playlist URL")?;
    let request = DownloadRequest {
        url,
        output_dir: settings.download_dir.clone(),
        quality: settings.quality,
        ignore_errors: settings.ignore_errors,
    };
    match runtime.block_on(headless::run(&mut session, request))? {
        BatchStatus::Completed => Ok(()),
        BatchStatus::Failed(message) => bail!(message),
        other => bail!("download stopped unexpectedly ({other:?})"),
    }
}
