use std::time::Duration;

use tracing::info;

use crate::error::StartError;
use crate::model::BatchStatus;
use crate::session::{DownloadRequest, Session};
use crate::tracker::ProgressTracker;

const REPORT_EVERY: Duration = Duration::from_secs(5);

/// Downloads one batch without a window, logging progress periodically.
/// Returns the terminal batch status.
pub async fn run(session: &mut Session, request: DownloadRequest) -> Result<BatchStatus, StartError> {
    session.start(request)?;

    let mut ticker = tokio::time::interval(REPORT_EVERY);
    ticker.tick().await;

    while !session.tracker().status().is_finished() {
        let report_due = tokio::select! {
            _ = ticker.tick() => true,
            _ = session.recv() => false,
        };
        if report_due {
            report(session.tracker());
        }
        if !session.is_running() {
            // worker is gone; whatever it sent is already queued
            session.pump();
            break;
        }
    }

    report(session.tracker());
    Ok(session.tracker().status().clone())
}

fn report(tracker: &ProgressTracker) {
    let summary = tracker.summary();
    info!(
        status = %tracker.status_line(),
        done = summary.done,
        failed = summary.failed,
        total = summary.total,
        overall = %format!("{:.0}%", summary.overall * 100.0),
        speed = summary.speed.as_deref().unwrap_or("-"),
        "progress"
    );
}
