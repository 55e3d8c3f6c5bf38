//! Owns the tracker on the UI thread and runs one engine worker at a time.
//!
//! The worker never touches the tracker. It sends [`EngineMessage`]s over a
//! channel, tagged with the batch they belong to, and the owning thread
//! applies them in order through [`Session::pump`] or [`Session::recv`].

use std::path::PathBuf;

use tokio::runtime::Handle;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Quality;
use crate::engine::{Engine, EngineOutput, PlaylistInfo};
use crate::error::{EngineError, StartError};
use crate::progress::{ItemError, ProgressEvent};
use crate::tracker::{ProgressTracker, TrackerObserver};

/// What the user asked to download
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadRequest {
    pub url: String,
    pub output_dir: PathBuf,
    pub quality: Quality,
    pub ignore_errors: bool,
}

/// Generation counter; messages from older batches are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchId(u64);

impl BatchId {
    fn next(self) -> Self {
        BatchId(self.0 + 1)
    }
}

/// Worker -> UI thread
#[derive(Debug, Clone, PartialEq)]
pub enum EngineMessage {
    Resolved(PlaylistInfo),
    Progress(ProgressEvent),
    ItemFailed(ItemError),
    /// Engine download returned normally
    Finished,
    /// Batch aborted with this message
    Failed(String),
}

impl From<EngineOutput> for EngineMessage {
    fn from(output: EngineOutput) -> Self {
        match output {
            EngineOutput::Progress(event) => EngineMessage::Progress(event),
            EngineOutput::ItemError(error) => EngineMessage::ItemFailed(error),
        }
    }
}

type Envelope = (BatchId, EngineMessage);

pub struct Session {
    runtime: Handle,
    engine: Engine,
    tracker: ProgressTracker,
    tx: UnboundedSender<Envelope>,
    rx: UnboundedReceiver<Envelope>,
    batch: BatchId,
    worker: Option<JoinHandle<()>>,
}

impl Session {
    pub fn new(runtime: Handle, engine: Engine) -> Self {
        let (tx, rx) = unbounded_channel();
        Self {
            runtime,
            engine,
            tracker: ProgressTracker::new(),
            tx,
            rx,
            batch: BatchId::default(),
            worker: None,
        }
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    pub fn subscribe(&mut self, observer: Box<dyn TrackerObserver>) {
        self.tracker.subscribe(observer);
    }

    /// Whether a worker is still running for the current batch.
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Starts a new batch. The previous batch view is discarded.
    pub fn start(&mut self, request: DownloadRequest) -> Result<BatchId, StartError> {
        let url = request.url.trim().to_owned();
        if url.is_empty() {
            return Err(StartError::EmptyUrl);
        }
        if self.is_running() {
            debug!("download requested while another is running");
            return Err(StartError::AlreadyRunning);
        }

        self.batch = self.batch.next();
        self.tracker.begin(&url);
        info!(
            %url,
            output_dir = %request.output_dir.display(),
            quality = %request.quality,
            "starting batch"
        );

        let request = DownloadRequest { url, ..request };
        let worker = run_batch(self.engine.clone(), request, self.batch, self.tx.clone());
        self.worker = Some(self.runtime.spawn(worker));
        Ok(self.batch)
    }

    /// Stops the worker (killing the engine) and clears the view.
    pub fn cancel(&mut self) {
        if let Some(worker) = self.worker.take() {
            if !worker.is_finished() {
                info!("cancelling running batch");
            }
            worker.abort();
        }
        self.batch = self.batch.next();
        self.tracker.reset();
    }

    /// Applies every pending message without blocking. Returns how many
    /// messages were applied.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Ok((batch, message)) = self.rx.try_recv() {
            if self.accept(batch, message) {
                applied += 1;
            }
        }
        applied
    }

    /// Waits for the next message and applies it.
    pub async fn recv(&mut self) -> bool {
        match self.rx.recv().await {
            Some((batch, message)) => self.accept(batch, message),
            None => false,
        }
    }

    fn accept(&mut self, batch: BatchId, message: EngineMessage) -> bool {
        if batch != self.batch {
            debug!(?batch, current = ?self.batch, "dropping message from previous batch");
            return false;
        }
        apply_message(&mut self.tracker, message);
        true
    }
}

impl Drop for Session {
    // a detached worker would keep the engine running after the window closes
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

/// Applies one worker message to the tracker.
pub fn apply_message(tracker: &mut ProgressTracker, message: EngineMessage) {
    match message {
        EngineMessage::Resolved(info) => {
            if let Err(e) = tracker.register_batch(&info.title, info.entries) {
                warn!("could not register {}: {e}", info.title);
            }
        }
        EngineMessage::Progress(event) => {
            tracker.on_progress_event(&event);
        }
        EngineMessage::ItemFailed(error) => match error.item_id {
            Some(id) => {
                if !tracker.mark_item_failed(&id, &error.message) {
                    debug!(%id, message = %error.message, "engine error for untracked item");
                }
            }
            // may belong to any item; stderr lags behind progress output
            None => warn!(message = %error.message, "engine error"),
        },
        EngineMessage::Finished => {
            if let Err(e) = tracker.finalize_batch() {
                warn!("finish without an active batch: {e}");
            }
        }
        EngineMessage::Failed(message) => tracker.fail_batch(message),
    }
}

async fn run_batch(engine: Engine, request: DownloadRequest, batch: BatchId, tx: UnboundedSender<Envelope>) {
    let last = match drive(&engine, &request, batch, &tx).await {
        Ok(()) => EngineMessage::Finished,
        Err(e) => EngineMessage::Failed(e.to_string()),
    };
    // receiver gone means the session was dropped
    let _ = tx.send((batch, last));
}

async fn drive(
    engine: &Engine,
    request: &DownloadRequest,
    batch: BatchId,
    tx: &UnboundedSender<Envelope>,
) -> Result<(), EngineError> {
    tokio::fs::create_dir_all(&request.output_dir)
        .await
        .map_err(|source| EngineError::OutputDir {
            path: request.output_dir.clone(),
            source,
        })?;

    let info = engine.extract_info(&request.url).await?;
    info!(title = %info.title, entries = info.entries.len(), "metadata resolved");
    let _ = tx.send((batch, EngineMessage::Resolved(info)));

    let options = engine.options(request.quality, &request.output_dir, request.ignore_errors);
    let sink = {
        let tx = tx.clone();
        move |output: EngineOutput| {
            let _ = tx.send((batch, output.into()));
        }
    };
    engine.download(&request.url, &options, sink).await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::model::{BatchStatus, ItemSpec, Phase};

    fn request(url: &str) -> DownloadRequest {
        DownloadRequest {
            url: url.to_owned(),
            output_dir: std::env::temp_dir().join(format!("playlist-downloader-test-{}", std::process::id())),
            quality: Quality::default(),
            ignore_errors: true,
        }
    }

    fn broken_session() -> Session {
        Session::new(Handle::current(), Engine::new("/nonexistent/dir/yt-dlp"))
    }

    fn resolved() -> EngineMessage {
        EngineMessage::Resolved(PlaylistInfo {
            title: "Mix".into(),
            entries: vec![ItemSpec::new("a", "T1"), ItemSpec::new("b", "T2")],
            is_playlist: true,
        })
    }

    #[tokio::test]
    async fn empty_url_is_rejected() {
        let mut session = broken_session();
        assert_eq!(session.start(request("   ")), Err(StartError::EmptyUrl));
        assert_eq!(session.tracker().status(), &BatchStatus::Idle);
        assert!(!session.is_running());
    }

    #[tokio::test]
    async fn spawn_failure_fails_batch() {
        let mut session = broken_session();
        session.start(request(" https://example.com/playlist ")).unwrap();
        assert_eq!(session.tracker().source_url(), Some("https://example.com/playlist"));

        // worker has not been polled yet on this single-threaded runtime
        assert_eq!(session.start(request("https://example.com/other")), Err(StartError::AlreadyRunning));

        tokio::time::timeout(Duration::from_secs(10), async {
            while !session.tracker().status().is_finished() {
                session.recv().await;
            }
        })
        .await
        .unwrap();

        match session.tracker().status() {
            BatchStatus::Failed(message) => assert!(message.contains("failed to start yt-dlp"), "{message}"),
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_resets_and_allows_restart() {
        let mut session = broken_session();
        session.start(request("https://example.com/a")).unwrap();
        session.cancel();
        assert!(!session.is_running());
        assert_eq!(session.tracker().status(), &BatchStatus::Idle);
        assert!(session.tracker().items().is_empty());
        assert!(session.start(request("https://example.com/b")).is_ok());
    }

    #[tokio::test]
    async fn stale_messages_are_dropped() {
        let mut session = broken_session();
        let current = session.batch;
        session.tx.send((current, resolved())).unwrap();
        session
            .tx
            .send((current.next(), EngineMessage::Progress(ProgressEvent::downloading("a", "50%"))))
            .unwrap();
        session
            .tx
            .send((current, EngineMessage::Progress(ProgressEvent::downloading("b", "20%"))))
            .unwrap();

        assert_eq!(session.pump(), 2);
        let tracker = session.tracker();
        assert_eq!(tracker.item("a").unwrap().phase, Phase::Waiting);
        assert_eq!(tracker.item("b").unwrap().phase, Phase::Downloading);
    }

    #[test]
    fn item_errors_mark_items_failed() {
        let mut tracker = ProgressTracker::new();
        apply_message(&mut tracker, resolved());
        apply_message(
            &mut tracker,
            EngineMessage::ItemFailed(ItemError {
                item_id: Some("b".into()),
                message: "Private video".into(),
            }),
        );
        apply_message(&mut tracker, EngineMessage::Progress(ProgressEvent::downloading("a", "100%")));
        apply_message(&mut tracker, EngineMessage::Finished);

        assert_eq!(tracker.item("a").unwrap().phase, Phase::Done);
        assert_eq!(tracker.item("b").unwrap().phase, Phase::Failed);
        assert_eq!(tracker.status(), &BatchStatus::Completed);
    }

    #[test]
    fn anonymous_errors_leave_items_alone() {
        let mut tracker = ProgressTracker::new();
        apply_message(&mut tracker, resolved());
        apply_message(&mut tracker, EngineMessage::Progress(ProgressEvent::downloading("a", "30%")));
        apply_message(
            &mut tracker,
            EngineMessage::ItemFailed(ItemError {
                item_id: None,
                message: "unable to download video data: HTTP Error 403: Forbidden".into(),
            }),
        );

        assert_eq!(tracker.item("a").unwrap().phase, Phase::Downloading);
        assert_eq!(tracker.current(), Some("a"));
        assert_eq!(tracker.summary().failed, 0);
    }
}
