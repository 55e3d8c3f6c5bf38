//! Batch and item state driven by engine progress reports.
//!
//! The tracker is owned by the UI thread. Worker output reaches it as
//! messages (see [`crate::session`]) so every mutation here runs serially
//! and no locking is needed.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::error::TrackerError;
use crate::model::{BatchStatus, BatchSummary, Item, ItemSpec, Phase};
use crate::progress::{EventStatus, ProgressEvent, format_bytes, format_total, parse_percent};

/// Overall fraction shown while metadata is being fetched.
const FETCHING_PROGRESS: f32 = 0.05;

/// Receives tracker changes on the thread that owns the tracker.
pub trait TrackerObserver {
    fn batch_registered(&mut self, _title: &str, _items: &[Item]) {}
    fn item_changed(&mut self, _item: &Item) {}
    fn status_changed(&mut self, _status: &BatchStatus) {}
}

/// Writes batch and item transitions to the log.
#[derive(Debug, Default)]
pub struct LogObserver;

impl TrackerObserver for LogObserver {
    fn batch_registered(&mut self, title: &str, items: &[Item]) {
        info!(title, count = items.len(), "playlist resolved");
    }

    fn item_changed(&mut self, item: &Item) {
        match item.phase {
            Phase::Downloading => debug!(id = %item.id, progress = item.progress, "downloading"),
            Phase::Merging => info!(
                index = item.index,
                title = %item.title,
                size = %format_total(item.final_size),
                "transfer finished, merging"
            ),
            Phase::Done => info!(index = item.index, title = %item.title, "done"),
            Phase::Failed => warn!(
                index = item.index,
                title = %item.title,
                error = item.error.as_deref().unwrap_or("unknown"),
                "item failed"
            ),
            Phase::Waiting => {}
        }
    }

    fn status_changed(&mut self, status: &BatchStatus) {
        match status {
            BatchStatus::Failed(message) => warn!(%message, "batch failed"),
            other => info!(status = ?other, "batch status"),
        }
    }
}

/// Validated form of a [`ProgressEvent`].
enum Update {
    Downloading {
        id: String,
        fraction: f32,
        percent: String,
    },
    Finished {
        id: String,
    },
}

/// State of the one batch the application shows.
#[derive(Default)]
pub struct ProgressTracker {
    /// URL the batch was started from
    source_url: Option<String>,
    /// Playlist title, known once metadata resolved
    title: Option<String>,
    /// Items in playlist order
    items: Vec<Item>,
    /// Item id -> position in `items`
    index: HashMap<String, usize>,
    /// Item the engine reported last
    current: Option<String>,
    /// Percent string of the current item, for the status line
    current_percent: Option<String>,
    /// Latest rate reported for any item
    speed: Option<String>,
    status: BatchStatus,
    observers: Vec<Box<dyn TrackerObserver>>,
}

impl ProgressTracker {
    /// An idle tracker with no batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an observer; it sees every change from now on.
    pub fn subscribe(&mut self, observer: Box<dyn TrackerObserver>) {
        self.observers.push(observer);
    }

    /// Drops the previous batch and starts resolving `url`.
    pub fn begin(&mut self, url: &str) {
        self.clear();
        self.source_url = Some(url.to_owned());
        self.set_status(BatchStatus::FetchingInfo);
    }

    /// Drops the previous batch entirely.
    pub fn reset(&mut self) {
        self.clear();
        self.set_status(BatchStatus::Idle);
    }

    fn clear(&mut self) {
        self.source_url = None;
        self.title = None;
        self.items.clear();
        self.index.clear();
        self.current = None;
        self.current_percent = None;
        self.speed = None;
    }

    /// Establishes the item set of a new batch, in playlist order.
    pub fn register_batch(&mut self, title: &str, items: Vec<ItemSpec>) -> Result<(), TrackerError> {
        if self.status.is_active() {
            return Err(TrackerError::BatchActive);
        }

        let source_url = self.source_url.take();
        self.clear();
        self.source_url = source_url;
        self.title = Some(title.to_owned());

        for entry in items {
            if self.index.contains_key(&entry.id) {
                warn!(id = %entry.id, "duplicate playlist entry ignored");
                continue;
            }
            let position = self.items.len();
            self.index.insert(entry.id.clone(), position);
            self.items
                .push(Item::new(entry.id, entry.title, position + 1).with_thumbnail(entry.thumbnail_url));
        }

        for observer in &mut self.observers {
            observer.batch_registered(title, &self.items);
        }
        self.set_status(BatchStatus::Ready);
        Ok(())
    }

    /// Applies one engine report. Returns `false` when the event was
    /// malformed and discarded without touching any state.
    pub fn on_progress_event(&mut self, event: &ProgressEvent) -> bool {
        let Some(update) = Self::validate(event) else {
            debug!(?event, "discarding malformed progress event");
            return false;
        };

        let id = match &update {
            Update::Downloading { id, .. } | Update::Finished { id } => id.clone(),
        };

        if self.current.as_deref() != Some(id.as_str()) {
            if let Some(previous) = self.current.take() {
                self.force_done(&previous);
            }
            self.current = Some(id.clone());
            self.current_percent = None;
        }

        match update {
            Update::Downloading { id, fraction, percent } => {
                if let Some(speed) = &event.speed {
                    self.speed = Some(speed.clone());
                }
                self.current_percent = Some(percent);
                let total = event.best_total();
                self.update_item(&id, |item| {
                    if item.phase.is_terminal() {
                        return;
                    }
                    if item.phase == Phase::Downloading {
                        item.progress = item.progress.max(fraction);
                    } else {
                        item.phase = Phase::Downloading;
                        item.progress = fraction;
                    }
                    if let Some(downloaded) = event.downloaded_bytes {
                        item.downloaded_bytes = downloaded;
                    }
                    if total.is_some() {
                        item.total_bytes = total;
                    }
                    if event.speed.is_some() {
                        item.speed = event.speed.clone();
                    }
                });
                if self.status != BatchStatus::Downloading && !self.status.is_finished() {
                    self.set_status(BatchStatus::Downloading);
                }
            }
            Update::Finished { id } => {
                let size = event.best_total().or(event.downloaded_bytes);
                self.update_item(&id, |item| {
                    if item.phase.is_terminal() {
                        return;
                    }
                    item.phase = Phase::Merging;
                    item.progress = 1.0;
                    item.final_size = size;
                    if let Some(size) = size {
                        item.downloaded_bytes = size;
                    }
                });
            }
        }
        true
    }

    /// The engine's blocking download returned: whatever is still in
    /// flight is done and the batch is complete.
    pub fn finalize_batch(&mut self) -> Result<(), TrackerError> {
        if !self.status.is_active() {
            return Err(TrackerError::NoActiveBatch);
        }
        if let Some(current) = self.current.take() {
            self.force_done(&current);
        }
        self.current_percent = None;
        self.set_status(BatchStatus::Completed);
        Ok(())
    }

    /// Ends the batch with `message`. Item states are kept as they are.
    pub fn fail_batch(&mut self, message: impl Into<String>) {
        self.current_percent = None;
        self.set_status(BatchStatus::Failed(message.into()));
    }

    /// Marks a single item failed. `Waiting` and `Downloading` items can
    /// fail, and so can a `Done` that was only inferred: engine errors travel
    /// on another stream and may land after the next item started.
    /// Returns whether the item changed.
    pub fn mark_item_failed(&mut self, id: &str, message: &str) -> bool {
        let Some(&position) = self.index.get(id) else {
            return false;
        };
        let item = &self.items[position];
        let can_fail = match item.phase {
            Phase::Waiting | Phase::Downloading => true,
            Phase::Done => item.completion_inferred,
            Phase::Merging | Phase::Failed => false,
        };
        if !can_fail {
            return false;
        }
        if self.current.as_deref() == Some(id) {
            self.current = None;
            self.current_percent = None;
        }
        self.update_item(id, |item| {
            item.phase = Phase::Failed;
            item.error = Some(message.to_owned());
            item.completion_inferred = false;
        });
        true
    }

    fn validate(event: &ProgressEvent) -> Option<Update> {
        let id = event.item_id.as_deref().map(str::trim).filter(|id| !id.is_empty())?;
        match &event.status {
            EventStatus::Downloading => {
                let percent = event.percent.as_deref()?;
                let fraction = parse_percent(percent)?;
                Some(Update::Downloading {
                    id: id.to_owned(),
                    fraction,
                    percent: percent.trim().to_owned(),
                })
            }
            EventStatus::Finished => Some(Update::Finished { id: id.to_owned() }),
            EventStatus::Other(_) => None,
        }
    }

    fn force_done(&mut self, id: &str) {
        self.update_item(id, |item| {
            if item.phase.is_terminal() {
                return;
            }
            // a merging item already had its `finished` report
            item.completion_inferred = item.phase != Phase::Merging;
            item.phase = Phase::Done;
            item.progress = 1.0;
        });
    }

    fn update_item(&mut self, id: &str, apply: impl FnOnce(&mut Item)) {
        let Some(&position) = self.index.get(id) else {
            return;
        };
        let item = &mut self.items[position];
        let before = item.clone();
        apply(item);
        if *item != before {
            for observer in &mut self.observers {
                observer.item_changed(item);
            }
        }
    }

    fn set_status(&mut self, status: BatchStatus) {
        if self.status == status {
            return;
        }
        self.status = status;
        for observer in &mut self.observers {
            observer.status_changed(&self.status);
        }
    }

    pub fn source_url(&self) -> Option<&str> {
        self.source_url.as_deref()
    }

    /// Playlist (or single video) title once resolved.
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// All items in playlist order.
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Looks an item up by engine id.
    pub fn item(&self, id: &str) -> Option<&Item> {
        self.index.get(id).map(|&position| &self.items[position])
    }

    /// Identifier of the item currently receiving bytes.
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn status(&self) -> &BatchStatus {
        &self.status
    }

    /// Phase counters, latest speed and overall fraction.
    pub fn summary(&self) -> BatchSummary {
        let mut summary = BatchSummary {
            total: self.items.len(),
            speed: self.speed.clone(),
            ..BatchSummary::default()
        };
        let mut in_flight = 0.0;
        for item in &self.items {
            match item.phase {
                Phase::Waiting => summary.waiting += 1,
                Phase::Downloading => {
                    summary.downloading += 1;
                    in_flight += item.progress;
                }
                Phase::Merging => summary.merging += 1,
                Phase::Done => summary.done += 1,
                Phase::Failed => summary.failed += 1,
            }
        }

        summary.overall = match self.status {
            BatchStatus::Idle | BatchStatus::Failed(_) => 0.0,
            BatchStatus::FetchingInfo => FETCHING_PROGRESS,
            BatchStatus::Completed => 1.0,
            BatchStatus::Ready | BatchStatus::Downloading if summary.total == 0 => 0.0,
            BatchStatus::Ready | BatchStatus::Downloading => {
                let settled = (summary.done + summary.merging + summary.failed) as f32;
                ((settled + in_flight) / summary.total as f32).clamp(0.0, 1.0)
            }
        };
        summary
    }

    /// One-line description of the batch for the status bar.
    pub fn status_line(&self) -> String {
        match &self.status {
            BatchStatus::Idle => "Ready".to_owned(),
            BatchStatus::FetchingInfo => "🔍 Fetching playlist info...".to_owned(),
            BatchStatus::Ready => format!("✨ Found {} videos", self.items.len()),
            BatchStatus::Downloading => match &self.current_percent {
                Some(percent) => format!("⬇ Downloading... {percent}"),
                None => "⚡ Starting downloads...".to_owned(),
            },
            BatchStatus::Completed => {
                let failed = self.items.iter().filter(|i| i.phase == Phase::Failed).count();
                if failed == 0 {
                    "🎉 All downloads completed!".to_owned()
                } else {
                    format!("🎉 Downloads completed ({failed} failed)")
                }
            }
            BatchStatus::Failed(message) => format!("❌ Error: {message}"),
        }
    }
}

/// Secondary line of an item card: bytes, total and rate.
pub fn item_detail(item: &Item) -> String {
    match item.phase {
        Phase::Waiting | Phase::Done => String::new(),
        Phase::Downloading => format!(
            "📥 {} / {} • {}",
            format_bytes(item.downloaded_bytes),
            format_total(item.total_bytes),
            item.speed.as_deref().unwrap_or("N/A")
        ),
        Phase::Merging => format!("✓ {}", format_total(item.final_size)),
        Phase::Failed => item.error.clone().unwrap_or_default(),
    }
}
