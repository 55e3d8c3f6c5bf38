/// Lifecycle of a single playlist entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Registered, not yet reached by the engine
    #[default]
    Waiting,
    /// Receiving bytes
    Downloading,
    /// Transfer finished, engine still muxing the container
    Merging,
    /// Completed (explicitly or inferred from the next item starting)
    Done,
    /// Engine reported an error for this item
    Failed,
}

impl Phase {
    pub fn label(self) -> &'static str {
        match self {
            Phase::Waiting => "⏳ Waiting",
            Phase::Downloading => "⬇ Downloading",
            Phase::Merging => "🔄 Merging",
            Phase::Done => "✓ Done",
            Phase::Failed => "✗ Failed",
        }
    }

    /// Done and Failed never move again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Failed)
    }
}

/// One downloadable entry of a batch
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    /// Identifier assigned by the engine
    pub id: String,
    /// Human-readable title
    pub title: String,
    /// 1-based position in the source playlist
    pub index: usize,
    pub phase: Phase,
    /// Progress fraction (0.0 to 1.0)
    pub progress: f32,
    pub downloaded_bytes: u64,
    /// `None` when the engine cannot tell
    pub total_bytes: Option<u64>,
    /// Transfer rate as printed by the engine, e.g. `2.31MiB/s`
    pub speed: Option<String>,
    /// Size recorded when the transfer finished
    pub final_size: Option<u64>,
    pub thumbnail_url: Option<String>,
    pub error: Option<String>,
    /// `Done` came from the next item starting, not from a `finished`
    /// report; an engine error for the item may still arrive
    pub completion_inferred: bool,
}

impl Item {
    pub fn new(id: impl Into<String>, title: impl Into<String>, index: usize) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            index,
            phase: Phase::Waiting,
            progress: 0.0,
            downloaded_bytes: 0,
            total_bytes: None,
            speed: None,
            final_size: None,
            thumbnail_url: None,
            error: None,
            completion_inferred: false,
        }
    }

    pub fn with_thumbnail(mut self, url: Option<String>) -> Self {
        self.thumbnail_url = url;
        self
    }
}

/// Entry handed to the tracker when a batch resolves
#[derive(Debug, Clone, PartialEq)]
pub struct ItemSpec {
    pub id: String,
    pub title: String,
    pub thumbnail_url: Option<String>,
}

impl ItemSpec {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            thumbnail_url: None,
        }
    }
}

/// Batch-level state shown above the item list
#[derive(Debug, Clone, PartialEq, Default)]
pub enum BatchStatus {
    /// Nothing submitted
    #[default]
    Idle,
    /// Engine is resolving playlist metadata
    FetchingInfo,
    /// Items registered, no bytes yet
    Ready,
    Downloading,
    Completed,
    /// Batch ended with the given message
    Failed(String),
}

impl BatchStatus {
    /// Registered and not yet in a terminal state.
    pub fn is_active(&self) -> bool {
        matches!(self, BatchStatus::Ready | BatchStatus::Downloading)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed(_))
    }
}

/// Aggregate counters for the active batch
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchSummary {
    pub total: usize,
    pub waiting: usize,
    pub downloading: usize,
    pub merging: usize,
    pub done: usize,
    pub failed: usize,
    /// Latest rate reported by the engine
    pub speed: Option<String>,
    /// Overall progress fraction (0.0 to 1.0)
    pub overall: f32,
}
