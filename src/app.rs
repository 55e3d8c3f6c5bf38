//! egui front-end: a compact form to submit a playlist and a download view
//! that renders the tracker every frame.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

// eframe/egui for GUI application framework
use eframe::{App, Frame, egui};
use egui::{Color32, ColorImage, RichText, TextureOptions, Visuals};
// FileDialog for folder selection dialogs
use rfd::FileDialog;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::config::{Quality, Settings};
use crate::error::StartError;
use crate::model::{BatchStatus, Item, Phase};
use crate::session::{DownloadRequest, Session};
use crate::thumbnail;
use crate::tracker::{TrackerObserver, item_detail};

const ACCENT: Color32 = Color32::from_rgb(0x06, 0xB6, 0xD4);
const SUCCESS: Color32 = Color32::from_rgb(0x10, 0xB9, 0x81);
const WARNING: Color32 = Color32::from_rgb(0xF5, 0x9E, 0x0B);
const ERROR: Color32 = Color32::from_rgb(0xEF, 0x44, 0x44);
const TEXT_SECONDARY: Color32 = Color32::from_rgb(0x9C, 0xA3, 0xAF);

const TITLE_CHARS: usize = 80;
/// Thumbnail downloads allowed in flight at once
const THUMBNAIL_FETCHES: usize = 4;

type ThumbnailQueue = Arc<Mutex<Vec<(String, String)>>>;
type ThumbnailResults = Arc<Mutex<Vec<(String, ColorImage)>>>;

/// Queues thumbnail URLs as soon as a batch resolves.
struct ThumbnailRequests {
    queue: ThumbnailQueue,
}

impl TrackerObserver for ThumbnailRequests {
    fn batch_registered(&mut self, _title: &str, items: &[Item]) {
        let Ok(mut queue) = self.queue.lock() else {
            return;
        };
        queue.extend(
            items
                .iter()
                .filter_map(|item| Some((item.id.clone(), item.thumbnail_url.clone()?))),
        );
    }
}

/// Downloads thumbnails on the runtime's blocking pool, a few at a time.
struct ThumbnailFetcher {
    runtime: Handle,
    permits: Arc<Semaphore>,
    results: ThumbnailResults,
    fetch: fn(&str) -> Option<ColorImage>,
}

impl ThumbnailFetcher {
    fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            permits: Arc::new(Semaphore::new(THUMBNAIL_FETCHES)),
            results: ThumbnailResults::default(),
            fetch: thumbnail::fetch_thumbnail,
        }
    }

    fn queue(&self, id: String, url: String, ctx: egui::Context) {
        let permits = Arc::clone(&self.permits);
        let results = Arc::clone(&self.results);
        let fetch = self.fetch;
        self.runtime.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let image = match tokio::task::spawn_blocking(move || fetch(&url)).await {
                Ok(Some(image)) => image,
                Ok(None) => return,
                Err(e) => {
                    warn!(%id, "thumbnail fetch stopped: {e}");
                    return;
                }
            };
            if let Ok(mut results) = results.lock() {
                results.push((id, image));
            }
            ctx.request_repaint();
        });
    }

    /// Thumbnails fetched since the last call.
    fn take_ready(&self) -> Vec<(String, ColorImage)> {
        match self.results.lock() {
            Ok(mut results) => results.drain(..).collect(),
            Err(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Compact,
    Download,
}

/// Application state for the GUI
pub struct DownloaderApp {
    /// Input field for the playlist URL
    url_input: String,
    /// Destination folder for downloads
    download_folder: String,
    /// Selected quality option
    selected_quality: Quality,
    /// Skip entries the engine cannot fetch
    ignore_errors: bool,
    /// Shown under the form when a request is rejected
    input_error: Option<String>,
    view: View,
    session: Session,
    /// Cached textures for item thumbnails
    thumbnails: HashMap<String, egui::TextureHandle>,
    /// Thumbnails requested by the tracker observer (item id, url)
    pending_thumbnails: ThumbnailQueue,
    fetcher: ThumbnailFetcher,
}

impl DownloaderApp {
    pub fn new(mut session: Session, runtime: Handle, settings: &Settings, url: Option<String>) -> Self {
        let pending_thumbnails = ThumbnailQueue::default();
        session.subscribe(Box::new(ThumbnailRequests {
            queue: Arc::clone(&pending_thumbnails),
        }));
        Self {
            url_input: url.unwrap_or_default(),
            download_folder: settings.download_dir.display().to_string(),
            selected_quality: settings.quality,
            ignore_errors: settings.ignore_errors,
            input_error: None,
            view: View::Compact,
            session,
            thumbnails: HashMap::new(),
            pending_thumbnails,
            fetcher: ThumbnailFetcher::new(runtime),
        }
    }

    fn start_download(&mut self) {
        let request = DownloadRequest {
            url: self.url_input.clone(),
            output_dir: PathBuf::from(self.download_folder.trim()),
            quality: self.selected_quality,
            ignore_errors: self.ignore_errors,
        };
        match self.session.start(request) {
            Ok(_) => {
                self.input_error = None;
                self.thumbnails.clear();
                self.view = View::Download;
            }
            Err(StartError::AlreadyRunning) => self.view = View::Download,
            Err(e) => self.input_error = Some(e.to_string()),
        }
    }

    fn back_to_form(&mut self) {
        self.session.cancel();
        self.thumbnails.clear();
        self.view = View::Compact;
    }

    fn fetch_thumbnails(&mut self, ctx: &egui::Context) {
        let requests: Vec<(String, String)> = match self.pending_thumbnails.lock() {
            Ok(mut pending) => pending.drain(..).collect(),
            Err(_) => return,
        };
        for (id, url) in requests {
            self.fetcher.queue(id, url, ctx.clone());
        }

        // Handle completed thumbnail fetches
        for (id, img) in self.fetcher.take_ready() {
            // thumbnails from a batch that has since been discarded
            if self.session.tracker().item(&id).is_none() {
                continue;
            }
            let tex = ctx.load_texture(&id, img, TextureOptions::default());
            self.thumbnails.insert(id, tex);
        }
    }

    fn compact_view(&mut self, ctx: &egui::Context) {
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("Playlist Downloader");
            ui.add_space(8.0);

            ui.label("Playlist URL:");
            let url_field = ui.add(
                egui::TextEdit::singleline(&mut self.url_input)
                    .hint_text("https://www.youtube.com/playlist?list=...")
                    .desired_width(f32::INFINITY),
            );
            if url_field.changed() {
                self.input_error = None;
            }

            ui.add_space(6.0);
            ui.horizontal(|ui| {
                ui.label("Download folder:");
                ui.text_edit_singleline(&mut self.download_folder);
                if ui.button("Browse…").clicked() {
                    if let Some(folder) = FileDialog::new().set_directory(&self.download_folder).pick_folder() {
                        self.download_folder = folder.display().to_string();
                    }
                }
            });

            ui.add_space(6.0);
            ui.horizontal(|ui| {
                ui.label("Quality:");
                egui::ComboBox::from_id_source("quality")
                    .selected_text(self.selected_quality.label())
                    .show_ui(ui, |ui| {
                        for q in Quality::ALL {
                            ui.selectable_value(&mut self.selected_quality, q, q.label());
                        }
                    });
            });
            ui.checkbox(&mut self.ignore_errors, "Skip videos that fail");

            ui.add_space(10.0);
            let enter = url_field.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
            if ui.button(RichText::new("⬇ Download").strong()).clicked() || enter {
                self.start_download();
            }

            if let Some(error) = &self.input_error {
                ui.colored_label(ERROR, error.as_str());
            }
        });
    }

    fn download_view(&mut self, ctx: &egui::Context) {
        let tracker = self.session.tracker();
        let summary = tracker.summary();
        let status = tracker.status().clone();
        let mut go_back = false;

        egui::TopBottomPanel::top("batch_header").show(ctx, |ui| {
            ui.add_space(6.0);
            ui.horizontal(|ui| {
                ui.heading(tracker.title().unwrap_or("Resolving playlist…"));
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    let label = if status.is_finished() { "New download" } else { "Cancel" };
                    if ui.button(label).clicked() {
                        go_back = true;
                    }
                    if status == BatchStatus::Completed && ui.button("Open Folder").clicked() {
                        open_folder(PathBuf::from(self.download_folder.trim()));
                    }
                });
            });
            if summary.total > 0 {
                ui.label(RichText::new(format!("{} videos", summary.total)).color(TEXT_SECONDARY));
            }

            let status_color = match status {
                BatchStatus::Failed(_) => ERROR,
                BatchStatus::Completed => SUCCESS,
                _ => ACCENT,
            };
            ui.horizontal(|ui| {
                ui.colored_label(status_color, tracker.status_line());
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    ui.label(format!("Speed: {}", summary.speed.as_deref().unwrap_or("N/A")));
                });
            });
            ui.add(egui::ProgressBar::new(summary.overall).show_percentage().fill(status_color));
            ui.add_space(6.0);
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            egui::ScrollArea::vertical().auto_shrink([false; 2]).show(ui, |ui| {
                for item in tracker.items() {
                    item_card(ui, item, self.thumbnails.get(&item.id));
                }
            });
        });

        if go_back {
            self.back_to_form();
        }
    }
}

/// GUI update loop: called each frame to redraw and handle interactions
impl App for DownloaderApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut Frame) {
        // Apply everything the worker sent since the last frame
        self.session.pump();
        self.fetch_thumbnails(ctx);

        match self.view {
            View::Compact => self.compact_view(ctx),
            View::Download => self.download_view(ctx),
        }

        // Request periodic repaint for progress updates
        ctx.request_repaint_after(Duration::from_millis(100));
    }
}

fn item_card(ui: &mut egui::Ui, item: &Item, thumbnail: Option<&egui::TextureHandle>) {
    let (status_text, color) = match item.phase {
        Phase::Waiting => (item.phase.label().to_owned(), TEXT_SECONDARY),
        Phase::Downloading => (format!("⬇ {:.0}%", item.progress * 100.0), ACCENT),
        Phase::Merging => (item.phase.label().to_owned(), WARNING),
        Phase::Done => (item.phase.label().to_owned(), SUCCESS),
        Phase::Failed => (item.phase.label().to_owned(), ERROR),
    };

    ui.group(|ui| {
        ui.horizontal(|ui| {
            // Show thumbnail if available, the playlist index otherwise
            match thumbnail {
                Some(tex) => {
                    ui.add(egui::Image::new(tex).max_height(72.0));
                }
                None => {
                    ui.add_sized(
                        [96.0, 72.0],
                        egui::Label::new(RichText::new(item.index.to_string()).size(24.0).strong().color(ACCENT)),
                    );
                }
            }
            ui.vertical(|ui| {
                ui.label(RichText::new(short_title(&item.title)).strong());
                let detail = item_detail(item);
                if !detail.is_empty() {
                    ui.label(RichText::new(detail).small().color(TEXT_SECONDARY));
                }
                ui.horizontal(|ui| {
                    let bar_color = if item.progress >= 1.0 { SUCCESS } else { color };
                    ui.add(egui::ProgressBar::new(item.progress).desired_width(260.0).fill(bar_color));
                    ui.colored_label(color, status_text);
                });
            });
        });
    });
}

fn short_title(title: &str) -> String {
    if title.chars().count() > TITLE_CHARS {
        let cut: String = title.chars().take(TITLE_CHARS).collect();
        format!("{cut}...")
    } else {
        title.to_owned()
    }
}

fn open_folder(folder: PathBuf) {
    std::thread::spawn(move || {
        #[cfg(target_os = "windows")]
        let result = std::process::Command::new("explorer").arg(&folder).spawn();
        #[cfg(target_os = "macos")]
        let result = std::process::Command::new("open").arg(&folder).spawn();
        #[cfg(all(unix, not(target_os = "macos")))]
        let result = std::process::Command::new("xdg-open").arg(&folder).spawn();
        if let Err(e) = result {
            warn!(folder = %folder.display(), "could not open folder: {e}");
        }
    });
}

/// Opens the window and blocks until it is closed.
pub fn run(session: Session, runtime: Handle, settings: &Settings, url: Option<String>) -> Result<(), eframe::Error> {
    let app = DownloaderApp::new(session, runtime, settings, url);
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("Playlist Downloader")
            .with_inner_size([720.0, 560.0])
            .with_min_inner_size([500.0, 400.0]),
        ..Default::default()
    };
    eframe::run_native(
        "Playlist Downloader",
        options,
        Box::new(|cc| {
            // Use dark theme visuals
            cc.egui_ctx.set_visuals(Visuals::dark());
            Box::new(app)
        }),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn long_titles_are_shortened() {
        let long = "x".repeat(100);
        let short = short_title(&long);
        assert_eq!(short.chars().count(), TITLE_CHARS + 3);
        assert!(short.ends_with("..."));
        assert_eq!(short_title("Short"), "Short");
    }

    #[test]
    fn observer_queues_thumbnail_urls() {
        let queue = ThumbnailQueue::default();
        let mut observer = ThumbnailRequests {
            queue: Arc::clone(&queue),
        };
        let items = vec![
            Item::new("a", "A", 1).with_thumbnail(Some("https://i/a.jpg".into())),
            Item::new("b", "B", 2),
        ];
        observer.batch_registered("Mix", &items);
        assert_eq!(*queue.lock().unwrap(), vec![("a".to_owned(), "https://i/a.jpg".to_owned())]);
    }

    static IN_FLIGHT: AtomicUsize = AtomicUsize::new(0);
    static PEAK: AtomicUsize = AtomicUsize::new(0);

    fn slow_fetch(_url: &str) -> Option<ColorImage> {
        let now = IN_FLIGHT.fetch_add(1, Ordering::SeqCst) + 1;
        PEAK.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        IN_FLIGHT.fetch_sub(1, Ordering::SeqCst);
        Some(ColorImage::new([1, 1], Color32::BLACK))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn thumbnail_fetches_are_bounded() {
        let mut fetcher = ThumbnailFetcher::new(Handle::current());
        fetcher.fetch = slow_fetch;
        let ctx = egui::Context::default();
        for i in 0..24 {
            fetcher.queue(format!("v{i}"), format!("https://i/{i}.jpg"), ctx.clone());
        }

        let mut ready = Vec::new();
        tokio::time::timeout(Duration::from_secs(10), async {
            while ready.len() < 24 {
                ready.extend(fetcher.take_ready());
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert!(PEAK.load(Ordering::SeqCst) >= 1);
        assert!(PEAK.load(Ordering::SeqCst) <= THUMBNAIL_FETCHES);
    }
}
