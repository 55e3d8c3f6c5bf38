//! Desktop front-end for downloading playlists with yt-dlp.

// egui window and item cards
pub mod app;
// Command-line flags
pub mod cli;
// Settings file and quality presets
pub mod config;
// External downloader spawning logic (yt-dlp)
pub mod engine;
pub mod error;
// Windowless batch runner
pub mod headless;
pub mod logging;
// Data models for batches, items and their phases
pub mod model;
// Progress line parsing and byte formatting
pub mod progress;
// Worker lifecycle and message dispatch onto the UI thread
pub mod session;
// Thumbnail fetching module
pub mod thumbnail;
// Batch/item state driven by progress reports
pub mod tracker;
