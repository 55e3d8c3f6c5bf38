use std::path::PathBuf;

use clap::Parser;

use crate::config::{Quality, Settings};

/// Playlist Downloader - save whole playlists with yt-dlp
#[derive(Parser, Debug)]
#[command(name = "playlist-downloader", version, about)]
pub struct Args {
    /// Playlist or video URL (pre-filled in the window, downloaded at once with --headless)
    pub url: Option<String>,

    /// Destination folder (defaults to the settings file, then your Downloads folder)
    #[arg(long, short = 'o')]
    pub output_dir: Option<PathBuf>,

    /// Quality preset
    #[arg(long, short = 'q', value_enum)]
    pub quality: Option<Quality>,

    /// Settings file to use instead of the default location
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory for log files
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Download without opening a window
    #[arg(long)]
    pub headless: bool,

    /// More console logging
    #[arg(long, short = 'v')]
    pub verbose: bool,

    /// Print the default config.toml to stdout
    #[arg(long)]
    pub generate_config: bool,
}

impl Args {
    /// Command-line flags win over the settings file.
    pub fn apply_to(&self, settings: &mut Settings) {
        if let Some(dir) = &self.output_dir {
            settings.download_dir = dir.clone();
        }
        if let Some(quality) = self.quality {
            settings.quality = quality;
        }
        if let Some(dir) = &self.log_dir {
            settings.log_dir = Some(dir.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_settings() {
        let args = Args::parse_from(["playlist-downloader", "-q", "720p", "-o", "/tmp/out", "https://x/list"]);
        let mut settings = Settings::default();
        args.apply_to(&mut settings);
        assert_eq!(settings.quality, Quality::P720);
        assert_eq!(settings.download_dir, PathBuf::from("/tmp/out"));
        assert_eq!(args.url.as_deref(), Some("https://x/list"));
    }

    #[test]
    fn audio_preset_name() {
        let args = Args::parse_from(["playlist-downloader", "--quality", "audio", "--headless"]);
        assert_eq!(args.quality, Some(Quality::AudioOnly));
        assert!(args.headless);
    }
}
