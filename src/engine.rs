//! yt-dlp as a child process: metadata resolution and batch download.

use std::collections::VecDeque;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use rust_embed::RustEmbed;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, trace, warn};

use crate::config::{Quality, Settings};
use crate::error::EngineError;
use crate::model::ItemSpec;
use crate::progress::{ItemError, PROGRESS_TEMPLATE, ProgressEvent, parse_item_error, parse_progress_from_line};

/// Optional bundled engine. Drop a `yt-dlp` / `yt-dlp.exe` in `assets/`
/// before building to ship it inside the executable.
#[derive(RustEmbed)]
#[folder = "assets/"]
struct Asset;

const STDERR_TAIL: usize = 20;

/// Something the engine printed while downloading.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutput {
    Progress(ProgressEvent),
    ItemError(ItemError),
}

/// Options for one download run
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    /// Value for `-f`
    pub format: String,
    /// Value for `-o`
    pub output_template: String,
    pub merge_output_format: String,
    /// Continue past entries that fail
    pub ignore_errors: bool,
    pub quiet: bool,
    pub no_warnings: bool,
    pub ffmpeg_location: Option<PathBuf>,
}

impl EngineOptions {
    pub fn new(quality: Quality, output_dir: &Path) -> Self {
        Self {
            format: quality.format_selector().to_owned(),
            output_template: output_template(output_dir),
            merge_output_format: quality.merge_format().to_owned(),
            ignore_errors: true,
            quiet: true,
            no_warnings: true,
            ffmpeg_location: None,
        }
    }

    pub fn download_args(&self, url: &str) -> Vec<String> {
        let mut args = vec![
            "-f".to_owned(),
            self.format.clone(),
            "--merge-output-format".to_owned(),
            self.merge_output_format.clone(),
            "-o".to_owned(),
            self.output_template.clone(),
            "--newline".to_owned(),
            "--progress".to_owned(),
            "--progress-template".to_owned(),
            PROGRESS_TEMPLATE.to_owned(),
            "--no-colors".to_owned(),
        ];
        if self.ignore_errors {
            args.push("--ignore-errors".to_owned());
        }
        if self.quiet {
            args.push("--quiet".to_owned());
        }
        if self.no_warnings {
            args.push("--no-warnings".to_owned());
        }
        if let Some(location) = &self.ffmpeg_location {
            args.push("--ffmpeg-location".to_owned());
            args.push(location.to_string_lossy().into_owned());
        }
        args.push("--".to_owned());
        args.push(url.to_owned());
        args
    }
}

/// `{dir}/{playlist title}/{index} - {title}.{ext}`
pub fn output_template(output_dir: &Path) -> String {
    output_dir
        .join("%(playlist_title)s")
        .join("%(playlist_index)s - %(title)s.%(ext)s")
        .to_string_lossy()
        .into_owned()
}

fn info_args(url: &str) -> Vec<String> {
    ["-J", "--flat-playlist", "--no-warnings", "--no-colors", "--", url]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Resolved playlist (or single video) metadata
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistInfo {
    pub title: String,
    pub entries: Vec<ItemSpec>,
    pub is_playlist: bool,
}

#[derive(Debug, Deserialize)]
struct RawInfo {
    id: Option<String>,
    title: Option<String>,
    thumbnail: Option<String>,
    thumbnails: Option<Vec<RawThumbnail>>,
    entries: Option<Vec<Option<RawInfo>>>,
}

#[derive(Debug, Deserialize)]
struct RawThumbnail {
    url: Option<String>,
}

impl RawInfo {
    fn best_thumbnail(&self) -> Option<String> {
        self.thumbnail.clone().or_else(|| {
            self.thumbnails
                .as_ref()?
                .iter()
                .rev()
                .find_map(|t| t.url.clone())
        })
    }
}

impl PlaylistInfo {
    pub fn from_json(bytes: &[u8]) -> Result<Self, EngineError> {
        let raw: RawInfo = serde_json::from_slice(bytes)?;
        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawInfo) -> Self {
        match raw.entries {
            Some(entries) => {
                let entries = entries
                    .into_iter()
                    .flatten()
                    .enumerate()
                    .map(|(position, entry)| {
                        let thumbnail_url = entry.best_thumbnail();
                        ItemSpec {
                            id: entry.id.unwrap_or_else(|| format!("video_{}", position + 1)),
                            title: entry.title.unwrap_or_else(|| "Unknown Title".to_owned()),
                            thumbnail_url,
                        }
                    })
                    .collect();
                Self {
                    title: raw.title.unwrap_or_else(|| "Unknown Playlist".to_owned()),
                    entries,
                    is_playlist: true,
                }
            }
            None => {
                let thumbnail_url = raw.best_thumbnail();
                let title = raw.title.unwrap_or_else(|| "Unknown Title".to_owned());
                Self {
                    entries: vec![ItemSpec {
                        id: raw.id.unwrap_or_else(|| "video_1".to_owned()),
                        title: title.clone(),
                        thumbnail_url,
                    }],
                    title,
                    is_playlist: false,
                }
            }
        }
    }
}

/// Handle to the external yt-dlp executable
#[derive(Debug, Clone)]
pub struct Engine {
    program: PathBuf,
    ffmpeg_location: Option<PathBuf>,
}

impl Engine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ffmpeg_location: None,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, EngineError> {
        let program = resolve_program(settings.yt_dlp_path.as_deref())?;
        let ffmpeg_location = settings.ffmpeg_location.clone().or_else(ffmpeg_next_to_exe);
        info!(
            program = %program.display(),
            ffmpeg = ?ffmpeg_location,
            "download engine ready"
        );
        Ok(Self {
            program,
            ffmpeg_location,
        })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn options(&self, quality: Quality, output_dir: &Path, ignore_errors: bool) -> EngineOptions {
        EngineOptions {
            ignore_errors,
            ffmpeg_location: self.ffmpeg_location.clone(),
            ..EngineOptions::new(quality, output_dir)
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .env("PYTHONIOENCODING", "UTF-8")
            .env("PYTHONUTF8", "1")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        #[cfg(windows)]
        command.creation_flags(0x0800_0000); // CREATE_NO_WINDOW
        command
    }

    fn spawn_error(&self, source: std::io::Error) -> EngineError {
        EngineError::Spawn {
            path: self.program.clone(),
            source,
        }
    }

    /// Resolves playlist metadata without downloading anything.
    pub async fn extract_info(&self, url: &str) -> Result<PlaylistInfo, EngineError> {
        debug!(url, "extracting info");
        let output = self
            .command()
            .args(info_args(url))
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<String> = stderr.lines().map(str::to_owned).collect();
            return Err(EngineError::ExitStatus {
                code: exit_code(&output.status),
                message: failure_message(&lines),
            });
        }

        PlaylistInfo::from_json(&output.stdout)
    }

    /// Runs the download, handing every recognised output line to `sink`.
    /// Returns once the engine exits.
    pub async fn download<F>(&self, url: &str, options: &EngineOptions, sink: F) -> Result<(), EngineError>
    where
        F: Fn(EngineOutput) + Clone + Send + 'static,
    {
        let args = options.download_args(url);
        debug!(?args, "starting download");

        let mut child = self
            .command()
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stdout = child.stdout.take().ok_or(EngineError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(EngineError::MissingPipe("stderr"))?;

        // progress may land on either stream depending on the engine build
        let stderr_task = tokio::spawn(forward_lines(stderr, sink.clone()));
        forward_lines(stdout, sink).await?;

        let status = child.wait().await?;
        let tail = match stderr_task.await {
            Ok(Ok(tail)) => tail,
            Ok(Err(e)) => {
                warn!("reading yt-dlp stderr failed: {e}");
                VecDeque::new()
            }
            Err(e) => {
                warn!("stderr reader stopped: {e}");
                VecDeque::new()
            }
        };

        // exit code 1 with --ignore-errors means some entries failed
        if status.success() || (options.ignore_errors && status.code() == Some(1)) {
            info!(code = %exit_code(&status), "engine finished");
            return Ok(());
        }

        let lines: Vec<String> = tail.into_iter().collect();
        Err(EngineError::ExitStatus {
            code: exit_code(&status),
            message: failure_message(&lines),
        })
    }
}

/// Reads `stream` line by line, forwarding what the sink understands.
/// Returns the last lines that were not progress reports.
async fn forward_lines<R, F>(stream: R, sink: F) -> Result<VecDeque<String>, std::io::Error>
where
    R: AsyncRead + Unpin,
    F: Fn(EngineOutput),
{
    let mut reader = BufReader::new(stream);
    let mut buffer = Vec::new();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL);

    loop {
        buffer.clear();
        if reader.read_until(b'\n', &mut buffer).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buffer);
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }

        if let Some(event) = parse_progress_from_line(line) {
            sink(EngineOutput::Progress(event));
            continue;
        }
        if let Some(error) = parse_item_error(line) {
            sink(EngineOutput::ItemError(error));
        } else {
            trace!(line, "yt-dlp");
        }

        if tail.len() == STDERR_TAIL {
            tail.pop_front();
        }
        tail.push_back(line.to_owned());
    }
    Ok(tail)
}

fn exit_code(status: &std::process::ExitStatus) -> String {
    status
        .code()
        .map(|code| code.to_string())
        .unwrap_or_else(|| "a signal".to_owned())
}

/// Last `ERROR:` line if any, else the last line, else a placeholder.
fn failure_message(lines: &[String]) -> String {
    lines
        .iter()
        .rev()
        .find_map(|line| line.trim().strip_prefix("ERROR:").map(|m| m.trim().to_owned()))
        .or_else(|| lines.iter().rev().find(|l| !l.trim().is_empty()).cloned())
        .unwrap_or_else(|| "no output".to_owned())
}

/// Configured path, then the bundled copy, then `PATH`.
fn resolve_program(configured: Option<&Path>) -> Result<PathBuf, EngineError> {
    if let Some(path) = configured {
        return Ok(path.to_path_buf());
    }

    let bin = if cfg!(target_os = "windows") { "yt-dlp.exe" } else { "yt-dlp" };
    let Some(data) = Asset::get(bin) else {
        return Ok(PathBuf::from(bin));
    };

    let tmp = std::env::temp_dir().join(bin);
    let up_to_date = std::fs::metadata(&tmp)
        .map(|meta| meta.len() == data.data.len() as u64)
        .unwrap_or(false);
    if !up_to_date {
        debug!(path = %tmp.display(), "extracting bundled yt-dlp");
        let mut f = File::create(&tmp).map_err(EngineError::Bundle)?;
        f.write_all(&data.data).map_err(EngineError::Bundle)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o755)).map_err(EngineError::Bundle)?;
        }
    }
    Ok(tmp)
}

/// Folder holding an ffmpeg shipped next to our executable.
fn ffmpeg_next_to_exe() -> Option<PathBuf> {
    let dir = std::env::current_exe().ok()?.parent()?.to_path_buf();
    let name = if cfg!(target_os = "windows") { "ffmpeg.exe" } else { "ffmpeg" };
    dir.join(name).exists().then_some(dir)
}
