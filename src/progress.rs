//! Line protocol between the engine's stdout/stderr and the tracker.
//!
//! The engine is asked to print one line per progress report using
//! [`PROGRESS_TEMPLATE`]. Fields it cannot fill are printed as `NA`.

/// Marker that starts every progress line.
pub const PROGRESS_PREFIX: &str = "PLDL|";

/// Value for `--progress-template`.
pub const PROGRESS_TEMPLATE: &str = "download:PLDL|%(progress.status)s|%(info.id)s|%(progress._percent_str)s|%(progress.downloaded_bytes)s|%(progress.total_bytes)s|%(progress.total_bytes_estimate)s|%(progress._speed_str)s";

const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

/// Status tag of a progress report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventStatus {
    Downloading,
    Finished,
    /// Anything else the engine emits (`error`, ...)
    Other(String),
}

impl EventStatus {
    fn parse(raw: &str) -> Self {
        match raw {
            "downloading" => EventStatus::Downloading,
            "finished" => EventStatus::Finished,
            other => EventStatus::Other(other.to_owned()),
        }
    }
}

/// One progress report as printed by the engine, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub status: EventStatus,
    pub item_id: Option<String>,
    /// Raw percent string such as ` 42.0%`
    pub percent: Option<String>,
    pub downloaded_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    pub total_bytes_estimate: Option<u64>,
    pub speed: Option<String>,
}

impl ProgressEvent {
    pub fn downloading(item_id: &str, percent: &str) -> Self {
        Self {
            status: EventStatus::Downloading,
            item_id: Some(item_id.to_owned()),
            percent: Some(percent.to_owned()),
            downloaded_bytes: None,
            total_bytes: None,
            total_bytes_estimate: None,
            speed: None,
        }
    }

    pub fn finished(item_id: &str) -> Self {
        Self {
            status: EventStatus::Finished,
            item_id: Some(item_id.to_owned()),
            percent: Some("100%".to_owned()),
            downloaded_bytes: None,
            total_bytes: None,
            total_bytes_estimate: None,
            speed: None,
        }
    }

    /// Exact total if known, otherwise the engine's estimate.
    pub fn best_total(&self) -> Option<u64> {
        self.total_bytes
            .filter(|&b| b > 0)
            .or(self.total_bytes_estimate.filter(|&b| b > 0))
    }
}

/// Per-item error reported on stderr, e.g. `ERROR: [youtube] abc: Video unavailable`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemError {
    pub item_id: Option<String>,
    pub message: String,
}

/// Parses a line printed through [`PROGRESS_TEMPLATE`].
pub fn parse_progress_from_line(line: &str) -> Option<ProgressEvent> {
    let line = strip_ansi(line);
    let rest = line.trim().strip_prefix(PROGRESS_PREFIX)?;
    let fields: Vec<&str> = rest.split('|').map(str::trim).collect();
    if fields.len() != 7 {
        return None;
    }

    Some(ProgressEvent {
        status: EventStatus::parse(fields[0]),
        item_id: text_field(fields[1]),
        percent: text_field(fields[2]),
        downloaded_bytes: byte_field(fields[3]),
        total_bytes: byte_field(fields[4]),
        total_bytes_estimate: byte_field(fields[5]),
        speed: text_field(fields[6]),
    })
}

/// Parses an engine `ERROR:` line.
pub fn parse_item_error(line: &str) -> Option<ItemError> {
    let line = strip_ansi(line);
    let rest = line.trim().strip_prefix("ERROR:")?.trim_start();

    if let Some(tagged) = rest.strip_prefix('[') {
        if let Some((_extractor, after)) = tagged.split_once("] ") {
            if let Some((id, message)) = after.split_once(": ") {
                if !id.is_empty() && !id.contains(char::is_whitespace) {
                    return Some(ItemError {
                        item_id: Some(id.to_owned()),
                        message: message.trim().to_owned(),
                    });
                }
            }
            return Some(ItemError {
                item_id: None,
                message: after.trim().to_owned(),
            });
        }
    }

    Some(ItemError {
        item_id: None,
        message: rest.to_owned(),
    })
}

/// `" 42.5%"` -> `0.425`. Values are clamped to `[0, 1]`.
pub fn parse_percent(raw: &str) -> Option<f32> {
    let cleaned = strip_ansi(raw);
    let number = cleaned.trim().strip_suffix('%')?.trim();
    let value = number.parse::<f32>().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some((value / 100.0).clamp(0.0, 1.0))
}

/// Binary units with one decimal place; zero is `"0 B"`.
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_owned();
    }
    let mut value = bytes as f64;
    for unit in UNITS {
        if value < 1024.0 {
            return format!("{value:.1} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.1} TB")
}

/// Like [`format_bytes`] but renders unknown (or zero) totals as `"?"`.
pub fn format_total(bytes: Option<u64>) -> String {
    match bytes {
        Some(b) if b > 0 => format_bytes(b),
        _ => "?".to_owned(),
    }
}

/// Removes CSI escape sequences the engine may add around numbers.
pub fn strip_ansi(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            if chars.peek() == Some(&'[') {
                chars.next();
                // parameters until the final byte in 0x40..=0x7e
                for next in chars.by_ref() {
                    if ('@'..='~').contains(&next) {
                        break;
                    }
                }
            }
            continue;
        }
        out.push(c);
    }
    out
}

fn text_field(raw: &str) -> Option<String> {
    match raw {
        "" | "NA" | "None" => None,
        value => Some(value.to_owned()),
    }
}

fn byte_field(raw: &str) -> Option<u64> {
    let raw = text_field(raw)?;
    raw.parse::<u64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(|v| v as u64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_downloading_line() {
        let line = "PLDL|downloading|abc123| 42.0%|1048576|2097152|NA|1.50MiB/s";
        let event = parse_progress_from_line(line).unwrap();
        assert_eq!(event.status, EventStatus::Downloading);
        assert_eq!(event.item_id.as_deref(), Some("abc123"));
        assert_eq!(event.percent.as_deref(), Some("42.0%"));
        assert_eq!(event.downloaded_bytes, Some(1_048_576));
        assert_eq!(event.total_bytes, Some(2_097_152));
        assert_eq!(event.total_bytes_estimate, None);
        assert_eq!(event.speed.as_deref(), Some("1.50MiB/s"));
    }

    #[test]
    fn estimate_used_when_total_missing() {
        let line = "PLDL|downloading|abc|10.0%|100|NA|5000.0|1KiB/s";
        let event = parse_progress_from_line(line).unwrap();
        assert_eq!(event.total_bytes, None);
        assert_eq!(event.best_total(), Some(5000));
    }

    #[test]
    fn non_progress_lines_are_ignored() {
        assert!(parse_progress_from_line("[youtube] Extracting URL").is_none());
        assert!(parse_progress_from_line("PLDL|downloading|abc").is_none());
        assert!(parse_progress_from_line("").is_none());
    }

    #[test]
    fn colored_percent_is_cleaned() {
        assert_eq!(parse_percent("\u{1b}[0;94m 50.0%\u{1b}[0m"), Some(0.5));
        let line = "\u{1b}[0;32mPLDL|finished|x|100%|10|10|NA|NA\u{1b}[0m";
        let event = parse_progress_from_line(line).unwrap();
        assert_eq!(event.status, EventStatus::Finished);
    }

    #[test]
    fn percent_parsing() {
        assert_eq!(parse_percent("50%"), Some(0.5));
        assert_eq!(parse_percent(" 100.0% "), Some(1.0));
        assert_eq!(parse_percent("NA"), None);
        assert_eq!(parse_percent("abc%"), None);
        assert_eq!(parse_percent("150%"), Some(1.0));
    }

    #[test]
    fn formats_bytes_in_binary_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1), "1.0 B");
        assert_eq!(format_bytes(1023), "1023.0 B");
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GB");
        assert_eq!(format_bytes(2 * 1024u64.pow(4)), "2.0 TB");
        assert_eq!(format_bytes(2048 * 1024u64.pow(4)), "2048.0 TB");
    }

    #[test]
    fn unknown_total_is_question_mark() {
        assert_eq!(format_total(None), "?");
        assert_eq!(format_total(Some(0)), "?");
        assert_eq!(format_total(Some(2048)), "2.0 KB");
    }

    #[test]
    fn parses_item_errors() {
        let err = parse_item_error("ERROR: [youtube] dQw4w9WgXcQ: Video unavailable").unwrap();
        assert_eq!(err.item_id.as_deref(), Some("dQw4w9WgXcQ"));
        assert_eq!(err.message, "Video unavailable");

        let err = parse_item_error("ERROR: Unable to download webpage").unwrap();
        assert_eq!(err.item_id, None);
        assert_eq!(err.message, "Unable to download webpage");

        assert!(parse_item_error("WARNING: something").is_none());
    }
}
