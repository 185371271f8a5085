//! Download progress scraping for yt-dlp `--newline` output.

// lazy_regex! validates the pattern at compile time
#![allow(clippy::non_std_lazy_statics)]

use lazy_regex::lazy_regex;
use std::time::Duration;
use tokio::time::Instant;

/// Tag yt-dlp prints in front of download progress lines
const DOWNLOAD_MARKER: &str = "[download]";

/// First number directly followed by `%`
static RE_PERCENT: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"(\d+(?:\.\d+)?)%");

/// Extract the completion percentage from one line of yt-dlp output.
///
/// Returns 0 both for "0%" and for lines without a percentage; callers treat
/// 0 as "nothing to report". Lines without the `[download]` tag are ignored
/// even when they contain a percent sign.
///
/// # Examples
///
/// ```
/// use downloader_bot::downloader::progress::parse_percentage;
///
/// assert_eq!(parse_percentage("[download]  42.7% of 10.00MiB at 1.00MiB/s"), 42);
/// assert_eq!(parse_percentage("[ffmpeg] 50% done"), 0);
/// ```
#[must_use]
pub fn parse_percentage(line: &str) -> u8 {
    let line = line.trim();
    if !line.contains(DOWNLOAD_MARKER) {
        return 0;
    }

    let Some(caps) = RE_PERCENT.captures(line) else {
        return 0;
    };

    caps.get(1)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|p| p.is_finite())
        // Truncation is the point: 99.9% still reads as 99
        .map_or(0, |p| {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let floored = p.floor().min(100.0) as u8;
            floored
        })
}

/// Rate limiter for progress edits of a single status message.
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
    last_percent: u8,
}

impl ProgressThrottle {
    /// Allow at most one emission per `interval`
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
            last_percent: 0,
        }
    }

    /// Whether `percent` should be shown now.
    ///
    /// Zero is never shown, the first nonzero value always is, and later
    /// values only once `interval` has passed since the last shown one and
    /// the value actually changed.
    pub fn should_emit(&mut self, percent: u8) -> bool {
        if percent == 0 {
            return false;
        }

        let now = Instant::now();
        let due = self
            .last_emit
            .is_none_or(|last| now.duration_since(last) >= self.interval);

        if due && percent != self.last_percent {
            self.last_emit = Some(now);
            self.last_percent = percent;
            return true;
        }
        false
    }
}
