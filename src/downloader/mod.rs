//! External downloader tools
//!
//! Wraps `yt-dlp` (format listing and format-selected downloads) and
//! `gallery-dl` (Instagram posts) behind the [`MediaSource`] trait so the bot
//! layer can be driven by a fake in tests.

/// yt-dlp metadata parsing and format selection
pub mod formats;
/// Instagram posts via gallery-dl
pub mod gallery;
/// Child process plumbing with timeouts
pub mod process;
/// Download progress scraping
pub mod progress;
/// Per-request temporary directories
pub mod workspace;
/// Format-selected and best-quality downloads via yt-dlp
pub mod youtube;

use crate::config::Settings;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::Sender;

pub use formats::{FormatDisplay, FormatKind};
pub use gallery::{InstagramPost, MediaFile, MediaKind};
pub use workspace::TempWorkspace;

/// Errors that can occur while running an external downloader
#[derive(Debug, Error)]
pub enum DownloadError {
    /// A required setting (cookie jar path) is not configured
    #[error("Missing configuration: {0} is not set")]
    MissingConfig(&'static str),
    /// The tool binary could not be started
    #[error("Failed to start {tool}: {source}")]
    Spawn {
        /// Executable name
        tool: String,
        /// Underlying spawn error
        #[source]
        source: std::io::Error,
    },
    /// Standard I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Tool output could not be parsed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// The tool exited with a non-zero status
    #[error("{tool} exited with {status}: {output}")]
    ProcessFailed {
        /// Executable name
        tool: String,
        /// Exit status as reported by the OS
        status: String,
        /// Tail of the combined stdout/stderr
        output: String,
    },
    /// The tool did not finish in time and was killed
    #[error("{tool} timed out after {}s", .timeout.as_secs())]
    Timeout {
        /// Executable name
        tool: String,
        /// Configured bound
        timeout: Duration,
    },
    /// The tool succeeded but left nothing usable behind
    #[error("{tool} finished without producing media")]
    NoOutput {
        /// Executable name
        tool: String,
    },
}

/// A file produced by a single-file download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    /// Location inside the request workspace
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
}

/// Source of media for the bot pipelines
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// List the selectable formats of a video
    async fn list_formats(&self, url: &str) -> Result<Vec<FormatDisplay>, DownloadError>;

    /// Download one format of a video into `dest`, reporting percentages on `progress`
    async fn fetch_format(
        &self,
        format_id: &str,
        url: &str,
        dest: &Path,
        progress: Sender<u8>,
    ) -> Result<DownloadedFile, DownloadError>;

    /// Download the best single-file rendition of any supported URL into `dest`
    async fn fetch_best(&self, url: &str, dest: &Path) -> Result<DownloadedFile, DownloadError>;

    /// Download every photo/video of a post into `dest`
    async fn fetch_post(&self, url: &str, dest: &Path) -> Result<InstagramPost, DownloadError>;
}

/// [`MediaSource`] backed by the real `yt-dlp` and `gallery-dl` binaries
#[derive(Clone)]
pub struct ToolDownloader {
    settings: Arc<Settings>,
}

impl ToolDownloader {
    /// Create a downloader using the executables and cookies from `settings`
    #[must_use]
    pub const fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl MediaSource for ToolDownloader {
    async fn list_formats(&self, url: &str) -> Result<Vec<FormatDisplay>, DownloadError> {
        formats::list_formats(&self.settings, url).await
    }

    async fn fetch_format(
        &self,
        format_id: &str,
        url: &str,
        dest: &Path,
        progress: Sender<u8>,
    ) -> Result<DownloadedFile, DownloadError> {
        youtube::fetch_format(&self.settings, format_id, url, dest, progress).await
    }

    async fn fetch_best(&self, url: &str, dest: &Path) -> Result<DownloadedFile, DownloadError> {
        youtube::fetch_best(&self.settings, url, dest).await
    }

    async fn fetch_post(&self, url: &str, dest: &Path) -> Result<InstagramPost, DownloadError> {
        gallery::download_post(&self.settings, url, dest).await
    }
}
