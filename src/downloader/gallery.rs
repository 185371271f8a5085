//! Instagram posts through gallery-dl.
//!
//! gallery-dl writes every item of a post into the request workspace, named
//! by zero-padded position, with a JSON metadata sidecar next to each file.
//! The directory listing is then turned into an ordered media list plus the
//! post caption.

use super::process::run_streaming;
use super::DownloadError;
use crate::config::Settings;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

/// Name files by position so a lexicographic sort restores post order
const FILENAME_TEMPLATE: &str = "{num:>03}.{extension}";

/// Suffix of the transcode hook's scratch output
const TRANSCODE_SCRATCH_SUFFIX: &str = ".tmp.mp4";

/// Re-encode videos to a smaller HEVC rendition in place; `{}` is the file path.
/// A failed encode removes its scratch file and keeps the original.
const TRANSCODE_HOOK: &str = "case {} in *.mp4) \
ffmpeg -loglevel error -i {} -c:v libx265 -crf 30 -preset medium -vf scale=720:-2 \
-c:a aac -b:a 64k -movflags +faststart -tag:v hvc1 -y {}.tmp.mp4 && mv {}.tmp.mp4 {} \
|| rm -f {}.tmp.mp4 ;; esac";

const PHOTO_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4"];

/// Coarse media type used to pick the Telegram upload method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Still image
    Photo,
    /// Video clip
    Video,
}

/// One downloaded item of a post
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    /// Location inside the request workspace
    pub path: PathBuf,
    /// Photo or video
    pub kind: MediaKind,
}

/// Caption and ordered media of one post
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstagramPost {
    /// Post description, empty when none was found
    pub caption: String,
    /// Media in post order
    pub media: Vec<MediaFile>,
}

/// Arguments for downloading a whole post into `dir`
#[must_use]
pub fn gallery_args(cookies: &Path, url: &str, dir: &Path, transcode: bool) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--cookies".into(),
        cookies.into(),
        "-D".into(),
        dir.into(),
        "-f".into(),
        FILENAME_TEMPLATE.into(),
        "--write-metadata".into(),
        "--retries".into(),
        "3".into(),
        "--sleep-request".into(),
        "2.0".into(),
    ];
    if transcode {
        args.push("--exec".into());
        args.push(TRANSCODE_HOOK.into());
    }
    args.push("--".into());
    args.push(url.into());
    args
}

/// Download every item of the post at `url` into `dir`.
///
/// # Errors
///
/// Fails when the gallery-dl cookie jar is missing, gallery-dl fails or times
/// out, the directory cannot be read, or the post yielded no media.
pub async fn download_post(
    settings: &Settings,
    url: &str,
    dir: &Path,
) -> Result<InstagramPost, DownloadError> {
    let cookies = settings
        .gallerydl_cookies
        .as_deref()
        .ok_or(DownloadError::MissingConfig("GALLERYDL_COOKIES"))?;

    let mut cmd = Command::new(&settings.gallerydl_bin);
    cmd.args(gallery_args(cookies, url, dir, settings.transcode_videos));

    info!(url = %url, transcode = settings.transcode_videos, "Starting post download");
    run_streaming(
        cmd,
        &settings.gallerydl_bin,
        settings.download_timeout(),
        |line| debug!(line = %line, "gallery-dl"),
    )
    .await?;

    let post = collect_post(dir).await?;
    if post.media.is_empty() {
        return Err(DownloadError::NoOutput {
            tool: settings.gallerydl_bin.clone(),
        });
    }

    info!(
        url = %url,
        items = post.media.len(),
        has_caption = !post.caption.is_empty(),
        "Post downloaded"
    );
    Ok(post)
}

/// Build the post from a finished gallery-dl directory
///
/// # Errors
///
/// Returns an error if the directory cannot be listed.
pub async fn collect_post(dir: &Path) -> Result<InstagramPost, DownloadError> {
    let names = sorted_file_names(dir).await?;
    Ok(InstagramPost {
        caption: caption_from_sidecars(dir, &names).await,
        media: classify(dir, &names),
    })
}

/// Ordered photo/video files of `dir`.
///
/// # Errors
///
/// Returns an error if the directory cannot be listed.
pub async fn scan_media(dir: &Path) -> Result<Vec<MediaFile>, DownloadError> {
    let names = sorted_file_names(dir).await?;
    Ok(classify(dir, &names))
}

/// Caption taken from the first sidecar with a non-empty `description`.
///
/// # Errors
///
/// Returns an error if the directory cannot be listed.
pub async fn extract_caption(dir: &Path) -> Result<String, DownloadError> {
    let names = sorted_file_names(dir).await?;
    Ok(caption_from_sidecars(dir, &names).await)
}

async fn sorted_file_names(dir: &Path) -> Result<Vec<String>, DownloadError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

fn extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

fn media_kind(name: &str) -> Option<MediaKind> {
    // Leftover of an interrupted transcode
    if name.to_ascii_lowercase().ends_with(TRANSCODE_SCRATCH_SUFFIX) {
        return None;
    }
    let ext = extension(name)?;
    if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Video)
    } else if PHOTO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Photo)
    } else {
        None
    }
}

fn classify(dir: &Path, names: &[String]) -> Vec<MediaFile> {
    names
        .iter()
        .filter_map(|name| {
            media_kind(name).map(|kind| MediaFile {
                path: dir.join(name),
                kind,
            })
        })
        .collect()
}

async fn caption_from_sidecars(dir: &Path, names: &[String]) -> String {
    for name in names {
        if extension(name).as_deref() != Some("json") {
            continue;
        }
        let path = dir.join(name);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Unreadable sidecar skipped");
                continue;
            }
        };
        let value: serde_json::Value = match serde_json::from_slice(&data) {
            Ok(value) => value,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Malformed sidecar skipped");
                continue;
            }
        };
        if let Some(description) = value.get("description").and_then(|d| d.as_str()) {
            if !description.is_empty() {
                return description.to_string();
            }
        }
    }
    String::new()
}
