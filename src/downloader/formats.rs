//! Format listing via `yt-dlp -j`.
//!
//! Turns the metadata dump into the list of formats offered to the user as
//! inline buttons.

use super::process::run_captured;
use super::DownloadError;
use crate::config::Settings;
use crate::utils::format_megabytes;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

/// Friendly labels for the common YouTube frame sizes
const RESOLUTION_LABELS: &[(&str, &str)] = &[
    ("256x144", "144p"),
    ("426x240", "240p"),
    ("640x360", "360p"),
    ("854x480", "480p"),
    ("1280x720", "720p"),
    ("1920x1080", "1080p"),
    ("2560x1440", "1440p"),
    ("3840x2160", "2160p"),
];

/// Top-level document printed by `yt-dlp -j`
#[derive(Debug, Default, Deserialize)]
pub struct VideoInfo {
    /// Duration in seconds (absent for live streams)
    #[serde(default)]
    pub duration: Option<f64>,
    /// Every format yt-dlp knows about
    #[serde(default)]
    pub formats: Vec<RawFormat>,
}

/// One entry of `formats[]` in yt-dlp's metadata
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawFormat {
    /// Identifier accepted by `-f`
    pub format_id: Option<String>,
    /// Container extension
    pub ext: Option<String>,
    /// e.g. `1920x1080` or `audio only`
    pub resolution: Option<String>,
    /// Exact size in bytes, when known
    pub filesize: Option<u64>,
    /// Total bitrate in kbit/s
    pub tbr: Option<f64>,
    /// Audio codec, `none` when absent
    pub acodec: Option<String>,
    /// Video codec, `none` when absent
    pub vcodec: Option<String>,
}

/// Stream content of a format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    /// Audio and video
    Video,
    /// Video without audio
    VideoOnly,
    /// Audio without video
    AudioOnly,
    /// Neither codec reported
    Unknown,
}

impl FormatKind {
    fn classify(vcodec: Option<&str>, acodec: Option<&str>) -> Self {
        let has_video = vcodec != Some("none");
        let has_audio = acodec != Some("none");
        match (has_video, has_audio) {
            (true, true) => Self::Video,
            (true, false) => Self::VideoOnly,
            (false, true) => Self::AudioOnly,
            (false, false) => Self::Unknown,
        }
    }
}

/// A format as shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDisplay {
    /// Identifier passed back through the callback payload
    pub format_id: String,
    /// Button label, `"<ext> | <resolution> | <size>"`
    pub label: String,
    /// Stream content
    pub kind: FormatKind,
    /// Reported or estimated size in bytes
    pub size_bytes: Option<u64>,
}

/// Map a yt-dlp resolution string to a friendly label.
///
/// # Examples
///
/// ```
/// use downloader_bot::downloader::formats::friendly_resolution;
/// use downloader_bot::downloader::FormatKind;
///
/// assert_eq!(friendly_resolution("1920x1080", FormatKind::Video), "1080p");
/// assert_eq!(friendly_resolution("9999x9999", FormatKind::Video), "9999x9999");
/// assert_eq!(friendly_resolution("", FormatKind::AudioOnly), "audio");
/// ```
#[must_use]
pub fn friendly_resolution(raw: &str, kind: FormatKind) -> String {
    if raw.is_empty() {
        return if kind == FormatKind::AudioOnly {
            "audio".to_string()
        } else {
            "unknown".to_string()
        };
    }

    RESOLUTION_LABELS
        .iter()
        .find(|(dims, _)| *dims == raw)
        .map_or_else(|| raw.to_string(), |(_, label)| (*label).to_string())
}

fn estimated_size(format: &RawFormat, duration: Option<f64>) -> Option<u64> {
    if let Some(size) = format.filesize {
        return Some(size);
    }
    let tbr = format.tbr?;
    let estimate = tbr * duration.unwrap_or(0.0) * 1024.0 / 8.0;
    if !estimate.is_finite() || estimate < 0.0 {
        return None;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let bytes = estimate as u64;
    Some(bytes)
}

fn display_label(ext: &str, resolution: &str, size_bytes: Option<u64>) -> String {
    let size = size_bytes.map_or_else(|| "?".to_string(), format_megabytes);
    format!("{ext} | {resolution} | {size}")
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|s| !s.is_empty())
}

/// Build the displayable formats from parsed metadata, in yt-dlp's order.
///
/// Formats without an id or extension are skipped, and so are formats
/// whose size can neither be read nor estimated from the bitrate.
#[must_use]
pub fn formats_from_info(info: &VideoInfo) -> Vec<FormatDisplay> {
    info.formats
        .iter()
        .filter_map(|f| {
            let format_id = non_empty(f.format_id.as_ref())?;
            let ext = non_empty(f.ext.as_ref())?;
            let size_bytes = estimated_size(f, info.duration)?;

            let kind = FormatKind::classify(f.vcodec.as_deref(), f.acodec.as_deref());
            let resolution = friendly_resolution(f.resolution.as_deref().unwrap_or(""), kind);

            Some(FormatDisplay {
                format_id: format_id.to_string(),
                label: display_label(ext, &resolution, Some(size_bytes)),
                kind,
                size_bytes: Some(size_bytes),
            })
        })
        .collect()
}

/// Parse the JSON printed by `yt-dlp -j`.
///
/// # Errors
///
/// Returns `DownloadError::Json` for malformed metadata.
pub fn parse_video_info(json: &str) -> Result<VideoInfo, DownloadError> {
    Ok(serde_json::from_str(json.trim())?)
}

/// Ask yt-dlp for the formats of `url`.
///
/// # Errors
///
/// Fails when the yt-dlp cookie jar is not configured, yt-dlp fails or times
/// out, or its metadata cannot be parsed.
pub async fn list_formats(
    settings: &Settings,
    url: &str,
) -> Result<Vec<FormatDisplay>, DownloadError> {
    let cookies = settings
        .ytdlp_cookies
        .as_deref()
        .ok_or(DownloadError::MissingConfig("YTDLP_COOKIES"))?;

    let mut cmd = Command::new(&settings.ytdlp_bin);
    cmd.arg("--cookies")
        .arg(cookies)
        .args(["-j", "--no-playlist", "--no-warnings", "--"])
        .arg(url);

    debug!(url = %url, "Listing formats");
    let stdout = run_captured(cmd, &settings.ytdlp_bin, settings.download_timeout()).await?;
    let info = parse_video_info(&stdout)?;
    let formats = formats_from_info(&info);

    info!(
        url = %url,
        total = info.formats.len(),
        offered = formats.len(),
        "Formats listed"
    );
    Ok(formats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(id: &str, ext: &str) -> RawFormat {
        RawFormat {
            format_id: Some(id.to_string()),
            ext: Some(ext.to_string()),
            resolution: Some("1280x720".to_string()),
            filesize: Some(10 * 1024 * 1024),
            tbr: None,
            acodec: Some("mp4a.40.2".to_string()),
            vcodec: Some("avc1.64001F".to_string()),
        }
    }

    #[test]
    fn resolution_table() {
        assert_eq!(friendly_resolution("256x144", FormatKind::Video), "144p");
        assert_eq!(friendly_resolution("3840x2160", FormatKind::VideoOnly), "2160p");
        assert_eq!(friendly_resolution("9999x9999", FormatKind::Video), "9999x9999");
        assert_eq!(friendly_resolution("audio only", FormatKind::AudioOnly), "audio only");
        assert_eq!(friendly_resolution("", FormatKind::AudioOnly), "audio");
        assert_eq!(friendly_resolution("", FormatKind::Video), "unknown");
    }

    #[test]
    fn classification() {
        assert_eq!(FormatKind::classify(Some("avc1"), Some("opus")), FormatKind::Video);
        assert_eq!(FormatKind::classify(Some("vp9"), Some("none")), FormatKind::VideoOnly);
        assert_eq!(FormatKind::classify(Some("none"), Some("opus")), FormatKind::AudioOnly);
        assert_eq!(FormatKind::classify(Some("none"), Some("none")), FormatKind::Unknown);
        assert_eq!(FormatKind::classify(None, None), FormatKind::Video);
    }

    #[test]
    fn skips_formats_without_id_or_ext() {
        let mut no_id = raw("x", "mp4");
        no_id.format_id = None;
        let mut empty_ext = raw("y", "mp4");
        empty_ext.ext = Some(String::new());

        let info = VideoInfo {
            duration: Some(60.0),
            formats: vec![no_id, empty_ext, raw("22", "mp4")],
        };

        let formats = formats_from_info(&info);
        assert_eq!(formats.len(), 1);
        assert_eq!(formats[0].format_id, "22");
        assert_eq!(formats[0].label, "mp4 | 720p | 10.00 MB");
    }

    #[test]
    fn estimates_size_from_bitrate() {
        let mut f = raw("140", "m4a");
        f.filesize = None;
        f.tbr = Some(128.0);
        f.vcodec = Some("none".to_string());
        f.resolution = Some(String::new());

        let info = VideoInfo {
            duration: Some(80.0),
            formats: vec![f],
        };

        let formats = formats_from_info(&info);
        assert_eq!(formats.len(), 1);
        // 128 * 80 * 1024 / 8 bytes
        assert_eq!(formats[0].size_bytes, Some(1_310_720));
        assert_eq!(formats[0].kind, FormatKind::AudioOnly);
        assert_eq!(formats[0].label, "m4a | audio | 1.25 MB");
    }

    #[test]
    fn skips_formats_without_any_size() {
        let mut f = raw("sb0", "mhtml");
        f.filesize = None;
        f.tbr = None;

        let info = VideoInfo {
            duration: Some(10.0),
            formats: vec![f],
        };
        assert!(formats_from_info(&info).is_empty());
    }

    #[test]
    fn unknown_size_label() {
        assert_eq!(display_label("webm", "480p", None), "webm | 480p | ?");
    }

    #[test]
    fn parses_ytdlp_json() -> Result<(), DownloadError> {
        let json = r#"{
            "id": "abc",
            "duration": 10,
            "formats": [
                {"format_id": "18", "ext": "mp4", "resolution": "640x360",
                 "filesize": 2097152, "tbr": 500.5, "acodec": "mp4a.40.2", "vcodec": "avc1"},
                {"format_id": "sb0", "ext": "mhtml", "resolution": "48x27",
                 "filesize": null, "tbr": null, "acodec": "none", "vcodec": "none"}
            ]
        }"#;

        let info = parse_video_info(json)?;
        let formats = formats_from_info(&info);
        assert_eq!(formats.len(), 1);
        assert_eq!(formats[0].label, "mp4 | 360p | 2.00 MB");
        Ok(())
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(
            parse_video_info("ERROR: not json"),
            Err(DownloadError::Json(_))
        ));
    }

    #[tokio::test]
    async fn listing_requires_cookies() {
        let settings = Settings::with_token("dummy");
        let result = list_formats(&settings, "https://youtu.be/abc").await;
        assert!(matches!(
            result,
            Err(DownloadError::MissingConfig("YTDLP_COOKIES"))
        ));
    }
}
