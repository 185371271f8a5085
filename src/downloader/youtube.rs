//! Video downloads through yt-dlp.

use super::process::run_streaming;
use super::progress::parse_percentage;
use super::{DownloadError, DownloadedFile};
use crate::config::Settings;
use std::ffi::OsString;
use std::path::Path;
use tokio::process::Command;
use tokio::sync::mpsc::Sender;
use tracing::{debug, info};

/// Output name stem inside the request workspace
const OUTPUT_STEM: &str = "download";

/// Leftovers yt-dlp may keep next to the real file
const PARTIAL_SUFFIXES: &[&str] = &[".part", ".ytdl", ".temp", ".json"];

/// Arguments for a format-selected download with line-buffered progress
#[must_use]
pub fn format_download_args(
    cookies: Option<&Path>,
    format: &str,
    url: &str,
    dest: &Path,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();
    if let Some(cookies) = cookies {
        args.push("--cookies".into());
        args.push(cookies.into());
    }
    args.push("-f".into());
    args.push(format.into());
    args.push("-o".into());
    args.push(dest.join(format!("{OUTPUT_STEM}.%(ext)s")).into_os_string());
    args.push("--no-playlist".into());
    args.push("--newline".into());
    // URL goes last, after `--` so it can never be read as an option
    args.push("--".into());
    args.push(url.into());
    args
}

/// Download `format_id` of `url` into `dest`, sending nonzero percentages to `progress`.
///
/// # Errors
///
/// Fails when the cookie jar is missing, yt-dlp fails or times out, or no
/// file was produced.
pub async fn fetch_format(
    settings: &Settings,
    format_id: &str,
    url: &str,
    dest: &Path,
    progress: Sender<u8>,
) -> Result<DownloadedFile, DownloadError> {
    let cookies = settings
        .ytdlp_cookies
        .as_deref()
        .ok_or(DownloadError::MissingConfig("YTDLP_COOKIES"))?;

    let mut cmd = Command::new(&settings.ytdlp_bin);
    cmd.args(format_download_args(Some(cookies), format_id, url, dest));

    info!(url = %url, format_id = %format_id, "Starting format download");
    run_streaming(cmd, &settings.ytdlp_bin, settings.download_timeout(), |line| {
        let percent = parse_percentage(line);
        if percent > 0 {
            // A full channel only means the consumer is behind; skipping a value is fine
            let _ = progress.try_send(percent);
        }
    })
    .await?;

    let file = locate_download(dest, &settings.ytdlp_bin).await?;
    info!(path = %file.path.display(), size = file.size, "Format download finished");
    Ok(file)
}

/// Download the best single-file rendition of any URL yt-dlp supports.
///
/// # Errors
///
/// Fails when yt-dlp fails or times out, or no file was produced.
pub async fn fetch_best(
    settings: &Settings,
    url: &str,
    dest: &Path,
) -> Result<DownloadedFile, DownloadError> {
    let mut cmd = Command::new(&settings.ytdlp_bin);
    cmd.args(format_download_args(
        settings.ytdlp_cookies.as_deref(),
        "best",
        url,
        dest,
    ));

    info!(url = %url, "Starting best-quality download");
    run_streaming(cmd, &settings.ytdlp_bin, settings.download_timeout(), |line| {
        debug!(line = %line, "yt-dlp");
    })
    .await?;

    locate_download(dest, &settings.ytdlp_bin).await
}

fn is_partial(name: &str) -> bool {
    PARTIAL_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Find the single finished file yt-dlp left in `dir`.
///
/// # Errors
///
/// Returns `NoOutput` when the directory holds no finished regular file.
pub async fn locate_download(dir: &Path, tool: &str) -> Result<DownloadedFile, DownloadError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut candidates = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_partial(&name) {
            continue;
        }
        candidates.push((name, entry.path(), metadata.len()));
    }

    candidates.sort_by(|a, b| a.0.cmp(&b.0));
    candidates
        .into_iter()
        .next()
        .map(|(_, path, size)| DownloadedFile { path, size })
        .ok_or_else(|| DownloadError::NoOutput {
            tool: tool.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_select_format_and_keep_url_last() {
        let args = format_download_args(
            Some(Path::new("/etc/yt-cookies.txt")),
            "22",
            "https://youtu.be/abc",
            Path::new("/tmp/ws"),
        );
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(&args[..2], ["--cookies", "/etc/yt-cookies.txt"]);
        let f = args.iter().position(|a| a == "-f").map(|i| &args[i + 1]);
        assert_eq!(f.map(String::as_str), Some("22"));
        assert!(args.contains(&"--newline".to_string()));
        assert!(args.contains(&"/tmp/ws/download.%(ext)s".to_string()));
        assert_eq!(&args[args.len() - 2..], ["--", "https://youtu.be/abc"]);
    }

    #[test]
    fn args_without_cookies() {
        let args = format_download_args(None, "best", "https://example.com/v", Path::new("/t"));
        assert_eq!(args[0], OsString::from("-f"));
    }

    #[tokio::test]
    async fn locates_finished_file_and_skips_partials() -> Result<(), DownloadError> {
        let dir = tempfile::tempdir()?;
        tokio::fs::write(dir.path().join("download.mp4.part"), b"partial").await?;
        tokio::fs::write(dir.path().join("download.mp4"), b"0123456789").await?;

        let file = locate_download(dir.path(), "yt-dlp").await?;
        assert_eq!(file.path, dir.path().join("download.mp4"));
        assert_eq!(file.size, 10);
        Ok(())
    }

    #[tokio::test]
    async fn empty_directory_is_no_output() -> Result<(), DownloadError> {
        let dir = tempfile::tempdir()?;
        let result = locate_download(dir.path(), "yt-dlp").await;
        assert!(matches!(result, Err(DownloadError::NoOutput { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn fetch_requires_cookies() -> Result<(), DownloadError> {
        let dir = tempfile::tempdir()?;
        let (tx, _rx) = tokio::sync::mpsc::channel(4);
        let settings = Settings::with_token("dummy");
        let result = fetch_format(&settings, "22", "https://youtu.be/abc", dir.path(), tx).await;
        assert!(matches!(
            result,
            Err(DownloadError::MissingConfig("YTDLP_COOKIES"))
        ));
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn fetch_streams_progress_from_tool() -> Result<(), DownloadError> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir()?;
        let dest = dir.path().join("ws");
        tokio::fs::create_dir(&dest).await?;

        // Stand-in for yt-dlp: prints progress and writes the output file
        let script = dir.path().join("fake-ytdlp");
        let body = format!(
            "#!/bin/sh\necho '[download]  25.0% of 1.00MiB'\necho '[download]  80.5% of 1.00MiB' 1>&2\nprintf 'video' > '{}/download.mp4'\n",
            dest.display()
        );
        tokio::fs::write(&script, body).await?;
        tokio::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).await?;

        let mut settings = Settings::with_token("dummy");
        settings.ytdlp_bin = script.to_string_lossy().into_owned();
        settings.ytdlp_cookies = Some(dir.path().join("cookies.txt"));

        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let file = fetch_format(&settings, "22", "https://youtu.be/abc", &dest, tx).await?;

        assert_eq!(file.size, 5);
        let mut seen = Vec::new();
        while let Ok(p) = rx.try_recv() {
            seen.push(p);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![25, 80]);
        Ok(())
    }
}
