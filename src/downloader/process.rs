//! Child process plumbing shared by the yt-dlp and gallery-dl wrappers.
//!
//! Every run is bounded by a timeout; children are spawned with
//! `kill_on_drop` so an abandoned run never outlives its request. On unix
//! each tool gets its own process group, and a timeout kills the whole group
//! so helpers it started (ffmpeg merges, transcode hooks) die with it.

use super::DownloadError;
use crate::config::{TOOL_OUTPUT_LINE_MAX_CHARS, TOOL_OUTPUT_TAIL_LINES};
use crate::utils::truncate_str;
use std::collections::VecDeque;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

/// Keeps the last lines of a tool's output for error reports
#[derive(Debug)]
struct OutputTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl OutputTail {
    fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, line: &str) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines
            .push_back(truncate_str(line, TOOL_OUTPUT_LINE_MAX_CHARS));
    }

    fn join(&self) -> String {
        self.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

fn tail_of(text: &str) -> String {
    let mut tail = OutputTail::new(TOOL_OUTPUT_TAIL_LINES);
    for line in text.lines() {
        tail.push(line);
    }
    tail.join()
}

fn spawn(mut cmd: Command, tool: &str) -> Result<tokio::process::Child, DownloadError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    cmd.spawn().map_err(|source| DownloadError::Spawn {
        tool: tool.to_string(),
        source,
    })
}

/// SIGKILL the process group led by `pid`.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>, tool: &str) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        debug!(tool = %tool, pid, error = %e, "Process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>, _tool: &str) {}

/// Run a tool to completion and return its stdout.
///
/// # Errors
///
/// Fails when the tool cannot be started, exits non-zero (stderr attached)
/// or exceeds `timeout`, in which case it is killed.
pub async fn run_captured(
    cmd: Command,
    tool: &str,
    timeout: Duration,
) -> Result<String, DownloadError> {
    debug!(tool = %tool, "Running tool (captured)");
    let child = spawn(cmd, tool)?;
    let pid = child.id();

    // On timeout the child is dropped with the future and killed via kill_on_drop
    let Ok(output) = tokio::time::timeout(timeout, child.wait_with_output()).await else {
        warn!(tool = %tool, timeout_secs = timeout.as_secs(), "Tool timed out, killed");
        kill_process_group(pid, tool);
        return Err(DownloadError::Timeout {
            tool: tool.to_string(),
            timeout,
        });
    };
    let output = output?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = if stderr.trim().is_empty() {
            String::from_utf8_lossy(&output.stdout).into_owned()
        } else {
            stderr.into_owned()
        };
        return Err(DownloadError::ProcessFailed {
            tool: tool.to_string(),
            status: output.status.to_string(),
            output: tail_of(&combined),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run a tool while handing every output line to `on_line`.
///
/// stdout and stderr are merged line by line in arrival order. The run is
/// bounded by `timeout`; an expired run is killed.
///
/// # Errors
///
/// Fails when the tool cannot be started, exits non-zero (last lines of
/// output attached) or exceeds `timeout`.
pub async fn run_streaming<F>(
    cmd: Command,
    tool: &str,
    timeout: Duration,
    mut on_line: F,
) -> Result<(), DownloadError>
where
    F: FnMut(&str) + Send,
{
    debug!(tool = %tool, "Running tool (streaming)");
    let mut child = spawn(cmd, tool)?;
    let pid = child.id();

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("stdout was not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("stderr was not captured"))?;

    let mut stdout_reader = BufReader::new(stdout).lines();
    let mut stderr_reader = BufReader::new(stderr).lines();
    let mut tail = OutputTail::new(TOOL_OUTPUT_TAIL_LINES);

    let streaming = async {
        let mut stdout_open = true;
        let mut stderr_open = true;

        while stdout_open || stderr_open {
            let (stream, line) = tokio::select! {
                line = stdout_reader.next_line(), if stdout_open => (Stream::Stdout, line),
                line = stderr_reader.next_line(), if stderr_open => (Stream::Stderr, line),
            };

            match line {
                Ok(Some(line)) => {
                    on_line(&line);
                    tail.push(&line);
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(tool = %tool, stream = ?stream, error = %e, "Failed to read tool output");
                }
            }

            match stream {
                Stream::Stdout => stdout_open = false,
                Stream::Stderr => stderr_open = false,
            }
        }

        child.wait().await
    };

    let result = tokio::time::timeout(timeout, streaming).await;
    let Ok(status) = result else {
        warn!(tool = %tool, timeout_secs = timeout.as_secs(), "Tool timed out, killing");
        kill_process_group(pid, tool);
        if let Err(e) = child.kill().await {
            warn!(tool = %tool, error = %e, "Failed to kill timed out tool");
        }
        return Err(DownloadError::Timeout {
            tool: tool.to_string(),
            timeout,
        });
    };
    let status = status?;

    if !status.success() {
        return Err(DownloadError::ProcessFailed {
            tool: tool.to_string(),
            status: status.to_string(),
            output: tail.join(),
        });
    }

    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[tokio::test]
    async fn streaming_merges_stdout_and_stderr() {
        let mut lines = Vec::new();
        let result = run_streaming(
            sh("echo '[download]  10.0% of 5MiB'; echo 'warning' 1>&2; echo done"),
            "sh",
            Duration::from_secs(10),
            |line| lines.push(line.to_string()),
        )
        .await;

        assert!(result.is_ok(), "unexpected error: {result:?}");
        assert_eq!(lines.len(), 3);
        assert!(lines.contains(&"warning".to_string()));
        assert!(lines.contains(&"[download]  10.0% of 5MiB".to_string()));
    }

    #[tokio::test]
    async fn streaming_failure_carries_output() {
        let result = run_streaming(
            sh("echo 'ERROR: Video unavailable' 1>&2; exit 3"),
            "sh",
            Duration::from_secs(10),
            |_| {},
        )
        .await;

        match result {
            Err(DownloadError::ProcessFailed { tool, output, .. }) => {
                assert_eq!(tool, "sh");
                assert!(output.contains("Video unavailable"));
            }
            other => panic!("expected ProcessFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn streaming_timeout_kills_the_tool() {
        let started = std::time::Instant::now();
        let result = run_streaming(sh("sleep 30"), "sh", Duration::from_millis(200), |_| {}).await;

        assert!(matches!(result, Err(DownloadError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    fn spawns_late_writer(marker: &std::path::Path) -> Command {
        sh(&format!("(sleep 1; touch '{}') & wait", marker.display()))
    }

    #[tokio::test]
    async fn streaming_timeout_kills_background_children() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let marker = dir.path().join("marker");

        let result = run_streaming(
            spawns_late_writer(&marker),
            "sh",
            Duration::from_millis(200),
            |_| {},
        )
        .await;
        assert!(matches!(result, Err(DownloadError::Timeout { .. })));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "background child outlived the timeout");
        Ok(())
    }

    #[tokio::test]
    async fn captured_timeout_kills_background_children() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let marker = dir.path().join("marker");

        let result = run_captured(spawns_late_writer(&marker), "sh", Duration::from_millis(200)).await;
        assert!(matches!(result, Err(DownloadError::Timeout { .. })));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "background child outlived the timeout");
        Ok(())
    }

    #[tokio::test]
    async fn captured_returns_stdout() -> Result<(), DownloadError> {
        let out = run_captured(sh("printf '{\"a\":1}'"), "sh", Duration::from_secs(10)).await?;
        assert_eq!(out, "{\"a\":1}");
        Ok(())
    }

    #[tokio::test]
    async fn captured_timeout() {
        let result = run_captured(sh("sleep 30"), "sh", Duration::from_millis(200)).await;
        assert!(matches!(result, Err(DownloadError::Timeout { .. })));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let cmd = Command::new("definitely-not-a-real-downloader-binary");
        let result = run_captured(cmd, "nope", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(DownloadError::Spawn { .. })));
    }

    #[test]
    fn tail_keeps_last_lines() {
        let text = (0..120).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        let tail = tail_of(&text);
        assert_eq!(tail.lines().count(), TOOL_OUTPUT_TAIL_LINES);
        assert!(tail.ends_with("119"));
    }

    #[test]
    fn tail_caps_long_lines() {
        let text = format!("short\n{}", "é".repeat(TOOL_OUTPUT_LINE_MAX_CHARS + 20));
        let tail = tail_of(&text);
        let last = tail.lines().next_back().unwrap_or_default();
        assert_eq!(last.chars().count(), TOOL_OUTPUT_LINE_MAX_CHARS);
        assert!(tail.starts_with("short\n"));
    }
}
