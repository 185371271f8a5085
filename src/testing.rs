//! Test doubles for the pipeline seams.

use crate::bot::relay::{ChatTransport, FormatButton};
use crate::downloader::{DownloadedFile, FormatDisplay, FormatKind, MediaFile, MockMediaSource};
use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use teloxide::types::{ChatId, MessageId};
use tokio::sync::Mutex;

/// One outbound Bot API call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    /// `send_text`
    Text {
        /// Message text
        text: String,
        /// Replied-to message
        reply_to: Option<MessageId>,
    },
    /// `send_html`
    Html(String),
    /// `send_format_menu`
    Menu {
        /// Header text
        text: String,
        /// Buttons in order
        buttons: Vec<FormatButton>,
    },
    /// `edit_text`
    Edit {
        /// Edited message
        id: MessageId,
        /// New text
        text: String,
    },
    /// `delete_message`
    Delete(MessageId),
    /// `send_video`, with whether the file existed at upload time
    Video(PathBuf, bool),
    /// `send_photo`
    Photo(PathBuf),
    /// `send_media_group`
    Group(Vec<PathBuf>),
}

/// [`ChatTransport`] that records every call and hands out increasing ids
#[derive(Debug)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Sent>>,
    next_id: AtomicI32,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            next_id: AtomicI32::new(100),
        }
    }
}

impl RecordingTransport {
    /// Calls so far, in order
    pub async fn sent(&self) -> Vec<Sent> {
        self.sent.lock().await.clone()
    }

    async fn record(&self, call: Sent) -> MessageId {
        self.sent.lock().await.push(call);
        MessageId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_text(
        &self,
        _chat_id: ChatId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId> {
        Ok(self
            .record(Sent::Text {
                text: text.to_string(),
                reply_to,
            })
            .await)
    }

    async fn send_html(&self, _chat_id: ChatId, html: &str) -> Result<MessageId> {
        Ok(self.record(Sent::Html(html.to_string())).await)
    }

    async fn send_format_menu(
        &self,
        _chat_id: ChatId,
        text: &str,
        buttons: &[FormatButton],
    ) -> Result<MessageId> {
        Ok(self
            .record(Sent::Menu {
                text: text.to_string(),
                buttons: buttons.to_vec(),
            })
            .await)
    }

    async fn edit_text(&self, _chat_id: ChatId, message_id: MessageId, text: &str) -> Result<()> {
        self.record(Sent::Edit {
            id: message_id,
            text: text.to_string(),
        })
        .await;
        Ok(())
    }

    async fn delete_message(&self, _chat_id: ChatId, message_id: MessageId) -> Result<()> {
        self.record(Sent::Delete(message_id)).await;
        Ok(())
    }

    async fn send_video(&self, _chat_id: ChatId, path: &Path) -> Result<()> {
        self.record(Sent::Video(path.to_path_buf(), path.exists()))
            .await;
        Ok(())
    }

    async fn send_photo(&self, _chat_id: ChatId, path: &Path) -> Result<()> {
        self.record(Sent::Photo(path.to_path_buf())).await;
        Ok(())
    }

    async fn send_media_group(&self, _chat_id: ChatId, media: &[MediaFile]) -> Result<()> {
        self.record(Sent::Group(media.iter().map(|m| m.path.clone()).collect()))
            .await;
        Ok(())
    }
}

/// A displayable format with a fixed size
#[must_use]
pub fn format(id: &str, label: &str) -> FormatDisplay {
    FormatDisplay {
        format_id: id.to_string(),
        label: label.to_string(),
        kind: FormatKind::Video,
        size_bytes: Some(1024),
    }
}

/// A media source expecting exactly one download of `format_id` from `url`,
/// which writes `download.mp4` and reports 50%
#[must_use]
pub fn mock_source_writing_video(format_id: &'static str, url: &'static str) -> MockMediaSource {
    let mut mock = MockMediaSource::new();
    mock.expect_fetch_format()
        .withf(move |f, u, _, _| f.to_string() == format_id && u.to_string() == url)
        .times(1)
        .returning(|_, _, dest, progress| {
            let path = dest.join("download.mp4");
            std::fs::write(&path, b"video")?;
            let _ = progress.try_send(50);
            Ok(DownloadedFile { path, size: 5 })
        });
    mock
}
