//! Chat-facing side of the bot.
//!
//! [`ChatTransport`] is the narrow set of Bot API calls the pipelines need,
//! so they can run against Telegram in production and against a recorder in
//! tests. The rest of the module renders attribution blocks and relays a
//! downloaded post in media-group sized batches.

use crate::config::MEDIA_GROUP_LIMIT;
use crate::downloader::{InstagramPost, MediaFile, MediaKind};
use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use teloxide::types::{ChatId, MessageId, UserId};
use tracing::{debug, info, warn};

/// One inline button of a format menu
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatButton {
    /// Text shown on the button
    pub label: String,
    /// Callback payload, at most 64 bytes
    pub data: String,
}

/// Outbound Bot API operations used by the pipelines
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send plain text, optionally as a reply
    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId>;

    /// Send HTML with link previews disabled
    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageId>;

    /// Send `text` with one button per row
    async fn send_format_menu(
        &self,
        chat_id: ChatId,
        text: &str,
        buttons: &[FormatButton],
    ) -> Result<MessageId>;

    /// Replace the text of a message sent earlier
    async fn edit_text(&self, chat_id: ChatId, message_id: MessageId, text: &str) -> Result<()>;

    /// Delete a message
    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<()>;

    /// Upload a local video file
    async fn send_video(&self, chat_id: ChatId, path: &Path) -> Result<()>;

    /// Upload a local photo
    async fn send_photo(&self, chat_id: ChatId, path: &Path) -> Result<()>;

    /// Upload 2 to 10 local files as one album
    async fn send_media_group(&self, chat_id: ChatId, media: &[MediaFile]) -> Result<()>;
}

/// A Telegram user as shown in attribution lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Person {
    /// Telegram user id
    pub id: UserId,
    /// Username, or first name when the user has none
    pub name: String,
}

impl Person {
    /// Build from a Telegram user
    #[must_use]
    pub fn from_user(user: &teloxide::types::User) -> Self {
        let name = user
            .username
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| user.first_name.clone());
        Self { id: user.id, name }
    }

    fn mention_html(&self) -> String {
        format!(
            "<a href=\"tg://user?id={}\">{}</a>",
            self.id.0,
            html_escape::encode_text(&self.name)
        )
    }
}

/// Where a relayed post came from and who shared it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution {
    /// Platform name used as link text, e.g. `Instagram`
    pub platform: &'static str,
    /// Link the user originally posted (or its rewrite)
    pub source_url: String,
    /// Author of the message carrying the link
    pub sender: Person,
    /// Author of the message that one replied to, if any
    pub reply_to: Option<Person>,
}

impl Attribution {
    /// Render the HTML attribution block, with `caption` (escaped) on top when non-empty.
    ///
    /// # Examples
    ///
    /// ```
    /// use downloader_bot::bot::relay::{Attribution, Person};
    /// use teloxide::types::UserId;
    ///
    /// let a = Attribution {
    ///     platform: "Twitter",
    ///     source_url: "https://fxtwitter.com/u/status/1".to_string(),
    ///     sender: Person { id: UserId(7), name: "alice".to_string() },
    ///     reply_to: None,
    /// };
    /// assert_eq!(
    ///     a.to_html(""),
    ///     "Source: <a href=\"https://fxtwitter.com/u/status/1\">Twitter</a>\n\n\
    ///      Sent by: <a href=\"tg://user?id=7\">alice</a>"
    /// );
    /// ```
    #[must_use]
    pub fn to_html(&self, caption: &str) -> String {
        let mut blocks = Vec::with_capacity(4);
        if !caption.trim().is_empty() {
            blocks.push(html_escape::encode_text(caption.trim()).into_owned());
        }
        blocks.push(format!(
            "Source: <a href=\"{}\">{}</a>",
            html_escape::encode_double_quoted_attribute(&self.source_url),
            self.platform
        ));
        blocks.push(format!("Sent by: {}", self.sender.mention_html()));
        if let Some(reply_to) = &self.reply_to {
            blocks.push(format!("In reply to: {}", reply_to.mention_html()));
        }
        blocks.join("\n\n")
    }
}

/// Split media into sendable batches of at most [`MEDIA_GROUP_LIMIT`], preserving order
#[must_use]
pub fn batch_media(media: &[MediaFile]) -> Vec<&[MediaFile]> {
    media.chunks(MEDIA_GROUP_LIMIT).collect()
}

async fn send_batch(
    transport: &dyn ChatTransport,
    chat_id: ChatId,
    batch: &[MediaFile],
) -> Result<()> {
    match batch {
        // Albums need at least two items
        [single] => match single.kind {
            MediaKind::Photo => transport.send_photo(chat_id, &single.path).await,
            MediaKind::Video => transport.send_video(chat_id, &single.path).await,
        },
        _ => transport.send_media_group(chat_id, batch).await,
    }
}

/// Post a downloaded gallery into the chat followed by its attribution, then
/// delete the `cleanup` messages.
///
/// Deletion is best effort: a failure is logged and does not fail the relay.
///
/// # Errors
///
/// Returns an error if any media batch or the attribution could not be sent.
pub async fn relay_post(
    transport: &dyn ChatTransport,
    chat_id: ChatId,
    post: &InstagramPost,
    attribution: &Attribution,
    cleanup: &[MessageId],
) -> Result<()> {
    let batches = batch_media(&post.media);
    for (index, batch) in batches.iter().enumerate() {
        debug!(chat_id = chat_id.0, batch = index, items = batch.len(), "Sending media batch");
        send_batch(transport, chat_id, batch).await?;
    }

    transport
        .send_html(chat_id, &attribution.to_html(&post.caption))
        .await?;

    info!(
        chat_id = chat_id.0,
        items = post.media.len(),
        batches = batches.len(),
        "Post relayed"
    );

    delete_all(transport, chat_id, cleanup).await;
    Ok(())
}

/// Delete messages, logging failures instead of returning them
pub async fn delete_all(transport: &dyn ChatTransport, chat_id: ChatId, ids: &[MessageId]) {
    for id in ids {
        if let Err(e) = transport.delete_message(chat_id, *id).await {
            warn!(chat_id = chat_id.0, message_id = id.0, error = %e, "Failed to delete message");
        }
    }
}
