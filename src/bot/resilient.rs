//! Bot API calls with automatic retry.
//!
//! Every helper goes through [`crate::utils::retry_telegram_operation`], so a
//! transient network failure costs a short backoff instead of a lost message.

use anyhow::Result;
use std::path::Path;
use teloxide::prelude::*;
use teloxide::types::{
    ChatId, InlineKeyboardMarkup, InputFile, InputMedia, InputMediaPhoto, InputMediaVideo,
    LinkPreviewOptions, Message, MessageId, ParseMode, ReplyParameters,
};
use tracing::{debug, warn};

use crate::downloader::{MediaFile, MediaKind};

const ERROR_NOT_MODIFIED: &str = "message is not modified";
const ERROR_NOT_FOUND: &str = "message to edit not found";

fn no_preview() -> LinkPreviewOptions {
    LinkPreviewOptions {
        is_disabled: true,
        url: None,
        prefer_small_media: false,
        prefer_large_media: false,
        show_above_text: false,
    }
}

/// Send a plain message, optionally replying to `reply_to`.
///
/// # Errors
///
/// Returns the last error after all retries are exhausted.
pub async fn send_message_resilient(
    bot: &Bot,
    chat_id: ChatId,
    text: impl Into<String>,
    reply_to: Option<MessageId>,
) -> Result<Message> {
    let text = text.into();
    crate::utils::retry_telegram_operation(|| async {
        let mut req = bot.send_message(chat_id, text.clone());
        if let Some(id) = reply_to {
            req = req.reply_parameters(ReplyParameters::new(id));
        }
        req.await
            .map_err(|e| anyhow::anyhow!("Telegram send error: {e}"))
    })
    .await
}

/// Send an HTML message with link previews turned off.
///
/// # Errors
///
/// Returns the last error after all retries are exhausted.
pub async fn send_html_resilient(
    bot: &Bot,
    chat_id: ChatId,
    html: impl Into<String>,
) -> Result<Message> {
    let html = html.into();
    crate::utils::retry_telegram_operation(|| async {
        bot.send_message(chat_id, html.clone())
            .parse_mode(ParseMode::Html)
            .link_preview_options(no_preview())
            .await
            .map_err(|e| anyhow::anyhow!("Telegram send error: {e}"))
    })
    .await
}

/// Send a message with an inline keyboard attached.
///
/// # Errors
///
/// Returns the last error after all retries are exhausted.
pub async fn send_keyboard_resilient(
    bot: &Bot,
    chat_id: ChatId,
    text: impl Into<String>,
    keyboard: InlineKeyboardMarkup,
) -> Result<Message> {
    let text = text.into();
    crate::utils::retry_telegram_operation(|| async {
        bot.send_message(chat_id, text.clone())
            .reply_markup(keyboard.clone())
            .await
            .map_err(|e| anyhow::anyhow!("Telegram send error: {e}"))
    })
    .await
}

/// Edit a message with automatic retry on network failures.
///
/// # Errors
///
/// Returns the last error after all retries are exhausted.
pub async fn edit_message_resilient(
    bot: &Bot,
    chat_id: ChatId,
    msg_id: MessageId,
    text: impl Into<String>,
) -> Result<Message> {
    let text = text.into();
    crate::utils::retry_telegram_operation(|| async {
        bot.edit_message_text(chat_id, msg_id, text.clone())
            .await
            .map_err(|e| anyhow::anyhow!("Telegram edit error: {e}"))
    })
    .await
}

/// Edit a status message, treating "not modified" and "not found" as success.
///
/// Progress edits race with deletion of the status message and often repeat
/// the same text; neither case is worth surfacing.
///
/// # Errors
///
/// Returns any other error after all retries are exhausted.
pub async fn edit_message_safe_resilient(
    bot: &Bot,
    chat_id: ChatId,
    msg_id: MessageId,
    text: &str,
) -> Result<()> {
    match edit_message_resilient(bot, chat_id, msg_id, text).await {
        Ok(_) => Ok(()),
        Err(e) if is_ignorable_edit_error(&e.to_string()) => {
            debug!("Message update skipped: {e}");
            Ok(())
        }
        Err(e) => {
            warn!("Failed to edit message after retries: {e}");
            Err(e)
        }
    }
}

fn is_ignorable_edit_error(message: &str) -> bool {
    message.contains(ERROR_NOT_MODIFIED) || message.contains(ERROR_NOT_FOUND)
}

/// Delete a message.
///
/// # Errors
///
/// Returns the last error after all retries are exhausted.
pub async fn delete_message_resilient(bot: &Bot, chat_id: ChatId, msg_id: MessageId) -> Result<()> {
    crate::utils::retry_telegram_operation(|| async {
        bot.delete_message(chat_id, msg_id)
            .await
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!("Telegram delete error: {e}"))
    })
    .await
}

/// Upload a video from disk, falling back to a document when Telegram
/// rejects it as native media.
///
/// # Errors
///
/// Returns an error if both the video and the document upload fail.
pub async fn send_video_resilient(bot: &Bot, chat_id: ChatId, path: &Path) -> Result<()> {
    let uploaded = crate::utils::retry_telegram_operation(|| async {
        bot.send_video(chat_id, InputFile::file(path.to_path_buf()))
            .supports_streaming(true)
            .await
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!("Telegram video upload error: {e}"))
    })
    .await;

    match uploaded {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "Failed to send video as native media; falling back to document"
            );
            bot.send_document(chat_id, InputFile::file(path.to_path_buf()))
                .await
                .map(|_| ())
                .map_err(Into::into)
        }
    }
}

/// Upload a photo from disk.
///
/// # Errors
///
/// Returns the last error after all retries are exhausted.
pub async fn send_photo_resilient(bot: &Bot, chat_id: ChatId, path: &Path) -> Result<()> {
    crate::utils::retry_telegram_operation(|| async {
        bot.send_photo(chat_id, InputFile::file(path.to_path_buf()))
            .await
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!("Telegram photo upload error: {e}"))
    })
    .await
}

fn input_media(file: &MediaFile) -> InputMedia {
    let input = InputFile::file(file.path.clone());
    match file.kind {
        MediaKind::Photo => InputMedia::Photo(InputMediaPhoto::new(input)),
        MediaKind::Video => InputMedia::Video(InputMediaVideo::new(input)),
    }
}

/// Upload several files from disk as one album.
///
/// # Errors
///
/// Returns the last error after all retries are exhausted.
pub async fn send_media_group_resilient(
    bot: &Bot,
    chat_id: ChatId,
    media: &[MediaFile],
) -> Result<()> {
    crate::utils::retry_telegram_operation(|| async {
        bot.send_media_group(chat_id, media.iter().map(input_media).collect::<Vec<_>>())
            .await
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!("Telegram media group error: {e}"))
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignorable_edit_errors() {
        assert!(is_ignorable_edit_error(
            "Telegram edit error: Bad Request: message is not modified: specified new message content is the same"
        ));
        assert!(is_ignorable_edit_error("Bad Request: message to edit not found"));
        assert!(!is_ignorable_edit_error("Forbidden: bot was blocked by the user"));
    }

    #[test]
    fn album_items_keep_their_kind() {
        let photo = input_media(&MediaFile {
            path: "/ws/001.jpg".into(),
            kind: MediaKind::Photo,
        });
        let video = input_media(&MediaFile {
            path: "/ws/002.mp4".into(),
            kind: MediaKind::Video,
        });
        assert!(matches!(photo, InputMedia::Photo(_)));
        assert!(matches!(video, InputMedia::Video(_)));
    }
}
