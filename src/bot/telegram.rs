use crate::bot::relay::{ChatTransport, FormatButton};
use crate::bot::resilient::{
    delete_message_resilient, edit_message_safe_resilient, send_html_resilient,
    send_keyboard_resilient, send_media_group_resilient, send_message_resilient,
    send_photo_resilient, send_video_resilient,
};
use crate::bot::views::format_keyboard;
use crate::downloader::MediaFile;
use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use teloxide::prelude::*;
use teloxide::types::{ChatId, MessageId};

/// [`ChatTransport`] talking to the real Bot API.
#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    /// Wrap a bot handle
    pub const fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId> {
        let msg = send_message_resilient(&self.bot, chat_id, text, reply_to).await?;
        Ok(msg.id)
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageId> {
        let msg = send_html_resilient(&self.bot, chat_id, html).await?;
        Ok(msg.id)
    }

    async fn send_format_menu(
        &self,
        chat_id: ChatId,
        text: &str,
        buttons: &[FormatButton],
    ) -> Result<MessageId> {
        let msg = send_keyboard_resilient(&self.bot, chat_id, text, format_keyboard(buttons)).await?;
        Ok(msg.id)
    }

    async fn edit_text(&self, chat_id: ChatId, message_id: MessageId, text: &str) -> Result<()> {
        edit_message_safe_resilient(&self.bot, chat_id, message_id, text).await
    }

    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<()> {
        delete_message_resilient(&self.bot, chat_id, message_id).await
    }

    async fn send_video(&self, chat_id: ChatId, path: &Path) -> Result<()> {
        send_video_resilient(&self.bot, chat_id, path).await
    }

    async fn send_photo(&self, chat_id: ChatId, path: &Path) -> Result<()> {
        send_photo_resilient(&self.bot, chat_id, path).await
    }

    async fn send_media_group(&self, chat_id: ChatId, media: &[MediaFile]) -> Result<()> {
        send_media_group_resilient(&self.bot, chat_id, media).await
    }
}
