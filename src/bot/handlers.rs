use crate::bot::pipeline::{IncomingText, Pipeline};
use crate::bot::relay::Person;
use crate::bot::views;
use anyhow::Result;
use std::sync::Arc;
use teloxide::{prelude::*, types::CallbackQuery, utils::command::BotCommands};
use tracing::{info, warn};

/// Bot commands
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    /// Show usage
    #[command(description = "Show usage.")]
    Start,
    /// Show usage
    #[command(description = "Show usage.")]
    Help,
    /// Best-quality download of any URL yt-dlp supports
    #[command(description = "Download a URL in the best available quality.")]
    Get(String),
}

/// Sender id, or 0 for messages without one (channel posts)
#[must_use]
pub fn get_user_id_safe(msg: &Message) -> i64 {
    msg.from.as_ref().map_or(0, |u| u.id.0.cast_signed())
}

/// Extract what the pipeline needs from a text message
#[must_use]
pub fn incoming_text(msg: &Message) -> Option<IncomingText> {
    let text = msg.text()?;
    let sender = msg.from.as_ref().map(Person::from_user)?;
    let reply_to = msg
        .reply_to_message()
        .and_then(|replied| replied.from.as_ref())
        .map(Person::from_user);

    Some(IncomingText {
        chat_id: msg.chat.id,
        message_id: msg.id,
        text: text.to_string(),
        sender,
        reply_to,
    })
}

/// Handle a bot command.
///
/// # Errors
///
/// Returns an error if a Telegram API call fails.
pub async fn command(bot: Bot, msg: Message, cmd: Command, pipeline: Arc<Pipeline>) -> Result<()> {
    match cmd {
        Command::Start | Command::Help => {
            let text = views::help_text(&Command::descriptions().to_string());
            bot.send_message(msg.chat.id, text).await?;
        }
        Command::Get(arg) => pipeline.handle_get(msg.chat.id, msg.id, &arg).await?,
    }
    Ok(())
}

/// Handle a plain text message.
///
/// # Errors
///
/// Returns an error if routing the message fails.
pub async fn text(msg: Message, pipeline: Arc<Pipeline>) -> Result<()> {
    let Some(incoming) = incoming_text(&msg) else {
        return Ok(());
    };
    pipeline.handle_text(incoming).await
}

/// Handle a press on a format button.
///
/// # Errors
///
/// Returns an error if the callback has no chat or the download cannot be queued.
pub async fn format_callback(bot: Bot, q: CallbackQuery, pipeline: Arc<Pipeline>) -> Result<()> {
    let Some(data) = q.data.as_deref() else {
        return Ok(());
    };

    if let Err(e) = bot
        .answer_callback_query(q.id.clone())
        .text(views::STARTING_DOWNLOAD)
        .await
    {
        warn!(error = %e, "Failed to answer callback query");
    }

    let chat_id = q
        .message
        .as_ref()
        .map(|msg| msg.chat().id)
        .ok_or_else(|| anyhow::anyhow!("Callback message missing chat id"))?;

    info!(user_id = q.from.id.0, chat_id = chat_id.0, "Format button pressed");
    pipeline.handle_format_choice(chat_id, data).await
}
