//! User-facing texts and keyboards.

use crate::bot::links::CallbackPayload;
use crate::bot::relay::FormatButton;
use crate::config::CALLBACK_DATA_LIMIT;
use crate::downloader::FormatDisplay;
use crate::utils::format_megabytes;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use tracing::debug;

/// Header of the format menu
pub const CHOOSE_FORMAT: &str = "Choose a format:";
/// Format listing failed or offered nothing
pub const FORMATS_FAILED: &str = "Failed to fetch formats";
/// Initial text of a download status message
pub const DOWNLOADING: &str = "Downloading...";
/// Callback answer after a format was picked
pub const STARTING_DOWNLOAD: &str = "Starting download...";
/// Placeholder replying to an Instagram link
pub const INSTAGRAM_PLACEHOLDER: &str = "Downloading files from Instagram";
/// Generic failure shown in place of tool errors
pub const DOWNLOAD_FAILED: &str = "Download failed";
/// Job queue is at capacity
pub const QUEUE_FULL: &str = "Too many downloads in progress, try again later";
/// `/get` without an argument
pub const GET_USAGE: &str = "Usage: /get <url>";

/// Status line while a download is running
#[must_use]
pub fn progress_text(percent: u8) -> String {
    format!("Downloading: {percent}%")
}

/// Status line once the file is downloaded and being sent
#[must_use]
pub fn uploading_text(size_bytes: u64) -> String {
    format!("Uploading: {}", format_megabytes(size_bytes))
}

/// Reply to `/start` and `/help`
#[must_use]
pub fn help_text(commands: &str) -> String {
    format!(
        "Send me a link and I will post the media here.\n\n\
         YouTube: pick a format from the menu.\n\
         Instagram: all photos and videos of the post are sent as an album.\n\
         Twitter/X: the link is replaced with an embeddable fxtwitter.com one.\n\n\
         {commands}"
    )
}

/// One button per offered format, in listing order.
///
/// Formats whose payload would not fit into Telegram's callback data, or would
/// be rejected when the button is pressed, are left out of the menu.
#[must_use]
pub fn format_buttons(formats: &[FormatDisplay], url: &str) -> Vec<FormatButton> {
    formats
        .iter()
        .filter_map(|f| {
            let data = CallbackPayload {
                format_id: f.format_id.clone(),
                url: url.to_string(),
            }
            .encode();
            if data.len() > CALLBACK_DATA_LIMIT {
                debug!(format_id = %f.format_id, len = data.len(), "Callback data too long, format skipped");
                return None;
            }
            if let Err(e) = CallbackPayload::parse(&data) {
                debug!(format_id = %f.format_id, error = %e, "Unusable format id, format skipped");
                return None;
            }
            Some(FormatButton {
                label: f.label.clone(),
                data,
            })
        })
        .collect()
}

/// Inline keyboard with one button per row
#[must_use]
pub fn format_keyboard(buttons: &[FormatButton]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(buttons.iter().map(|b| {
        vec![InlineKeyboardButton::callback(
            b.label.clone(),
            b.data.clone(),
        )]
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::FormatKind;

    fn format(id: &str, label: &str) -> FormatDisplay {
        FormatDisplay {
            format_id: id.to_string(),
            label: label.to_string(),
            kind: FormatKind::Video,
            size_bytes: Some(1),
        }
    }

    #[test]
    fn buttons_carry_payload_and_keep_order() {
        let formats = vec![format("18", "mp4 | 360p | 1.00 MB"), format("22", "mp4 | 720p | 9.00 MB")];
        let buttons = format_buttons(&formats, "https://youtu.be/abc");

        assert_eq!(
            buttons,
            vec![
                FormatButton {
                    label: "mp4 | 360p | 1.00 MB".to_string(),
                    data: "18|https://youtu.be/abc".to_string(),
                },
                FormatButton {
                    label: "mp4 | 720p | 9.00 MB".to_string(),
                    data: "22|https://youtu.be/abc".to_string(),
                },
            ]
        );
    }

    #[test]
    fn oversized_payloads_are_dropped() {
        let long_url = format!("https://example.com/{}", "a".repeat(40));
        let formats = vec![format("1", "short"), format("hls-1080p-very-long-id", "long")];
        let buttons = format_buttons(&formats, &long_url);

        assert_eq!(buttons.len(), 1);
        assert!(buttons.iter().all(|b| b.data.len() <= CALLBACK_DATA_LIMIT));
    }

    #[test]
    fn unusable_format_ids_are_dropped() {
        let formats = vec![
            format("-exec", "flag"),
            format("a|b", "separator"),
            format("hls 720", "space"),
            format("137+140", "merged"),
        ];
        let buttons = format_buttons(&formats, "https://youtu.be/abc");

        assert_eq!(
            buttons,
            vec![FormatButton {
                label: "merged".to_string(),
                data: "137+140|https://youtu.be/abc".to_string(),
            }]
        );
    }

    #[test]
    fn keyboard_has_one_button_per_row() {
        let buttons = format_buttons(&[format("18", "a"), format("22", "b")], "https://youtu.be/x");
        let keyboard = format_keyboard(&buttons);
        assert_eq!(keyboard.inline_keyboard.len(), 2);
        assert!(keyboard.inline_keyboard.iter().all(|row| row.len() == 1));
    }

    #[test]
    fn progress_line() {
        assert_eq!(progress_text(42), "Downloading: 42%");
        assert_eq!(uploading_text(5 * 1024 * 1024), "Uploading: 5.00 MB");
    }
}
