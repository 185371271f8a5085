//! Telegram bot that turns YouTube, Instagram and Twitter/X links into media
//! posted back into the chat.
//!
//! The heavy lifting is done by external tools (`yt-dlp`, `gallery-dl`,
//! `ffmpeg`); this crate drives them, scrapes their progress output and relays
//! the results through the Bot API.

/// Telegram handlers, relay and job scheduling
pub mod bot;
/// Settings and tunable constants
pub mod config;
/// External downloader tools and their output
pub mod downloader;
/// Shared helpers
pub mod utils;

/// Test doubles
#[cfg(test)]
pub mod testing;
