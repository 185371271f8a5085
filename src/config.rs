//! Configuration and settings management
//!
//! Loads settings from config files and environment variables and defines
//! the constants shared by the downloader and the relay.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    #[serde(alias = "botkey")]
    pub telegram_token: String,

    /// Cookie jar passed to yt-dlp
    pub ytdlp_cookies: Option<PathBuf>,
    /// Cookie jar passed to gallery-dl
    pub gallerydl_cookies: Option<PathBuf>,

    /// yt-dlp executable
    #[serde(default = "default_ytdlp_bin")]
    pub ytdlp_bin: String,
    /// gallery-dl executable
    #[serde(default = "default_gallerydl_bin")]
    pub gallerydl_bin: String,

    /// Upper bound for a single external tool run, in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
    /// Number of download workers
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,
    /// Jobs allowed to wait for a worker before new ones are refused
    #[serde(default = "default_download_queue_size")]
    pub download_queue_size: usize,
    /// Re-encode Instagram videos with ffmpeg after download
    #[serde(default = "default_transcode_videos")]
    pub transcode_videos: bool,

    /// Comma-separated list of user IDs allowed to use the bot (everyone when unset)
    #[serde(rename = "allowed_users")]
    pub allowed_users_str: Option<String>,
}

fn default_ytdlp_bin() -> String {
    "yt-dlp".to_string()
}

fn default_gallerydl_bin() -> String {
    "gallery-dl".to_string()
}

const fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

const fn default_max_concurrent_downloads() -> usize {
    4
}

const fn default_download_queue_size() -> usize {
    32
}

const fn default_transcode_videos() -> bool {
    true
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use downloader_bot::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails or the bot token is missing.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // Local overrides, not checked into git
            .add_source(File::with_name("config/local").required(false))
            // Eg.. `APP__DOWNLOAD_TIMEOUT_SECS=60 ./target/app`
            .add_source(Environment::with_prefix("APP").separator("__"))
            // Plain variables: TELEGRAM_TOKEN, YTDLP_COOKIES, GALLERYDL_COOKIES, ...
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        let settings: Self = s.try_deserialize()?;
        if settings.telegram_token.trim().is_empty() {
            return Err(ConfigError::Message("telegram_token is empty".to_string()));
        }
        Ok(settings)
    }

    /// Settings with defaults for everything but the token, used by tests and tooling
    #[must_use]
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            telegram_token: token.into(),
            ytdlp_cookies: None,
            gallerydl_cookies: None,
            ytdlp_bin: default_ytdlp_bin(),
            gallerydl_bin: default_gallerydl_bin(),
            download_timeout_secs: default_download_timeout_secs(),
            max_concurrent_downloads: default_max_concurrent_downloads(),
            download_queue_size: default_download_queue_size(),
            transcode_videos: default_transcode_videos(),
            allowed_users_str: None,
        }
    }

    /// Timeout applied to every external tool invocation
    #[must_use]
    pub const fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    /// Returns the set of Telegram IDs allowed to use the bot.
    ///
    /// An empty set means the bot is open to everyone.
    #[must_use]
    pub fn allowed_users(&self) -> HashSet<i64> {
        self.allowed_users_str
            .as_ref()
            .map(|s| {
                s.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
                    .filter(|token| !token.is_empty())
                    .filter_map(|id| id.parse::<i64>().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether `user_id` may use the bot
    #[must_use]
    pub fn is_allowed(&self, user_id: i64) -> bool {
        let allowed = self.allowed_users();
        allowed.is_empty() || allowed.contains(&user_id)
    }
}

/// Default bound for one yt-dlp / gallery-dl run
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 600;

/// Minimum time between two progress edits of the same status message
pub const PROGRESS_EDIT_INTERVAL: Duration = Duration::from_secs(5);

/// Telegram refuses media groups with more attachments than this
pub const MEDIA_GROUP_LIMIT: usize = 10;

/// Telegram limit for inline button `callback_data`, in bytes
pub const CALLBACK_DATA_LIMIT: usize = 64;

/// Lines of tool output kept for error reports
pub const TOOL_OUTPUT_TAIL_LINES: usize = 50;

/// Characters kept of each reported tool output line
pub const TOOL_OUTPUT_LINE_MAX_CHARS: usize = 500;

// Telegram API retry configuration
/// Initial backoff before the first retry, in milliseconds
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Upper bound for the backoff, in milliseconds
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;
/// Retries after the first attempt
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    // Single test touching the environment to avoid races between tests
    #[test]
    fn test_config_env_loading() -> Result<(), Box<dyn std::error::Error>> {
        env::set_var("TELEGRAM_TOKEN", "dummy_token");
        env::set_var("YTDLP_COOKIES", "/tmp/yt.txt");
        env::set_var("GALLERYDL_COOKIES", "");

        let settings = Settings::new()?;
        assert_eq!(settings.telegram_token, "dummy_token");
        assert_eq!(settings.ytdlp_cookies, Some(PathBuf::from("/tmp/yt.txt")));
        // Empty variables are treated as unset
        assert_eq!(settings.gallerydl_cookies, None);
        assert_eq!(settings.ytdlp_bin, "yt-dlp");
        assert_eq!(settings.download_timeout(), Duration::from_secs(600));

        env::remove_var("TELEGRAM_TOKEN");
        env::remove_var("YTDLP_COOKIES");
        env::remove_var("GALLERYDL_COOKIES");
        Ok(())
    }

    #[test]
    fn test_list_parsing() {
        let mut settings = Settings::with_token("dummy");

        assert!(settings.allowed_users().is_empty());
        assert!(settings.is_allowed(42));

        settings.allowed_users_str = Some("123,456".to_string());
        let allowed = settings.allowed_users();
        assert!(allowed.contains(&123));
        assert!(allowed.contains(&456));
        assert_eq!(allowed.len(), 2);
        assert!(!settings.is_allowed(42));

        settings.allowed_users_str = Some("333; 444, 555".to_string());
        assert_eq!(settings.allowed_users().len(), 3);

        settings.allowed_users_str = Some("abc, 777".to_string());
        let allowed = settings.allowed_users();
        assert!(allowed.contains(&777));
        assert_eq!(allowed.len(), 1);
    }
}
