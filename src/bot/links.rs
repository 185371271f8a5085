//! Link recognition and callback payloads.

// lazy_regex! validates the pattern at compile time
#![allow(clippy::non_std_lazy_statics)]

use lazy_regex::lazy_regex;
use thiserror::Error;
use url::Url;

/// Host that serves embeddable previews of tweets
pub const FXTWITTER_HOST: &str = "fxtwitter.com";

/// Separator between format id and URL in callback data
const PAYLOAD_SEPARATOR: char = '|';

/// Format ids yt-dlp reports (`22`, `137+140`, `hls-720p`); never starts with `-`
static RE_FORMAT_ID: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"^[A-Za-z0-9_.+][A-Za-z0-9_.+\-]{0,31}$");

/// YouTube video ids
static RE_VIDEO_ID: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"^[A-Za-z0-9_\-]{6,20}$");

/// Supported platform of a shared link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// youtube.com / youtu.be
    YouTube,
    /// instagram.com
    Instagram,
    /// twitter.com / x.com / t.co
    Twitter,
}

impl LinkKind {
    /// Matching order when one message holds several links
    pub const PRIORITY: [Self; 3] = [Self::YouTube, Self::Instagram, Self::Twitter];

    const fn domains(self) -> &'static [&'static str] {
        match self {
            Self::YouTube => &["youtube.com", "youtu.be"],
            Self::Instagram => &["instagram.com"],
            Self::Twitter => &["twitter.com", "t.co", "x.com"],
        }
    }

    /// Name used in attribution lines
    #[must_use]
    pub const fn platform(self) -> &'static str {
        match self {
            Self::YouTube => "YouTube",
            Self::Instagram => "Instagram",
            Self::Twitter => "Twitter",
        }
    }

    fn matches(self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        self.domains()
            .iter()
            .any(|d| host == *d || host.strip_suffix(*d).is_some_and(|rest| rest.ends_with('.')))
    }
}

/// A supported link found in a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Platform
    pub kind: LinkKind,
    /// Parsed URL
    pub url: Url,
}

/// Parse an http(s) URL, accepting a missing scheme (`youtu.be/abc`).
///
/// Surrounding brackets and quotes are ignored.
#[must_use]
pub fn parse_web_url(token: &str) -> Option<Url> {
    let token = token.trim_matches(|c: char| matches!(c, '<' | '>' | '(' | ')' | '"' | '\''));
    let url = match Url::parse(token) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            Url::parse(&format!("https://{token}")).ok()?
        }
        Err(_) => return None,
    };
    let dotted_host = url.host_str().is_some_and(|h| h.contains('.'));
    (matches!(url.scheme(), "http" | "https") && dotted_host).then_some(url)
}

/// Find the first supported link in `text`.
///
/// Platforms are tried in [`LinkKind::PRIORITY`] order, so a message with
/// both a YouTube and an Instagram link is treated as a YouTube request.
///
/// # Examples
///
/// ```
/// use downloader_bot::bot::links::{find_link, LinkKind};
///
/// let link = find_link("look https://youtu.be/dQw4w9WgXcQ").map(|l| l.kind);
/// assert_eq!(link, Some(LinkKind::YouTube));
/// assert_eq!(find_link("no links here"), None);
/// ```
#[must_use]
pub fn find_link(text: &str) -> Option<Link> {
    let urls: Vec<Url> = text.split_whitespace().filter_map(parse_web_url).collect();
    LinkKind::PRIORITY.into_iter().find_map(|kind| {
        urls.iter().find(|url| kind.matches(url)).map(|url| Link {
            kind,
            url: url.clone(),
        })
    })
}

/// Point a tweet link at fxtwitter.com, keeping path and query.
///
/// # Errors
///
/// Returns an error if the URL cannot carry a host.
pub fn fxtwitter_url(url: &Url) -> Result<Url, url::ParseError> {
    let mut rewritten = url.clone();
    rewritten.set_host(Some(FXTWITTER_HOST))?;
    Ok(rewritten)
}

fn youtube_video_id(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_ascii_lowercase();
    let mut segments = url.path_segments()?;
    let id = if host == "youtu.be" {
        segments.next().map(str::to_string)
    } else {
        match segments.next()? {
            "watch" => url
                .query_pairs()
                .find(|(k, _)| k == "v")
                .map(|(_, v)| v.into_owned()),
            "shorts" | "live" | "embed" => segments.next().map(str::to_string),
            _ => None,
        }
    };
    id.filter(|id| RE_VIDEO_ID.is_match(id))
}

/// Shortest equivalent form of a YouTube URL, used to keep callback data small.
///
/// Unrecognised shapes are returned unchanged.
///
/// # Examples
///
/// ```
/// use downloader_bot::bot::links::compact_youtube_url;
/// use url::Url;
///
/// let url = Url::parse("https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=PL1&index=3").unwrap();
/// assert_eq!(compact_youtube_url(&url), "https://youtu.be/dQw4w9WgXcQ");
/// ```
#[must_use]
pub fn compact_youtube_url(url: &Url) -> String {
    youtube_video_id(url).map_or_else(|| url.to_string(), |id| format!("https://youtu.be/{id}"))
}

/// Errors for callback data that did not come from one of our menus
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    /// No separator, or an empty half
    #[error("malformed callback payload")]
    Malformed,
    /// Format id with characters yt-dlp never emits
    #[error("invalid format id: {0}")]
    InvalidFormatId(String),
    /// URL half is not an http(s) URL
    #[error("invalid URL in callback payload")]
    InvalidUrl,
}

/// Format choice carried by an inline button, encoded as `formatID|URL`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackPayload {
    /// yt-dlp format id
    pub format_id: String,
    /// Video URL
    pub url: String,
}

impl CallbackPayload {
    /// Wire form stored in `callback_data`
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{}{PAYLOAD_SEPARATOR}{}", self.format_id, self.url)
    }

    /// Parse and validate callback data.
    ///
    /// Splits on the first separator only, so URLs may contain `|`.
    ///
    /// # Errors
    ///
    /// Returns a [`PayloadError`] for anything that is not a well-formed
    /// `formatID|http(s)-URL` pair.
    pub fn parse(data: &str) -> Result<Self, PayloadError> {
        let (format_id, url) = data
            .split_once(PAYLOAD_SEPARATOR)
            .ok_or(PayloadError::Malformed)?;
        if format_id.is_empty() || url.is_empty() {
            return Err(PayloadError::Malformed);
        }
        if !RE_FORMAT_ID.is_match(format_id) {
            return Err(PayloadError::InvalidFormatId(format_id.to_string()));
        }
        let parsed = Url::parse(url).map_err(|_| PayloadError::InvalidUrl)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(PayloadError::InvalidUrl);
        }
        Ok(Self {
            format_id: format_id.to_string(),
            url: url.to_string(),
        })
    }
}
