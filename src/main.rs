use dotenvy::dotenv;
use downloader_bot::bot::handlers::{self, get_user_id_safe, Command};
use downloader_bot::bot::{JobPool, Pipeline, TelegramTransport};
use downloader_bot::config::Settings;
use downloader_bot::downloader::ToolDownloader;
use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::CallbackQuery;
use tracing::{debug, error, info};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Regex patterns for redacting the bot token from logs
struct RedactionPatterns {
    token_url: Regex,
    token_bare: Regex,
    token_prefixed: Regex,
}

impl RedactionPatterns {
    /// Initialize all regex patterns
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            token_url: Regex::new(r"(https?://[^/]+/(?:file/)?bot)([0-9]+:[A-Za-z0-9_-]+)(/['\s]*)")?,
            token_bare: Regex::new(r"([0-9]{8,10}:[A-Za-z0-9_-]{35})")?,
            token_prefixed: Regex::new(r"(bot[0-9]{8,10}:)[A-Za-z0-9_-]+")?,
        })
    }

    fn redact(&self, input: &str) -> String {
        let output = self
            .token_url
            .replace_all(input, "$1[TELEGRAM_TOKEN]$3")
            .to_string();
        let output = self
            .token_bare
            .replace_all(&output, "[TELEGRAM_TOKEN]")
            .to_string();
        self.token_prefixed
            .replace_all(&output, "$1[TELEGRAM_TOKEN]")
            .to_string()
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> RedactingWriter<W> {
    const fn new(inner: W, patterns: Arc<RedactionPatterns>) -> Self {
        Self { inner, patterns }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // Report the original length; the redacted text may differ in size
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<F> RedactingMakeWriter<F> {
    const fn new(make_inner: F, patterns: Arc<RedactionPatterns>) -> Self {
        Self {
            make_inner,
            patterns,
        }
    }
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new((self.make_inner)(), self.patterns.clone())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // Before logging, so the very first lines are already redacted
    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);
    init_logging(patterns);

    info!("Starting downloader bot...");

    let settings = init_settings();

    let bot = Bot::new(settings.telegram_token.clone());
    let pool = Arc::new(JobPool::new(
        settings.max_concurrent_downloads,
        settings.download_queue_size,
    ));
    let pipeline = Arc::new(Pipeline::new(
        Arc::new(TelegramTransport::new(bot.clone())),
        Arc::new(ToolDownloader::new(Arc::clone(&settings))),
        Arc::clone(&pool),
        std::env::temp_dir(),
    ));

    let handler = setup_handler();

    info!("Bot is running...");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![settings, pipeline])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Dispatcher stopped, waiting for running downloads...");
    pool.shutdown().await;

    Ok(())
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter::new(io::stderr, patterns);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

fn init_settings() -> Arc<Settings> {
    match Settings::new() {
        Ok(s) => {
            info!(
                workers = s.max_concurrent_downloads,
                queue = s.download_queue_size,
                timeout_secs = s.download_timeout_secs,
                restricted = !s.allowed_users().is_empty(),
                "Configuration loaded successfully."
            );
            Arc::new(s)
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(
            Update::filter_callback_query()
                .filter(|q: CallbackQuery, settings: Arc<Settings>| {
                    settings.is_allowed(q.from.id.0.cast_signed())
                })
                .endpoint(handle_format_callback),
        )
        .branch(Update::filter_message().branch(allowed_messages()))
        .branch(Update::filter_message().endpoint(handle_unauthorized))
}

/// Messages from allowed users; anything they send is handled here
fn allowed_messages() -> UpdateHandler<teloxide::RequestError> {
    dptree::filter(|msg: Message, settings: Arc<Settings>| {
        settings.is_allowed(get_user_id_safe(&msg))
    })
    .branch(
        dptree::entry()
            .filter_command::<Command>()
            .endpoint(handle_command),
    )
    .branch(dptree::filter(|msg: Message| msg.text().is_some()).endpoint(handle_text))
    .branch(dptree::endpoint(ignore_message))
}

async fn ignore_message(msg: Message) -> Result<(), teloxide::RequestError> {
    debug!(chat_id = msg.chat.id.0, message_id = msg.id.0, "Ignoring message without text");
    respond(())
}

async fn handle_unauthorized(msg: Message) -> Result<(), teloxide::RequestError> {
    debug!(
        user_id = get_user_id_safe(&msg),
        chat_id = msg.chat.id.0,
        "Ignoring message from user outside the allow list"
    );
    respond(())
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    pipeline: Arc<Pipeline>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::command(bot, msg, cmd, pipeline).await {
        error!("Command error: {}", e);
    }
    respond(())
}

async fn handle_text(msg: Message, pipeline: Arc<Pipeline>) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::text(msg, pipeline).await {
        error!("Text handler error: {}", e);
    }
    respond(())
}

async fn handle_format_callback(
    bot: Bot,
    q: CallbackQuery,
    pipeline: Arc<Pipeline>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::format_callback(bot, q, pipeline).await {
        error!("Callback handler error: {}", e);
    }
    respond(())
}
