//! Request flows from an incoming link to relayed media.
//!
//! [`Pipeline`] holds everything a flow needs (chat transport, media source,
//! job pool) and is cheap to clone into jobs. Anything that runs an external
//! tool goes through the pool; the tweet rewrite is answered inline.

use crate::bot::links::{
    compact_youtube_url, find_link, fxtwitter_url, parse_web_url, CallbackPayload, LinkKind,
};
use crate::bot::pool::{JobPool, PoolError};
use crate::bot::relay::{delete_all, relay_post, Attribution, ChatTransport, Person};
use crate::bot::views;
use crate::config::PROGRESS_EDIT_INTERVAL;
use crate::downloader::progress::ProgressThrottle;
use crate::downloader::{DownloadError, DownloadedFile, MediaSource, TempWorkspace};
use anyhow::Result;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::types::{ChatId, MessageId};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use url::Url;

/// Percentages buffered between the tool reader and the status editor
const PROGRESS_CHANNEL_CAPACITY: usize = 16;

/// A text message as seen by the pipeline
#[derive(Debug, Clone)]
pub struct IncomingText {
    /// Chat the message was posted in
    pub chat_id: ChatId,
    /// The message itself
    pub message_id: MessageId,
    /// Message text
    pub text: String,
    /// Author
    pub sender: Person,
    /// Author of the replied-to message, if any
    pub reply_to: Option<Person>,
}

/// Shared state of all request flows
#[derive(Clone)]
pub struct Pipeline {
    transport: Arc<dyn ChatTransport>,
    source: Arc<dyn MediaSource>,
    pool: Arc<JobPool>,
    workspace_root: PathBuf,
}

impl Pipeline {
    /// Create a pipeline whose request workspaces live under `workspace_root`
    #[must_use]
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        source: Arc<dyn MediaSource>,
        pool: Arc<JobPool>,
        workspace_root: PathBuf,
    ) -> Self {
        Self {
            transport,
            source,
            pool,
            workspace_root,
        }
    }

    /// Route a text message by the first supported link it contains.
    ///
    /// Messages without one are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if an immediate Bot API call fails; job failures are
    /// logged by the job itself.
    pub async fn handle_text(&self, incoming: IncomingText) -> Result<()> {
        let Some(link) = find_link(&incoming.text) else {
            debug!(chat_id = incoming.chat_id.0, "No supported link in message");
            return Ok(());
        };
        info!(
            chat_id = incoming.chat_id.0,
            kind = ?link.kind,
            url = %link.url,
            "Link received"
        );

        match link.kind {
            LinkKind::YouTube => self.offer_formats(&incoming, &link.url).await,
            LinkKind::Instagram => self.start_gallery(incoming, link.url).await,
            LinkKind::Twitter => self.relay_tweet(&incoming, &link.url).await,
        }
    }

    /// Start the download chosen from a format menu.
    ///
    /// Payloads that fail validation are logged and dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue-full notice cannot be sent.
    pub async fn handle_format_choice(&self, chat_id: ChatId, data: &str) -> Result<()> {
        let payload = match CallbackPayload::parse(data) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(chat_id = chat_id.0, data = %data, error = %e, "Rejected callback payload");
                return Ok(());
            }
        };
        info!(
            chat_id = chat_id.0,
            format_id = %payload.format_id,
            url = %payload.url,
            "Format chosen"
        );

        let this = self.clone();
        let submitted = self.spawn_job("format download", async move {
            this.format_download_job(chat_id, payload).await
        });
        self.report_rejection(chat_id, None, submitted).await
    }

    /// `/get <url>`: best-quality download of anything yt-dlp supports.
    ///
    /// # Errors
    ///
    /// Returns an error if the usage or queue-full reply cannot be sent.
    pub async fn handle_get(&self, chat_id: ChatId, message_id: MessageId, arg: &str) -> Result<()> {
        let Some(url) = parse_web_url(arg.trim()) else {
            self.transport
                .send_text(chat_id, views::GET_USAGE, Some(message_id))
                .await?;
            return Ok(());
        };
        info!(chat_id = chat_id.0, url = %url, "Best-quality download requested");

        let this = self.clone();
        let submitted = self.spawn_job("best download", async move {
            this.best_download_job(chat_id, message_id, url.to_string())
                .await
        });
        self.report_rejection(chat_id, Some(message_id), submitted)
            .await
    }

    fn spawn_job<F>(&self, name: &'static str, job: F) -> Result<(), PoolError>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.pool.submit(async move {
            if let Err(e) = job.await {
                error!(job = name, error = %e, "Job failed");
            }
        })
    }

    async fn report_rejection(
        &self,
        chat_id: ChatId,
        reply_to: Option<MessageId>,
        submitted: Result<(), PoolError>,
    ) -> Result<()> {
        if let Err(e) = submitted {
            warn!(chat_id = chat_id.0, error = %e, "Job rejected");
            self.transport
                .send_text(chat_id, views::QUEUE_FULL, reply_to)
                .await?;
        }
        Ok(())
    }

    async fn offer_formats(&self, incoming: &IncomingText, url: &Url) -> Result<()> {
        let chat_id = incoming.chat_id;
        let url = compact_youtube_url(url);
        let this = self.clone();
        let submitted = self.spawn_job("format listing", async move {
            this.format_menu_job(chat_id, &url).await
        });
        self.report_rejection(chat_id, Some(incoming.message_id), submitted)
            .await
    }

    async fn format_menu_job(&self, chat_id: ChatId, url: &str) -> Result<()> {
        let buttons = match self.source.list_formats(url).await {
            Ok(formats) => views::format_buttons(&formats, url),
            Err(e) => {
                warn!(url = %url, error = %e, "Format listing failed");
                Vec::new()
            }
        };

        if buttons.is_empty() {
            self.transport
                .send_text(chat_id, views::FORMATS_FAILED, None)
                .await?;
            return Ok(());
        }

        self.transport
            .send_format_menu(chat_id, views::CHOOSE_FORMAT, &buttons)
            .await?;
        Ok(())
    }

    async fn format_download_job(&self, chat_id: ChatId, payload: CallbackPayload) -> Result<()> {
        let status = self
            .transport
            .send_text(chat_id, views::DOWNLOADING, None)
            .await?;
        let workspace = self.workspace(chat_id, status, "youtube").await?;

        let (tx, rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let reporter = tokio::spawn(report_progress(
            Arc::clone(&self.transport),
            chat_id,
            status,
            rx,
        ));

        // The sender is dropped when the download returns, which ends the reporter
        let fetched = self
            .source
            .fetch_format(&payload.format_id, &payload.url, workspace.path(), tx)
            .await;
        if let Err(e) = reporter.await {
            warn!(error = %e, "Progress reporter ended abnormally");
        }

        self.finish_video(chat_id, status, fetched, workspace).await
    }

    async fn best_download_job(
        &self,
        chat_id: ChatId,
        reply_to: MessageId,
        url: String,
    ) -> Result<()> {
        let status = self
            .transport
            .send_text(chat_id, views::DOWNLOADING, Some(reply_to))
            .await?;
        let workspace = self.workspace(chat_id, status, "best").await?;
        let fetched = self.source.fetch_best(&url, workspace.path()).await;
        self.finish_video(chat_id, status, fetched, workspace).await
    }

    async fn workspace(
        &self,
        chat_id: ChatId,
        status: MessageId,
        prefix: &str,
    ) -> Result<TempWorkspace> {
        match TempWorkspace::create_in(&self.workspace_root, prefix).await {
            Ok(workspace) => Ok(workspace),
            Err(e) => {
                self.mark_failed(chat_id, status).await;
                Err(e.into())
            }
        }
    }

    async fn finish_video(
        &self,
        chat_id: ChatId,
        status: MessageId,
        fetched: Result<DownloadedFile, DownloadError>,
        workspace: TempWorkspace,
    ) -> Result<()> {
        let outcome = match fetched {
            Ok(file) => {
                info!(chat_id = chat_id.0, path = %file.path.display(), size = file.size, "Uploading video");
                if let Err(e) = self
                    .transport
                    .edit_text(chat_id, status, &views::uploading_text(file.size))
                    .await
                {
                    debug!(chat_id = chat_id.0, error = %e, "Upload status edit failed");
                }
                self.transport.send_video(chat_id, &file.path).await
            }
            Err(e) => Err(e.into()),
        };

        match &outcome {
            Ok(()) => delete_all(self.transport.as_ref(), chat_id, &[status]).await,
            Err(_) => self.mark_failed(chat_id, status).await,
        }
        release(workspace).await;
        outcome
    }

    async fn start_gallery(&self, incoming: IncomingText, url: Url) -> Result<()> {
        let chat_id = incoming.chat_id;
        let placeholder = self
            .transport
            .send_text(chat_id, views::INSTAGRAM_PLACEHOLDER, Some(incoming.message_id))
            .await?;

        let request = GalleryRequest {
            chat_id,
            original: incoming.message_id,
            placeholder,
            url: url.to_string(),
            attribution: Attribution {
                platform: LinkKind::Instagram.platform(),
                source_url: url.to_string(),
                sender: incoming.sender,
                reply_to: incoming.reply_to,
            },
        };

        let this = self.clone();
        if let Err(e) = self.spawn_job("gallery", async move { this.gallery_job(request).await }) {
            warn!(chat_id = chat_id.0, error = %e, "Job rejected");
            self.transport
                .edit_text(chat_id, placeholder, views::QUEUE_FULL)
                .await?;
        }
        Ok(())
    }

    async fn gallery_job(&self, request: GalleryRequest) -> Result<()> {
        let chat_id = request.chat_id;
        let workspace = self
            .workspace(chat_id, request.placeholder, "instagram")
            .await?;

        let outcome = match self.source.fetch_post(&request.url, workspace.path()).await {
            Ok(post) => {
                relay_post(
                    self.transport.as_ref(),
                    chat_id,
                    &post,
                    &request.attribution,
                    &[request.placeholder, request.original],
                )
                .await
            }
            Err(e) => Err(e.into()),
        };

        if outcome.is_err() {
            self.mark_failed(chat_id, request.placeholder).await;
        }
        release(workspace).await;
        outcome
    }

    async fn relay_tweet(&self, incoming: &IncomingText, url: &Url) -> Result<()> {
        let rewritten = fxtwitter_url(url)?;
        let attribution = Attribution {
            platform: LinkKind::Twitter.platform(),
            source_url: rewritten.to_string(),
            sender: incoming.sender.clone(),
            reply_to: incoming.reply_to.clone(),
        };

        self.transport
            .send_html(incoming.chat_id, &attribution.to_html(""))
            .await?;
        info!(chat_id = incoming.chat_id.0, url = %rewritten, "Tweet relayed");

        delete_all(self.transport.as_ref(), incoming.chat_id, &[incoming.message_id]).await;
        Ok(())
    }

    async fn mark_failed(&self, chat_id: ChatId, status: MessageId) {
        if let Err(e) = self
            .transport
            .edit_text(chat_id, status, views::DOWNLOAD_FAILED)
            .await
        {
            warn!(chat_id = chat_id.0, error = %e, "Failed to report download failure");
        }
    }
}

struct GalleryRequest {
    chat_id: ChatId,
    original: MessageId,
    placeholder: MessageId,
    url: String,
    attribution: Attribution,
}

async fn release(workspace: TempWorkspace) {
    let path = workspace.path().to_path_buf();
    if let Err(e) = workspace.cleanup().await {
        warn!(path = %path.display(), error = %e, "Failed to remove workspace");
    }
}

/// Mirror download percentages into the status message, throttled
async fn report_progress(
    transport: Arc<dyn ChatTransport>,
    chat_id: ChatId,
    status: MessageId,
    mut rx: mpsc::Receiver<u8>,
) {
    let mut throttle = ProgressThrottle::new(PROGRESS_EDIT_INTERVAL);
    while let Some(percent) = rx.recv().await {
        if !throttle.should_emit(percent) {
            continue;
        }
        if let Err(e) = transport
            .edit_text(chat_id, status, &views::progress_text(percent))
            .await
        {
            debug!(chat_id = chat_id.0, error = %e, "Progress edit failed");
        }
    }
}
