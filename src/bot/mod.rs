/// Telegram update handlers and bot commands
pub mod handlers;
/// Link recognition and callback payloads
pub mod links;
/// Request flows from link to relayed media
pub mod pipeline;
/// Bounded worker pool for download jobs
pub mod pool;
/// Chat transport abstraction, attribution and media batching
pub mod relay;
/// Bot API calls with retry
pub mod resilient;
/// Bot API implementation of the chat transport
pub mod telegram;
/// User-facing texts and keyboards
pub mod views;

pub use pipeline::{IncomingText, Pipeline};
pub use pool::{JobPool, PoolError};
pub use relay::ChatTransport;
pub use telegram::TelegramTransport;
