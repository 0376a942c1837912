use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::TransportError;

/// A message living in some chat, addressed by chat id and message id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: i64,
    pub message_id: i32,
}

impl MessageRef {
    pub fn new(chat_id: i64, message_id: i32) -> Self {
        Self {
            chat_id,
            message_id,
        }
    }
}

/// A media message that arrived at the bot and is waiting to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingFile {
    pub source: MessageRef,
    /// Content-stable id supplied by the platform; opaque to us.
    pub unique_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: Option<String>,
}

/// One inline URL button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlButton {
    pub text: String,
    pub url: String,
}

/// Inline keyboard layout: rows of URL buttons.
pub type ButtonRows = Vec<Vec<UrlButton>>;

/// Lazily fetched media bytes plus the metadata needed to serve them.
pub struct MediaDownload {
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: Option<String>,
    pub chunks: BoxStream<'static, Result<Vec<u8>, TransportError>>,
}

/// Everything the bot needs from the messaging platform.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Copy `source` into `destination` without a forward header.
    async fn copy_message(
        &self,
        source: MessageRef,
        destination: i64,
        caption: Option<&str>,
        buttons: Option<&ButtonRows>,
    ) -> Result<MessageRef, TransportError>;

    async fn send_text(
        &self,
        chat_id: i64,
        html: &str,
        buttons: Option<&ButtonRows>,
    ) -> Result<MessageRef, TransportError>;

    async fn send_photo(
        &self,
        chat_id: i64,
        photo_url: &str,
        caption_html: &str,
        buttons: Option<&ButtonRows>,
    ) -> Result<MessageRef, TransportError>;

    /// Succeeds when the bot itself can still act in `chat_id`.
    async fn check_chat_access(&self, chat_id: i64) -> Result<(), TransportError>;

    /// Whether `user_id` is currently a member of `chat_id`.
    async fn is_member(&self, chat_id: i64, user_id: i64) -> Result<bool, TransportError>;

    /// A link that lets users join `chat_id`. The bot must be allowed to invite.
    async fn invite_link(&self, chat_id: i64) -> Result<String, TransportError>;

    /// Fetch a stored media message for streaming. `Ok(None)` when the message has no media.
    async fn stream_media(&self, message: MessageRef)
        -> Result<Option<MediaDownload>, TransportError>;
}
