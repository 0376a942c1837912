use thiserror::Error;

/// Failures reported by the messaging transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The platform asked us to slow down for `seconds` before retrying.
    #[error("flood wait of {seconds}s requested")]
    FloodWait { seconds: u64 },

    #[error("bot is not a participant of chat {0}")]
    NotParticipant(i64),

    #[error("chat {0} is invalid, private or not accessible")]
    ChannelInvalid(i64),

    #[error("message {message_id} not found in chat {chat_id}")]
    MessageNotFound { chat_id: i64, message_id: i32 },

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Whether the chat involved can never be used again without user action.
    pub fn is_permanent_channel_error(&self) -> bool {
        matches!(
            self,
            TransportError::NotParticipant(_) | TransportError::ChannelInvalid(_)
        )
    }
}
