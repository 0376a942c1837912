//! [`Transport`] on top of an MTProto bot session.
//!
//! Chat ids are kept in the marked form users see (`-100…` for channels) and
//! converted to packed peers here.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream;
use grammers_client::{
    button, grammers_tl_types as tl, reply_markup,
    types::{Chat, Downloadable, Media, Message, User},
    Client, InputMessage,
};
use grammers_mtsender::InvocationError;
use grammers_session::{PackedChat, PackedType};
use log::debug;

use crate::error::TransportError;
use crate::transport::{ButtonRows, IncomingFile, MediaDownload, MessageRef, Transport};

const CHANNEL_ID_OFFSET: i64 = 1_000_000_000_000;

/// Marked id of a chat, as the Bot API would show it.
pub fn marked_id(chat: &Chat) -> i64 {
    match chat {
        Chat::User(user) => user.id(),
        Chat::Group(group) if !group.is_megagroup() => -group.id(),
        _ => -(CHANNEL_ID_OFFSET + chat.id()),
    }
}

fn unmark(chat_id: i64) -> (PackedType, i64) {
    if chat_id > 0 {
        (PackedType::User, chat_id)
    } else if chat_id <= -CHANNEL_ID_OFFSET {
        (PackedType::Broadcast, -chat_id - CHANNEL_ID_OFFSET)
    } else {
        (PackedType::Chat, -chat_id)
    }
}

/// Document carried by `msg`, if any, as a file waiting to be stored.
pub fn incoming_file(msg: &Message) -> Option<IncomingFile> {
    let Some(Media::Document(doc)) = msg.media() else {
        return None;
    };
    let file_name = match doc.name() {
        "" => format!("file_{}", doc.id()),
        name => name.to_string(),
    };
    Some(IncomingFile {
        source: MessageRef::new(marked_id(&msg.chat()), msg.id()),
        unique_id: doc.id().to_string(),
        file_name,
        file_size: doc.size().max(0) as u64,
        mime_type: doc.mime_type().map(str::to_string),
    })
}

fn map_error(err: InvocationError, chat_id: i64) -> TransportError {
    match err {
        InvocationError::Rpc(rpc) => match rpc.name.as_str() {
            "FLOOD_WAIT" | "SLOWMODE_WAIT" => TransportError::FloodWait {
                seconds: rpc.value.unwrap_or(1) as u64,
            },
            "USER_NOT_PARTICIPANT" => TransportError::NotParticipant(chat_id),
            "CHANNEL_INVALID" | "CHANNEL_PRIVATE" | "CHAT_ADMIN_REQUIRED" | "PEER_ID_INVALID"
            | "CHAT_WRITE_FORBIDDEN" => TransportError::ChannelInvalid(chat_id),
            "MESSAGE_ID_INVALID" => TransportError::MessageNotFound {
                chat_id,
                message_id: 0,
            },
            _ => TransportError::Rpc(rpc.to_string()),
        },
        other => TransportError::Other(other.to_string()),
    }
}

fn markup(buttons: &ButtonRows) -> reply_markup::Inline {
    reply_markup::inline(
        buttons
            .iter()
            .map(|row| {
                row.iter()
                    .map(|b| button::url(b.text.clone(), b.url.clone()))
                    .collect()
            })
            .collect::<Vec<_>>(),
    )
}

fn with_buttons(message: InputMessage, buttons: Option<&ButtonRows>) -> InputMessage {
    match buttons {
        Some(rows) if !rows.is_empty() => message.reply_markup(&markup(rows)),
        _ => message,
    }
}

pub struct TelegramTransport {
    client: Client,
    me: User,
    /// Peers seen in updates, so their access hashes can be reused.
    chats: DashMap<i64, PackedChat>,
}

impl TelegramTransport {
    pub fn new(client: Client, me: User) -> Self {
        Self {
            client,
            me,
            chats: DashMap::new(),
        }
    }

    pub fn me(&self) -> &User {
        &self.me
    }

    pub fn remember(&self, chat: &Chat) {
        self.chats.insert(marked_id(chat), chat.pack());
    }

    fn packed(&self, chat_id: i64) -> PackedChat {
        if let Some(chat) = self.chats.get(&chat_id) {
            return *chat;
        }
        let (ty, id) = unmark(chat_id);
        PackedChat {
            ty,
            id,
            access_hash: None,
        }
    }

    async fn fetch(&self, message: MessageRef) -> Result<Message, TransportError> {
        let not_found = || TransportError::MessageNotFound {
            chat_id: message.chat_id,
            message_id: message.message_id,
        };
        let messages = self
            .client
            .get_messages_by_id(self.packed(message.chat_id), &[message.message_id])
            .await
            .map_err(|err| map_error(err, message.chat_id))?;
        messages.into_iter().flatten().next().ok_or_else(not_found)
    }

    async fn send(
        &self,
        chat_id: i64,
        message: InputMessage,
    ) -> Result<MessageRef, TransportError> {
        let sent = self
            .client
            .send_message(self.packed(chat_id), message)
            .await
            .map_err(|err| map_error(err, chat_id))?;
        Ok(MessageRef::new(chat_id, sent.id()))
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn copy_message(
        &self,
        source: MessageRef,
        destination: i64,
        caption: Option<&str>,
        buttons: Option<&ButtonRows>,
    ) -> Result<MessageRef, TransportError> {
        let original = self.fetch(source).await?;
        let message = match caption {
            Some(caption) => InputMessage::html(caption),
            None => InputMessage::text(original.text()),
        };
        let message = match original.media() {
            Some(media) => message.copy_media(&media),
            None => message,
        };
        debug!(
            "Copying {}/{} to {}",
            source.chat_id, source.message_id, destination
        );
        self.send(destination, with_buttons(message, buttons)).await
    }

    async fn send_text(
        &self,
        chat_id: i64,
        html: &str,
        buttons: Option<&ButtonRows>,
    ) -> Result<MessageRef, TransportError> {
        let message = InputMessage::html(html).link_preview(false);
        self.send(chat_id, with_buttons(message, buttons)).await
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        photo_url: &str,
        caption_html: &str,
        buttons: Option<&ButtonRows>,
    ) -> Result<MessageRef, TransportError> {
        let message = InputMessage::html(caption_html).photo_url(photo_url);
        self.send(chat_id, with_buttons(message, buttons)).await
    }

    async fn check_chat_access(&self, chat_id: i64) -> Result<(), TransportError> {
        self.client
            .get_permissions(self.packed(chat_id), &self.me)
            .await
            .map_err(|err| map_error(err, chat_id))?;
        Ok(())
    }

    async fn is_member(&self, chat_id: i64, user_id: i64) -> Result<bool, TransportError> {
        match self
            .client
            .get_permissions(self.packed(chat_id), self.packed(user_id))
            .await
        {
            Ok(permissions) => Ok(!permissions.has_left() && !permissions.is_banned()),
            Err(InvocationError::Rpc(rpc)) if rpc.name == "USER_NOT_PARTICIPANT" => Ok(false),
            Err(err) => Err(map_error(err, chat_id)),
        }
    }

    async fn invite_link(&self, chat_id: i64) -> Result<String, TransportError> {
        let invite = self
            .client
            .invoke(&tl::functions::messages::ExportChatInvite {
                legacy_revoke_permanent: false,
                request_needed: false,
                peer: self.packed(chat_id).to_input_peer(),
                expire_date: None,
                usage_limit: None,
                title: None,
                subscription_pricing: None,
            })
            .await
            .map_err(|err| map_error(err, chat_id))?;
        match invite {
            tl::enums::ExportedChatInvite::ChatInviteExported(invite) => Ok(invite.link),
            _ => Err(TransportError::Other(format!(
                "chat {} returned no invite link",
                chat_id
            ))),
        }
    }

    async fn stream_media(
        &self,
        message: MessageRef,
    ) -> Result<Option<MediaDownload>, TransportError> {
        let original = self.fetch(message).await?;
        let Some(media) = original.media() else {
            return Ok(None);
        };
        let (file_name, file_size, mime_type) = match &media {
            Media::Document(doc) => (
                doc.name().to_string(),
                doc.size().max(0) as u64,
                doc.mime_type().map(str::to_string),
            ),
            _ => (format!("file_{}", message.message_id), 0, None),
        };

        let chat_id = message.chat_id;
        let download = self.client.iter_download(&Downloadable::Media(media));
        let chunks = stream::unfold(Some(download), move |state| async move {
            let mut download = state?;
            match download.next().await {
                Ok(Some(chunk)) => Some((Ok(chunk), Some(download))),
                Ok(None) => None,
                Err(err) => Some((Err(map_error(err, chat_id)), None)),
            }
        });

        Ok(Some(MediaDownload {
            file_name,
            file_size,
            mime_type,
            chunks: Box::pin(chunks),
        }))
    }
}
