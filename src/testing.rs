//! In-memory stand-ins for the database and the Telegram client.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use futures::stream;

use crate::batch::{BatchSink, ClosedBatch};
use crate::error::TransportError;
use crate::models::{
    ChannelList, FilePage, FileRecord, FooterButton, ShortenerMode, UserLink, UserSettings,
    Verification,
};
use crate::poster::PosterLookup;
use crate::shortener::Shortener;
use crate::store::Store;
use crate::transport::{ButtonRows, MediaDownload, MessageRef, Transport};

pub fn file_record(owner_id: i64, unique_id: &str, file_name: &str) -> FileRecord {
    FileRecord {
        id: None,
        owner_id,
        file_unique_id: unique_id.to_string(),
        file_id: 1,
        stream_id: 1,
        file_name: file_name.to_string(),
        file_size: 1024,
        raw_link: String::new(),
        updated_at: Utc::now(),
    }
}

#[derive(Default)]
pub struct RecordingSink {
    batches: Mutex<Vec<ClosedBatch>>,
}

impl RecordingSink {
    pub fn batches(&self) -> Vec<ClosedBatch> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl BatchSink for RecordingSink {
    async fn finalize(&self, batch: ClosedBatch) {
        self.batches.lock().unwrap().push(batch);
    }
}

/// Shortens `link` to `https://{domain}/s/{link}`.
pub struct PrefixShortener;

#[async_trait]
impl Shortener for PrefixShortener {
    async fn shorten(&self, domain: &str, _api_key: &str, link: &str) -> String {
        format!("https://{}/s/{}", domain, link)
    }
}

pub struct FixedPoster(pub String);

#[async_trait]
impl PosterLookup for FixedPoster {
    async fn find_poster(&self, _title: &str, _year: Option<&str>) -> Option<String> {
        Some(self.0.clone())
    }
}

#[derive(Default)]
pub struct MemoryState {
    pub files: Vec<FileRecord>,
    pub users: HashMap<i64, UserSettings>,
    pub storage_channel: Option<i64>,
    pub stream_channel: Option<i64>,
    pub verifications: Vec<Verification>,
    pub claimed: HashSet<String>,
}

#[derive(Default)]
pub struct MemoryStore {
    pub state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn with_channels(storage: Option<i64>, stream: Option<i64>) -> Self {
        let store = Self::default();
        {
            let mut state = store.state.lock().unwrap();
            state.storage_channel = storage;
            state.stream_channel = stream;
        }
        store
    }

    pub fn put_user(&self, settings: UserSettings) {
        self.state
            .lock()
            .unwrap()
            .users
            .insert(settings.user_id, settings);
    }

    pub fn files(&self) -> Vec<FileRecord> {
        self.state.lock().unwrap().files.clone()
    }

    pub fn user(&self, user_id: i64) -> Option<UserSettings> {
        self.state.lock().unwrap().users.get(&user_id).cloned()
    }

    fn update_user(&self, user_id: i64, f: impl FnOnce(&mut UserSettings)) {
        let mut state = self.state.lock().unwrap();
        let user = state
            .users
            .entry(user_id)
            .or_insert_with(|| UserSettings::new(user_id));
        f(user);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_file_record(&self, record: &FileRecord) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.files.retain(|f| {
            !(f.owner_id == record.owner_id && f.file_unique_id == record.file_unique_id)
        });
        state.files.push(record.clone());
        Ok(())
    }

    async fn get_file_record(
        &self,
        unique_id: &str,
        owner_id: Option<i64>,
    ) -> Result<Option<FileRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .files
            .iter()
            .find(|f| f.file_unique_id == unique_id && owner_id.map_or(true, |o| o == f.owner_id))
            .cloned())
    }

    async fn delete_all_files(&self) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let count = state.files.len() as u64;
        state.files.clear();
        Ok(count)
    }

    async fn list_user_files(
        &self,
        owner_id: i64,
        query: Option<&str>,
        page: u64,
        page_size: u64,
    ) -> Result<FilePage> {
        let state = self.state.lock().unwrap();
        let query = query.map(str::to_lowercase);
        let matching: Vec<&FileRecord> = state
            .files
            .iter()
            .rev()
            .filter(|f| f.owner_id == owner_id)
            .filter(|f| {
                query
                    .as_deref()
                    .map_or(true, |q| f.file_name.to_lowercase().contains(q))
            })
            .collect();
        Ok(FilePage {
            total: matching.len() as u64,
            files: matching
                .into_iter()
                .skip((page.saturating_sub(1) * page_size) as usize)
                .take(page_size as usize)
                .cloned()
                .collect(),
        })
    }

    async fn add_user(&self, user_id: i64) -> Result<()> {
        self.update_user(user_id, |_| {});
        Ok(())
    }

    async fn get_user_settings(&self, user_id: i64) -> Result<Option<UserSettings>> {
        Ok(self.user(user_id))
    }

    async fn add_channel_to_user_list(
        &self,
        user_id: i64,
        list: ChannelList,
        channel_id: i64,
    ) -> Result<()> {
        self.update_user(user_id, |user| {
            let channels = match list {
                ChannelList::Post => &mut user.post_channels,
                ChannelList::Db => &mut user.db_channels,
            };
            if !channels.contains(&channel_id) {
                channels.push(channel_id);
            }
        });
        Ok(())
    }

    async fn remove_channel_from_user_list(
        &self,
        user_id: i64,
        list: ChannelList,
        channel_id: i64,
    ) -> Result<()> {
        self.update_user(user_id, |user| match list {
            ChannelList::Post => user.post_channels.retain(|c| *c != channel_id),
            ChannelList::Db => user.db_channels.retain(|c| *c != channel_id),
        });
        Ok(())
    }

    async fn find_owner_by_db_channel(&self, channel_id: i64) -> Result<Option<i64>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .users
            .values()
            .find(|u| u.db_channels.contains(&channel_id))
            .map(|u| u.user_id))
    }

    async fn set_show_poster(&self, user_id: i64, enabled: bool) -> Result<()> {
        self.update_user(user_id, |user| user.show_poster = enabled);
        Ok(())
    }

    async fn set_shortener(
        &self,
        user_id: i64,
        shortener: Option<(String, String)>,
    ) -> Result<()> {
        self.update_user(user_id, |user| match shortener {
            Some((url, api)) => {
                user.shortener_url = Some(url);
                user.shortener_api = Some(api);
                user.shortener_enabled = true;
            }
            None => user.shortener_enabled = false,
        });
        Ok(())
    }

    async fn set_shortener_mode(&self, user_id: i64, mode: ShortenerMode) -> Result<()> {
        self.update_user(user_id, |user| user.shortener_mode = mode);
        Ok(())
    }

    async fn add_footer_button(&self, user_id: i64, button: FooterButton) -> Result<()> {
        self.update_user(user_id, |user| user.footer_buttons.push(button));
        Ok(())
    }

    async fn remove_footer_button(&self, user_id: i64, name: &str) -> Result<()> {
        self.update_user(user_id, |user| user.footer_buttons.retain(|b| b.name != name));
        Ok(())
    }

    async fn set_fsub_channel(&self, user_id: i64, channel_id: Option<i64>) -> Result<()> {
        self.update_user(user_id, |user| user.fsub_channel = channel_id);
        Ok(())
    }

    async fn set_user_link(
        &self,
        user_id: i64,
        link: UserLink,
        url: Option<String>,
    ) -> Result<()> {
        self.update_user(user_id, |user| match link {
            UserLink::FilenameUrl => user.filename_url = url,
            UserLink::HowToDownload => user.how_to_download_link = url,
        });
        Ok(())
    }

    async fn get_owner_storage_channel(&self) -> Result<Option<i64>> {
        Ok(self.state.lock().unwrap().storage_channel)
    }

    async fn set_owner_storage_channel(&self, channel_id: i64) -> Result<()> {
        self.state.lock().unwrap().storage_channel = Some(channel_id);
        Ok(())
    }

    async fn get_stream_channel(&self) -> Result<Option<i64>> {
        Ok(self.state.lock().unwrap().stream_channel)
    }

    async fn set_stream_channel(&self, channel_id: i64) -> Result<()> {
        self.state.lock().unwrap().stream_channel = Some(channel_id);
        Ok(())
    }

    async fn is_user_verified(&self, requester_id: i64, owner_id: i64) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(state
            .verifications
            .iter()
            .any(|v| v.requester_id == requester_id && v.owner_id == owner_id && v.is_valid()))
    }

    async fn claim_verification_for_file(
        &self,
        unique_id: &str,
        requester_id: i64,
        owner_id: i64,
    ) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        if !state.files.iter().any(|f| f.file_unique_id == unique_id)
            || !state.claimed.insert(unique_id.to_string())
        {
            return Ok(false);
        }
        state
            .verifications
            .retain(|v| !(v.requester_id == requester_id && v.owner_id == owner_id));
        state.verifications.push(Verification {
            requester_id,
            owner_id,
            verified_at: Utc::now(),
        });
        Ok(true)
    }
}

/// Something the fake transport was asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Copy {
        source: MessageRef,
        destination: i64,
        caption: Option<String>,
        buttons: Option<ButtonRows>,
    },
    Text {
        chat_id: i64,
        html: String,
        buttons: Option<ButtonRows>,
    },
    Photo {
        chat_id: i64,
        photo_url: String,
        caption: String,
    },
}

#[derive(Default)]
pub struct FakeTransport {
    pub sent: Mutex<Vec<Sent>>,
    /// Chats the bot has lost access to.
    pub inaccessible: Mutex<HashSet<i64>>,
    /// Chats that refuse copies.
    pub failing_copies: Mutex<HashSet<i64>>,
    /// `(chat_id, user_id)` pairs of users who joined a chat.
    pub members: Mutex<HashSet<(i64, i64)>>,
    /// Chats that refuse new messages even though access checks pass.
    pub failing_sends: Mutex<HashSet<i64>>,
    rejected: Mutex<Vec<i64>>,
    /// Flood waits (seconds) to answer before the next successful send.
    pub flood_waits: Mutex<Vec<u64>>,
    next_id: Mutex<i32>,
}

impl FakeTransport {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn block_chat(&self, chat_id: i64) {
        self.inaccessible.lock().unwrap().insert(chat_id);
    }

    pub fn fail_copies_to(&self, chat_id: i64) {
        self.failing_copies.lock().unwrap().insert(chat_id);
    }

    pub fn join(&self, chat_id: i64, user_id: i64) {
        self.members.lock().unwrap().insert((chat_id, user_id));
    }

    pub fn fail_sends_to(&self, chat_id: i64) {
        self.failing_sends.lock().unwrap().insert(chat_id);
    }

    /// How many sends to `chat_id` were refused.
    pub fn rejected_sends(&self, chat_id: i64) -> usize {
        self.rejected
            .lock()
            .unwrap()
            .iter()
            .filter(|c| **c == chat_id)
            .count()
    }

    fn refuse_send(&self, chat_id: i64) -> Result<(), TransportError> {
        if self.failing_sends.lock().unwrap().contains(&chat_id) {
            self.rejected.lock().unwrap().push(chat_id);
            return Err(TransportError::ChannelInvalid(chat_id));
        }
        Ok(())
    }

    fn next_ref(&self, chat_id: i64) -> MessageRef {
        let mut id = self.next_id.lock().unwrap();
        *id += 1;
        MessageRef::new(chat_id, 100 + *id)
    }

    fn take_flood_wait(&self) -> Result<(), TransportError> {
        let mut waits = self.flood_waits.lock().unwrap();
        if waits.is_empty() {
            Ok(())
        } else {
            Err(TransportError::FloodWait {
                seconds: waits.remove(0),
            })
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn copy_message(
        &self,
        source: MessageRef,
        destination: i64,
        caption: Option<&str>,
        buttons: Option<&ButtonRows>,
    ) -> Result<MessageRef, TransportError> {
        self.take_flood_wait()?;
        if self.failing_copies.lock().unwrap().contains(&destination) {
            return Err(TransportError::ChannelInvalid(destination));
        }
        self.sent.lock().unwrap().push(Sent::Copy {
            source,
            destination,
            caption: caption.map(str::to_string),
            buttons: buttons.cloned(),
        });
        Ok(self.next_ref(destination))
    }

    async fn send_text(
        &self,
        chat_id: i64,
        html: &str,
        buttons: Option<&ButtonRows>,
    ) -> Result<MessageRef, TransportError> {
        self.take_flood_wait()?;
        self.refuse_send(chat_id)?;
        self.sent.lock().unwrap().push(Sent::Text {
            chat_id,
            html: html.to_string(),
            buttons: buttons.cloned(),
        });
        Ok(self.next_ref(chat_id))
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        photo_url: &str,
        caption_html: &str,
        _buttons: Option<&ButtonRows>,
    ) -> Result<MessageRef, TransportError> {
        self.take_flood_wait()?;
        self.refuse_send(chat_id)?;
        self.sent.lock().unwrap().push(Sent::Photo {
            chat_id,
            photo_url: photo_url.to_string(),
            caption: caption_html.to_string(),
        });
        Ok(self.next_ref(chat_id))
    }

    async fn check_chat_access(&self, chat_id: i64) -> Result<(), TransportError> {
        if self.inaccessible.lock().unwrap().contains(&chat_id) {
            Err(TransportError::NotParticipant(chat_id))
        } else {
            Ok(())
        }
    }

    async fn is_member(&self, chat_id: i64, user_id: i64) -> Result<bool, TransportError> {
        self.check_chat_access(chat_id).await?;
        Ok(self.members.lock().unwrap().contains(&(chat_id, user_id)))
    }

    async fn invite_link(&self, chat_id: i64) -> Result<String, TransportError> {
        self.check_chat_access(chat_id).await?;
        Ok(format!("https://t.me/+join{}", chat_id.unsigned_abs()))
    }

    async fn stream_media(
        &self,
        message: MessageRef,
    ) -> Result<Option<MediaDownload>, TransportError> {
        if message.message_id <= 0 {
            return Err(TransportError::MessageNotFound {
                chat_id: message.chat_id,
                message_id: message.message_id,
            });
        }
        let chunks: Vec<Result<Vec<u8>, TransportError>> =
            vec![Ok(b"hello ".to_vec()), Ok(b"world".to_vec())];
        Ok(Some(MediaDownload {
            file_name: "Movie Name 2020.mkv".to_string(),
            file_size: 11,
            mime_type: None,
            chunks: Box::pin(stream::iter(chunks)),
        }))
    }
}
