use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    ChannelList, FilePage, FileRecord, FooterButton, ShortenerMode, UserLink, UserSettings,
};

/// Persistence used by the bot. Implemented on MongoDB in production.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or overwrite the record for `(owner_id, file_unique_id)`.
    async fn upsert_file_record(&self, record: &FileRecord) -> Result<()>;

    /// Look a file up by unique id, restricted to one owner when given.
    async fn get_file_record(
        &self,
        unique_id: &str,
        owner_id: Option<i64>,
    ) -> Result<Option<FileRecord>>;

    async fn delete_all_files(&self) -> Result<u64>;

    /// Page `page` (from 1) of the owner's files, newest first. `query` keeps only
    /// names containing it, ignoring case.
    async fn list_user_files(
        &self,
        owner_id: i64,
        query: Option<&str>,
        page: u64,
        page_size: u64,
    ) -> Result<FilePage>;

    /// Create the default settings document unless one exists.
    async fn add_user(&self, user_id: i64) -> Result<()>;

    async fn get_user_settings(&self, user_id: i64) -> Result<Option<UserSettings>>;

    async fn add_channel_to_user_list(
        &self,
        user_id: i64,
        list: ChannelList,
        channel_id: i64,
    ) -> Result<()>;

    async fn remove_channel_from_user_list(
        &self,
        user_id: i64,
        list: ChannelList,
        channel_id: i64,
    ) -> Result<()>;

    async fn find_owner_by_db_channel(&self, channel_id: i64) -> Result<Option<i64>>;

    async fn set_show_poster(&self, user_id: i64, enabled: bool) -> Result<()>;

    /// `None` switches the shortener off; `Some((domain, key))` configures and enables it.
    async fn set_shortener(&self, user_id: i64, shortener: Option<(String, String)>)
        -> Result<()>;

    async fn set_shortener_mode(&self, user_id: i64, mode: ShortenerMode) -> Result<()>;

    async fn add_footer_button(&self, user_id: i64, button: FooterButton) -> Result<()>;

    async fn remove_footer_button(&self, user_id: i64, name: &str) -> Result<()>;

    async fn set_fsub_channel(&self, user_id: i64, channel_id: Option<i64>) -> Result<()>;

    /// `None` clears the link.
    async fn set_user_link(&self, user_id: i64, link: UserLink, url: Option<String>)
        -> Result<()>;

    async fn get_owner_storage_channel(&self) -> Result<Option<i64>>;

    async fn set_owner_storage_channel(&self, channel_id: i64) -> Result<()>;

    async fn get_stream_channel(&self) -> Result<Option<i64>>;

    async fn set_stream_channel(&self, channel_id: i64) -> Result<()>;

    /// Whether `requester_id` holds a live 12-hour verification for `owner_id`.
    async fn is_user_verified(&self, requester_id: i64, owner_id: i64) -> Result<bool>;

    /// Mark a file's one-time verification as used and, if it was unclaimed,
    /// verify the requester. Returns whether the claim succeeded.
    async fn claim_verification_for_file(
        &self,
        unique_id: &str,
        requester_id: i64,
        owner_id: i64,
    ) -> Result<bool>;
}
