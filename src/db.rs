use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use mongodb::bson::{self, doc, Document};
use futures::TryStreamExt;
use mongodb::options::{FindOptions, IndexOptions, UpdateOptions};
use mongodb::{Client as MongoClient, Collection, IndexModel};

use crate::models::{
    ChannelList, FilePage, FileRecord, FooterButton, ShortenerMode, UserLink, UserSettings,
    Verification,
};
use crate::store::Store;

const OWNER_DB_CONFIG: &str = "owner_db_config";
const STREAM_CONFIG: &str = "stream_config";

/// MongoDB-backed [`Store`].
pub struct MongoStore {
    users: Collection<UserSettings>,
    files: Collection<FileRecord>,
    bot_settings: Collection<Document>,
    verified_users: Collection<Verification>,
}

impl MongoStore {
    /// Connect and make sure the indexes the bot relies on exist.
    pub async fn connect(mongo_uri: &str, database: &str) -> Result<Self> {
        let client = MongoClient::with_uri_str(mongo_uri)
            .await
            .context("connecting to MongoDB")?;
        let db = client.database(database);

        let store = Self {
            users: db.collection("users"),
            files: db.collection("files"),
            bot_settings: db.collection("bot_settings"),
            verified_users: db.collection("verified_users"),
        };

        let unique = || IndexOptions::builder().unique(true).build();
        store
            .files
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "owner_id": 1, "file_unique_id": 1 })
                    .options(unique())
                    .build(),
                None,
            )
            .await
            .context("creating files index")?;
        store
            .users
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "user_id": 1 })
                    .options(unique())
                    .build(),
                None,
            )
            .await
            .context("creating users index")?;

        Ok(store)
    }

    fn upsert() -> UpdateOptions {
        UpdateOptions::builder().upsert(true).build()
    }

    async fn set_user_fields(&self, user_id: i64, fields: Document) -> Result<()> {
        self.users
            .update_one(doc! { "user_id": user_id }, doc! { "$set": fields }, Self::upsert())
            .await?;
        Ok(())
    }

    async fn get_setting_channel(&self, key: &str) -> Result<Option<i64>> {
        let config = self.bot_settings.find_one(doc! { "_id": key }, None).await?;
        Ok(config.and_then(|c| c.get_i64("channel_id").ok()))
    }

    async fn set_setting_channel(&self, key: &str, channel_id: i64) -> Result<()> {
        self.bot_settings
            .update_one(
                doc! { "_id": key },
                doc! { "$set": { "channel_id": channel_id } },
                Self::upsert(),
            )
            .await?;
        Ok(())
    }
}

fn list_entry(list: ChannelList, channel_id: i64) -> Document {
    let mut entry = Document::new();
    entry.insert(list.field(), channel_id);
    entry
}

#[async_trait]
impl Store for MongoStore {
    async fn upsert_file_record(&self, record: &FileRecord) -> Result<()> {
        let fields = bson::to_document(record)?;
        self.files
            .update_one(
                doc! { "owner_id": record.owner_id, "file_unique_id": record.file_unique_id.as_str() },
                doc! { "$set": fields },
                Self::upsert(),
            )
            .await
            .context("upserting file record")?;
        Ok(())
    }

    async fn get_file_record(
        &self,
        unique_id: &str,
        owner_id: Option<i64>,
    ) -> Result<Option<FileRecord>> {
        let mut filter = doc! { "file_unique_id": unique_id };
        if let Some(owner_id) = owner_id {
            filter.insert("owner_id", owner_id);
        }
        Ok(self.files.find_one(filter, None).await?)
    }

    async fn delete_all_files(&self) -> Result<u64> {
        let result = self.files.delete_many(doc! {}, None).await?;
        Ok(result.deleted_count)
    }

    async fn list_user_files(
        &self,
        owner_id: i64,
        query: Option<&str>,
        page: u64,
        page_size: u64,
    ) -> Result<FilePage> {
        let mut filter = doc! { "owner_id": owner_id };
        if let Some(query) = query {
            filter.insert(
                "file_name",
                doc! { "$regex": regex::escape(query), "$options": "i" },
            );
        }
        let total = self
            .files
            .count_documents(filter.clone(), None)
            .await
            .context("counting files")?;
        let options = FindOptions::builder()
            .sort(doc! { "_id": -1 })
            .skip(page.saturating_sub(1) * page_size)
            .limit(page_size as i64)
            .build();
        let files = self
            .files
            .find(filter, options)
            .await
            .context("listing files")?
            .try_collect()
            .await?;
        Ok(FilePage { files, total })
    }

    async fn add_user(&self, user_id: i64) -> Result<()> {
        let defaults = bson::to_document(&UserSettings::new(user_id))?;
        self.users
            .update_one(
                doc! { "user_id": user_id },
                doc! { "$setOnInsert": defaults },
                Self::upsert(),
            )
            .await?;
        Ok(())
    }

    async fn get_user_settings(&self, user_id: i64) -> Result<Option<UserSettings>> {
        Ok(self.users.find_one(doc! { "user_id": user_id }, None).await?)
    }

    async fn add_channel_to_user_list(
        &self,
        user_id: i64,
        list: ChannelList,
        channel_id: i64,
    ) -> Result<()> {
        self.users
            .update_one(
                doc! { "user_id": user_id },
                doc! { "$addToSet": list_entry(list, channel_id) },
                Self::upsert(),
            )
            .await?;
        Ok(())
    }

    async fn remove_channel_from_user_list(
        &self,
        user_id: i64,
        list: ChannelList,
        channel_id: i64,
    ) -> Result<()> {
        self.users
            .update_one(
                doc! { "user_id": user_id },
                doc! { "$pull": list_entry(list, channel_id) },
                None,
            )
            .await?;
        Ok(())
    }

    async fn find_owner_by_db_channel(&self, channel_id: i64) -> Result<Option<i64>> {
        let user = self
            .users
            .find_one(doc! { "db_channels": channel_id }, None)
            .await?;
        Ok(user.map(|u| u.user_id))
    }

    async fn set_show_poster(&self, user_id: i64, enabled: bool) -> Result<()> {
        self.set_user_fields(user_id, doc! { "show_poster": enabled }).await
    }

    async fn set_shortener(
        &self,
        user_id: i64,
        shortener: Option<(String, String)>,
    ) -> Result<()> {
        let fields = match shortener {
            Some((url, api)) => doc! {
                "shortener_url": url,
                "shortener_api": api,
                "shortener_enabled": true,
            },
            None => doc! { "shortener_enabled": false },
        };
        self.set_user_fields(user_id, fields).await
    }

    async fn set_shortener_mode(&self, user_id: i64, mode: ShortenerMode) -> Result<()> {
        self.set_user_fields(user_id, doc! { "shortener_mode": mode.as_str() })
            .await
    }

    async fn add_footer_button(&self, user_id: i64, button: FooterButton) -> Result<()> {
        let button = bson::to_bson(&button)?;
        self.users
            .update_one(
                doc! { "user_id": user_id },
                doc! { "$push": { "footer_buttons": button } },
                Self::upsert(),
            )
            .await?;
        Ok(())
    }

    async fn remove_footer_button(&self, user_id: i64, name: &str) -> Result<()> {
        self.users
            .update_one(
                doc! { "user_id": user_id },
                doc! { "$pull": { "footer_buttons": { "name": name } } },
                None,
            )
            .await?;
        Ok(())
    }

    async fn set_fsub_channel(&self, user_id: i64, channel_id: Option<i64>) -> Result<()> {
        self.set_user_fields(user_id, doc! { "fsub_channel": channel_id })
            .await
    }

    async fn set_user_link(
        &self,
        user_id: i64,
        link: UserLink,
        url: Option<String>,
    ) -> Result<()> {
        let mut fields = Document::new();
        fields.insert(link.field(), url);
        self.set_user_fields(user_id, fields).await
    }

    async fn get_owner_storage_channel(&self) -> Result<Option<i64>> {
        self.get_setting_channel(OWNER_DB_CONFIG).await
    }

    async fn set_owner_storage_channel(&self, channel_id: i64) -> Result<()> {
        self.set_setting_channel(OWNER_DB_CONFIG, channel_id).await
    }

    async fn get_stream_channel(&self) -> Result<Option<i64>> {
        self.get_setting_channel(STREAM_CONFIG).await
    }

    async fn set_stream_channel(&self, channel_id: i64) -> Result<()> {
        self.set_setting_channel(STREAM_CONFIG, channel_id).await
    }

    async fn is_user_verified(&self, requester_id: i64, owner_id: i64) -> Result<bool> {
        let verification = self
            .verified_users
            .find_one(
                doc! { "requester_id": requester_id, "owner_id": owner_id },
                None,
            )
            .await?;
        Ok(verification.map(|v| v.is_valid()).unwrap_or(false))
    }

    async fn claim_verification_for_file(
        &self,
        unique_id: &str,
        requester_id: i64,
        owner_id: i64,
    ) -> Result<bool> {
        let result = self
            .files
            .update_one(
                doc! {
                    "file_unique_id": unique_id,
                    "verification_claimed": { "$ne": true },
                },
                doc! { "$set": { "verification_claimed": true } },
                None,
            )
            .await?;
        if result.modified_count == 0 {
            return Ok(false);
        }

        let verified_at = bson::to_bson(&Utc::now())?;
        self.verified_users
            .update_one(
                doc! { "requester_id": requester_id, "owner_id": owner_id },
                doc! { "$set": { "verified_at": verified_at } },
                Self::upsert(),
            )
            .await?;
        Ok(true)
    }
}
