use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// A stored media item, unique per `(owner_id, file_unique_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub owner_id: i64,
    pub file_unique_id: String,
    /// Message id of the copy in the storage channel.
    pub file_id: i32,
    /// Message id of the copy in the stream channel (same as `file_id` without one).
    pub stream_id: i32,
    pub file_name: String,
    pub file_size: u64,
    pub raw_link: String,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FooterButton {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ShortenerMode {
    /// Every request goes through the shortener.
    #[default]
    #[serde(rename = "each_time")]
    EachTime,
    /// One shortened visit unlocks direct links for twelve hours.
    #[serde(rename = "12_hour")]
    TwelveHour,
}

impl ShortenerMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "each_time" => Some(ShortenerMode::EachTime),
            "12_hour" => Some(ShortenerMode::TwelveHour),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ShortenerMode::EachTime => "each_time",
            ShortenerMode::TwelveHour => "12_hour",
        }
    }
}

/// Per-user configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    pub user_id: i64,
    #[serde(default)]
    pub post_channels: Vec<i64>,
    #[serde(default)]
    pub db_channels: Vec<i64>,
    #[serde(default)]
    pub shortener_url: Option<String>,
    #[serde(default)]
    pub shortener_api: Option<String>,
    #[serde(default)]
    pub filename_url: Option<String>,
    #[serde(default)]
    pub footer_buttons: Vec<FooterButton>,
    #[serde(default = "default_true")]
    pub show_poster: bool,
    #[serde(default = "default_true")]
    pub shortener_enabled: bool,
    #[serde(default)]
    pub how_to_download_link: Option<String>,
    #[serde(default)]
    pub shortener_mode: ShortenerMode,
    /// Channel requesters must join before they get a file.
    #[serde(default)]
    pub fsub_channel: Option<i64>,
}

fn default_true() -> bool {
    true
}

impl UserSettings {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            post_channels: Vec::new(),
            db_channels: Vec::new(),
            shortener_url: None,
            shortener_api: None,
            filename_url: None,
            footer_buttons: Vec::new(),
            show_poster: true,
            shortener_enabled: true,
            how_to_download_link: None,
            shortener_mode: ShortenerMode::EachTime,
            fsub_channel: None,
        }
    }

    /// Shortener credentials, when the shortener is switched on and fully configured.
    pub fn shortener(&self) -> Option<(&str, &str)> {
        if !self.shortener_enabled {
            return None;
        }
        match (&self.shortener_url, &self.shortener_api) {
            (Some(url), Some(api)) if !url.trim().is_empty() && !api.trim().is_empty() => {
                Some((url.trim(), api.trim()))
            }
            _ => None,
        }
    }
}

/// Channel lists stored on a user document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelList {
    Post,
    Db,
}

impl ChannelList {
    pub fn field(&self) -> &'static str {
        match self {
            ChannelList::Post => "post_channels",
            ChannelList::Db => "db_channels",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ChannelList::Post => "Post",
            ChannelList::Db => "Database",
        }
    }
}

/// Optional links a user can attach to delivered files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserLink {
    /// Wraps the file name in delivery captions.
    FilenameUrl,
    /// Extra button under every `get_` reply.
    HowToDownload,
}

impl UserLink {
    pub fn field(&self) -> &'static str {
        match self {
            UserLink::FilenameUrl => "filename_url",
            UserLink::HowToDownload => "how_to_download_link",
        }
    }
}

/// One page of a user's files plus the number of files matching overall.
#[derive(Debug, Clone, Default)]
pub struct FilePage {
    pub files: Vec<FileRecord>,
    pub total: u64,
}

/// A requester's verification against one owner's shortener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verification {
    pub requester_id: i64,
    pub owner_id: i64,
    pub verified_at: DateTime<Utc>,
}

impl Verification {
    pub const VALIDITY_HOURS: i64 = 12;

    pub fn is_valid(&self) -> bool {
        Utc::now() - self.verified_at < chrono::Duration::hours(Self::VALIDITY_HOURS)
    }
}
