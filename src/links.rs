/// Id used in public links: `{owner_id}_{unique_id}`.
pub fn composite_id(owner_id: i64, unique_id: &str) -> String {
    format!("{}_{}", owner_id, unique_id)
}

/// Split a composite id. Bare unique ids (older links) come back without an owner.
pub fn parse_composite_id(id: &str) -> (Option<i64>, &str) {
    if let Some((owner, unique)) = id.split_once('_') {
        if let Ok(owner) = owner.parse::<i64>() {
            if !unique.is_empty() {
                return (Some(owner), unique);
            }
        }
    }
    (None, id)
}

/// `t.me/c/...` link to a message in a private channel.
pub fn raw_link(chat_id: i64, message_id: i32) -> String {
    let chat = chat_id.to_string();
    let chat = chat.strip_prefix("-100").unwrap_or(&chat);
    format!("https://t.me/c/{}/{}", chat, message_id)
}

/// Builds the URLs the bot hands out.
#[derive(Debug, Clone)]
pub struct LinkBuilder {
    base_url: String,
    bot_username: String,
}

impl LinkBuilder {
    pub fn new(base_url: &str, bot_username: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            bot_username: bot_username.trim_start_matches('@').to_string(),
        }
    }

    pub fn bot_username(&self) -> &str {
        &self.bot_username
    }

    /// Public link placed in posts; the web layer redirects it into the bot.
    pub fn file_link(&self, composite_id: &str) -> String {
        format!("{}/get/{}", self.base_url, composite_id)
    }

    pub fn start_link(&self, payload: &str) -> String {
        format!("https://t.me/{}?start={}", self.bot_username, payload)
    }

    pub fn stream_link(&self, message_id: i32) -> String {
        format!("{}/stream/{}", self.base_url, message_id)
    }

    pub fn download_link(&self, message_id: i32) -> String {
        format!("{}/download/{}", self.base_url, message_id)
    }
}
