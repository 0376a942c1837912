//! Text commands that change a user's configuration, plus the admin commands.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;

use crate::command::Command;
use crate::composer::escape_html;
use crate::models::{ChannelList, FooterButton, ShortenerMode, UserLink, UserSettings};
use crate::retry::with_flood_retry;
use crate::store::Store;
use crate::transport::Transport;

pub const HELP: &str = "<b>Commands</b>\n\n\
    /settings - show your configuration\n\
    /add_post_channel <code>id</code> - post batches to a channel\n\
    /remove_post_channel <code>id</code>\n\
    /add_db_channel <code>id</code> - store files posted in a channel\n\
    /remove_db_channel <code>id</code>\n\
    /poster <code>on|off</code>\n\
    /shortener <code>domain api_key</code> or /shortener <code>off</code>\n\
    /shortener_mode <code>each_time|12_hour</code>\n\
    /add_button <code>name url</code>\n\
    /remove_button <code>name</code>\n\
    /fsub <code>channel_id|off</code> - make requesters join a channel first\n\
    /filename_link <code>url|off</code> - link the file name in delivered files\n\
    /how_to_download <code>url|off</code> - add a help button to file links\n\
    /my_files <code>[page]</code> - browse your stored files\n\
    /search <code>text</code> - find your files by name";

pub struct SettingsCommands {
    store: Arc<dyn Store>,
    transport: Arc<dyn Transport>,
    admin_id: Option<i64>,
}

impl SettingsCommands {
    pub fn new(store: Arc<dyn Store>, transport: Arc<dyn Transport>, admin_id: Option<i64>) -> Self {
        Self {
            store,
            transport,
            admin_id,
        }
    }

    fn is_admin(&self, user_id: i64) -> bool {
        self.admin_id == Some(user_id)
    }

    /// Run `command` for `user_id` and return the reply, or `None` when it is not a settings command.
    pub async fn execute(&self, user_id: i64, command: &Command) -> Result<Option<String>> {
        let args = command.args();
        let reply = match command.name.as_str() {
            "help" => HELP.to_string(),
            "settings" => self.describe(user_id).await?,
            "add_post_channel" => self.add_channel(user_id, ChannelList::Post, &args).await?,
            "remove_post_channel" => {
                self.remove_channel(user_id, ChannelList::Post, &args)
                    .await?
            }
            "add_db_channel" => self.add_channel(user_id, ChannelList::Db, &args).await?,
            "remove_db_channel" => self.remove_channel(user_id, ChannelList::Db, &args).await?,
            "poster" => match args.as_slice() {
                [value] if matches!(*value, "on" | "off") => {
                    let enabled = *value == "on";
                    self.store.set_show_poster(user_id, enabled).await?;
                    format!("🖼 Posters are now <b>{}</b>.", value)
                }
                _ => "Usage: /poster <code>on|off</code>".to_string(),
            },
            "shortener" => match args.as_slice() {
                ["off"] => {
                    self.store.set_shortener(user_id, None).await?;
                    "🔗 Shortener disabled.".to_string()
                }
                [domain, api_key] => {
                    let domain = domain
                        .trim_start_matches("https://")
                        .trim_start_matches("http://")
                        .trim_end_matches('/');
                    self.store
                        .set_shortener(user_id, Some((domain.to_string(), api_key.to_string())))
                        .await?;
                    format!("🔗 Shortener set to <code>{}</code>.", escape_html(domain))
                }
                _ => "Usage: /shortener <code>domain api_key</code> or /shortener <code>off</code>"
                    .to_string(),
            },
            "shortener_mode" => match args.as_slice().first().and_then(|m| ShortenerMode::parse(m)) {
                Some(mode) => {
                    self.store.set_shortener_mode(user_id, mode).await?;
                    format!("🔗 Shortener mode is now <code>{}</code>.", mode.as_str())
                }
                None => "Usage: /shortener_mode <code>each_time|12_hour</code>".to_string(),
            },
            "add_button" => match args.split_last() {
                Some((url, name)) if !name.is_empty() && url.starts_with("http") => {
                    let name = name.join(" ");
                    self.store
                        .add_footer_button(
                            user_id,
                            FooterButton {
                                name: name.clone(),
                                url: url.to_string(),
                            },
                        )
                        .await?;
                    format!("🔘 Added button <b>{}</b>.", escape_html(&name))
                }
                _ => "Usage: /add_button <code>name url</code>".to_string(),
            },
            "remove_button" if !args.is_empty() => {
                let name = args.join(" ");
                self.store.remove_footer_button(user_id, &name).await?;
                format!("🔘 Removed button <b>{}</b>.", escape_html(&name))
            }
            "remove_button" => "Usage: /remove_button <code>name</code>".to_string(),
            "fsub" => match args.as_slice() {
                ["off"] => {
                    self.store.set_fsub_channel(user_id, None).await?;
                    "📢 FSub disabled.".to_string()
                }
                _ => match parse_channel(&args) {
                    Some(channel_id) => self.set_fsub(user_id, channel_id).await?,
                    None => "Usage: /fsub <code>channel_id|off</code>".to_string(),
                },
            },
            "filename_link" => self.set_link(user_id, UserLink::FilenameUrl, &args).await?,
            "how_to_download" => self.set_link(user_id, UserLink::HowToDownload, &args).await?,
            "set_storage" | "set_stream" | "reset_files" if !self.is_admin(user_id) => {
                "⛔ This command is for the bot admin only.".to_string()
            }
            "set_storage" => match parse_channel(&args) {
                Some(channel_id) => {
                    self.store.set_owner_storage_channel(channel_id).await?;
                    info!("Storage channel set to {}", channel_id);
                    format!("🔑 Storage channel set to <code>{}</code>.", channel_id)
                }
                None => "Usage: /set_storage <code>channel_id</code>".to_string(),
            },
            "set_stream" => match parse_channel(&args) {
                Some(channel_id) => {
                    self.store.set_stream_channel(channel_id).await?;
                    info!("Stream channel set to {}", channel_id);
                    format!("🌊 Stream channel set to <code>{}</code>.", channel_id)
                }
                None => "Usage: /set_stream <code>channel_id</code>".to_string(),
            },
            "reset_files" => {
                let deleted = self.store.delete_all_files().await?;
                info!("Admin {} removed {} file records", user_id, deleted);
                format!("⚠️ Removed {} file records.", deleted)
            }
            _ => return Ok(None),
        };
        Ok(Some(reply))
    }

    async fn add_channel(&self, user_id: i64, list: ChannelList, args: &[&str]) -> Result<String> {
        let Some(channel_id) = parse_channel(args) else {
            return Ok(format!(
                "Usage: /add_{}_channel <code>channel_id</code>",
                list_command(list)
            ));
        };
        if let Err(err) =
            with_flood_retry("check_chat_access", || self.transport.check_chat_access(channel_id))
                .await
        {
            info!(
                "User {} tried to add channel {} without access: {}",
                user_id, channel_id, err
            );
            return Ok(format!(
                "❌ I can't access <code>{}</code>. Add me to the channel as an admin first.",
                channel_id
            ));
        }
        self.store
            .add_channel_to_user_list(user_id, list, channel_id)
            .await
            .context("adding channel")?;
        Ok(format!(
            "✅ Added <code>{}</code> to your {} channels.",
            channel_id,
            list.label()
        ))
    }

    async fn set_fsub(&self, user_id: i64, channel_id: i64) -> Result<String> {
        if let Err(err) =
            with_flood_retry("check_chat_access", || self.transport.check_chat_access(channel_id))
                .await
        {
            info!(
                "User {} tried to set FSub channel {} without access: {}",
                user_id, channel_id, err
            );
            return Ok(format!(
                "❌ I can't access <code>{}</code>. Add me to the channel as an admin first.",
                channel_id
            ));
        }
        self.store
            .set_fsub_channel(user_id, Some(channel_id))
            .await
            .context("setting FSub channel")?;
        Ok(format!(
            "📢 Requesters must now join <code>{}</code> to get your files.",
            channel_id
        ))
    }

    async fn set_link(&self, user_id: i64, link: UserLink, args: &[&str]) -> Result<String> {
        let command = link_command(link);
        let url = match args {
            ["off"] => None,
            [url] if url.starts_with("http") => Some(url.to_string()),
            _ => return Ok(format!("Usage: /{} <code>url|off</code>", command)),
        };
        let reply = match &url {
            Some(url) => format!("🔗 /{} set to {}.", command, escape_html(url)),
            None => format!("🔗 /{} cleared.", command),
        };
        self.store
            .set_user_link(user_id, link, url)
            .await
            .context("saving link")?;
        Ok(reply)
    }

    async fn remove_channel(&self, user_id: i64, list: ChannelList, args: &[&str]) -> Result<String> {
        let Some(channel_id) = parse_channel(args) else {
            return Ok(format!(
                "Usage: /remove_{}_channel <code>channel_id</code>",
                list_command(list)
            ));
        };
        self.store
            .remove_channel_from_user_list(user_id, list, channel_id)
            .await
            .context("removing channel")?;
        Ok(format!(
            "🗑 Removed <code>{}</code> from your {} channels.",
            channel_id,
            list.label()
        ))
    }

    async fn describe(&self, user_id: i64) -> Result<String> {
        let settings = self
            .store
            .get_user_settings(user_id)
            .await?
            .unwrap_or_else(|| UserSettings::new(user_id));
        let mut text = format!(
            "⚙️ <b>Your settings</b>\n\n\
             📢 Post channels: {}\n\
             🗄 Database channels: {}\n\
             🖼 Posters: {}\n\
             🔗 Shortener: {}\n\
             🔘 Buttons: {}\n\
             📢 FSub channel: {}\n\
             🏷 File name link: {}\n\
             ❓ How to download: {}",
            channel_list(&settings.post_channels),
            channel_list(&settings.db_channels),
            if settings.show_poster { "on" } else { "off" },
            match settings.shortener() {
                Some((domain, _)) => format!(
                    "<code>{}</code> ({})",
                    escape_html(domain),
                    settings.shortener_mode.as_str()
                ),
                None => "off".to_string(),
            },
            if settings.footer_buttons.is_empty() {
                "none".to_string()
            } else {
                settings
                    .footer_buttons
                    .iter()
                    .map(|b| escape_html(&b.name))
                    .collect::<Vec<_>>()
                    .join(", ")
            },
            channel_list(&settings.fsub_channel.into_iter().collect::<Vec<_>>()),
            optional_link(settings.filename_url.as_deref()),
            optional_link(settings.how_to_download_link.as_deref()),
        );
        if self.is_admin(user_id) {
            let storage = self.store.get_owner_storage_channel().await?;
            let stream = self.store.get_stream_channel().await?;
            text.push_str(&format!(
                "\n\n🔑 Storage channel: {}\n🌊 Stream channel: {}",
                channel_list(&storage.into_iter().collect::<Vec<_>>()),
                channel_list(&stream.into_iter().collect::<Vec<_>>()),
            ));
        }
        Ok(text)
    }
}

fn list_command(list: ChannelList) -> &'static str {
    match list {
        ChannelList::Post => "post",
        ChannelList::Db => "db",
    }
}

fn link_command(link: UserLink) -> &'static str {
    match link {
        UserLink::FilenameUrl => "filename_link",
        UserLink::HowToDownload => "how_to_download",
    }
}

fn optional_link(url: Option<&str>) -> String {
    match url.filter(|u| !u.is_empty()) {
        Some(url) => escape_html(url),
        None => "none".to_string(),
    }
}

fn parse_channel(args: &[&str]) -> Option<i64> {
    match args {
        [id] => id.parse().ok(),
        _ => None,
    }
}

fn channel_list(channels: &[i64]) -> String {
    if channels.is_empty() {
        return "none".to_string();
    }
    channels
        .iter()
        .map(|c| format!("<code>{}</code>", c))
        .collect::<Vec<_>>()
        .join(", ")
}
