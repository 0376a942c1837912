//! Hands stored files to the people who open their links.
//!
//! A public link lands on `/start get_{id}`, which answers with a button to
//! `/start finalget_{id}` (shortened when the owner runs a shortener). The
//! `finalget_` step copies the stored message to the requester. Owners fetch
//! their own files with `/start ownerget_{id}`, which skips every gate.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};

use crate::composer::escape_html;
use crate::links::{parse_composite_id, LinkBuilder};
use crate::models::{FileRecord, ShortenerMode, UserSettings};
use crate::parser::strip_promotions;
use crate::retry::with_flood_retry;
use crate::shortener::Shortener;
use crate::store::Store;
use crate::transport::{ButtonRows, MessageRef, Transport, UrlButton};

pub const FILE_UNAVAILABLE: &str = "Sorry, this file is no longer available.";
pub const NOT_CONFIGURED: &str =
    "The bot is not yet configured by the admin. Please try again later.";
pub const JOIN_REQUIRED: &str = "You must join the channel to continue.";

/// Payload of a `/start` deep link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeepLink<'a> {
    Get(&'a str),
    FinalGet(&'a str),
    OwnerGet(&'a str),
}

impl<'a> DeepLink<'a> {
    pub fn parse(payload: &'a str) -> Option<Self> {
        let link = if let Some(id) = payload.strip_prefix("finalget_") {
            DeepLink::FinalGet(id)
        } else if let Some(id) = payload.strip_prefix("ownerget_") {
            DeepLink::OwnerGet(id)
        } else if let Some(id) = payload.strip_prefix("get_") {
            DeepLink::Get(id)
        } else {
            return None;
        };
        Some(link).filter(|link| !link.id().is_empty())
    }

    pub fn id(&self) -> &'a str {
        match self {
            DeepLink::Get(id) | DeepLink::FinalGet(id) | DeepLink::OwnerGet(id) => id,
        }
    }
}

pub struct Delivery {
    store: Arc<dyn Store>,
    transport: Arc<dyn Transport>,
    shortener: Arc<dyn Shortener>,
    links: LinkBuilder,
}

impl Delivery {
    pub fn new(
        store: Arc<dyn Store>,
        transport: Arc<dyn Transport>,
        shortener: Arc<dyn Shortener>,
        links: LinkBuilder,
    ) -> Self {
        Self {
            store,
            transport,
            shortener,
            links,
        }
    }

    pub async fn handle(&self, requester_id: i64, link: DeepLink<'_>) -> Result<()> {
        match link {
            DeepLink::Get(id) => self.offer_file(requester_id, id).await,
            DeepLink::FinalGet(id) => self.send_file(requester_id, id).await,
            DeepLink::OwnerGet(id) => self.send_own_file(requester_id, id).await,
        }
    }

    async fn find_file(&self, id: &str) -> Result<Option<FileRecord>> {
        let (owner_id, unique_id) = parse_composite_id(id);
        self.store
            .get_file_record(unique_id, owner_id)
            .await
            .context("loading file record")
    }

    async fn owner_settings(&self, owner_id: i64) -> Result<UserSettings> {
        Ok(self
            .store
            .get_user_settings(owner_id)
            .await
            .context("loading owner settings")?
            .unwrap_or_else(|| UserSettings::new(owner_id)))
    }

    async fn reply(&self, chat_id: i64, html: &str, buttons: Option<&ButtonRows>) -> Result<()> {
        with_flood_retry("send_text", || self.transport.send_text(chat_id, html, buttons))
            .await
            .context("sending reply")?;
        Ok(())
    }

    /// Answer a `get_` link with the button that leads to the file.
    async fn offer_file(&self, requester_id: i64, id: &str) -> Result<()> {
        let Some(file) = self.find_file(id).await? else {
            return self.reply(requester_id, FILE_UNAVAILABLE, None).await;
        };
        let owner = self.owner_settings(file.owner_id).await?;
        if let Some(channel_id) = owner.fsub_channel {
            if !self
                .passes_fsub(requester_id, file.owner_id, channel_id, id)
                .await?
            {
                return Ok(());
            }
        }
        let final_link = self.links.start_link(&format!("finalget_{}", id));

        let (text, label, url) = match owner.shortener() {
            None => (
                "✅ <b>Your link is ready!</b>\n\nClick the button below to get your file directly.",
                "➡️ Get Your File ⬅️",
                final_link,
            ),
            Some((domain, key)) => match owner.shortener_mode {
                ShortenerMode::EachTime => (
                    "<b>Your file is almost ready!</b>\n\n\
                     1. Click the button below.\n\
                     2. You will be redirected back, and I will send you the file.",
                    "➡️ Click Here to Get Your File ⬅️",
                    self.shortener.shorten(domain, key, &final_link).await,
                ),
                ShortenerMode::TwelveHour => {
                    let verified = self
                        .store
                        .is_user_verified(requester_id, file.owner_id)
                        .await
                        .context("checking verification")?;
                    if verified {
                        (
                            "✅ <b>You are verified!</b>\n\n\
                             Your 12-hour verification is active. Click below to get your file directly.",
                            "➡️ Get Your File Directly ⬅️",
                            final_link,
                        )
                    } else {
                        (
                            "<b>One-Time Verification Required</b>\n\n\
                             To get direct access for 12 hours, please complete this one-time verification step.",
                            "➡️ Click to Verify (12 Hours) ⬅️",
                            self.shortener.shorten(domain, key, &final_link).await,
                        )
                    }
                }
            },
        };

        let mut buttons = vec![vec![UrlButton {
            text: label.to_string(),
            url,
        }]];
        if let Some(help) = owner.how_to_download_link.as_deref().filter(|l| !l.is_empty()) {
            buttons.push(vec![UrlButton {
                text: "❓ How to Download".to_string(),
                url: help.to_string(),
            }]);
        }
        self.reply(requester_id, text, Some(&buttons)).await
    }

    /// Check the owner's force-subscribe channel. Returns `false` after asking
    /// the requester to join first.
    ///
    /// A channel the bot can no longer use is cleared from the owner's settings
    /// and does not hold the requester back.
    async fn passes_fsub(
        &self,
        requester_id: i64,
        owner_id: i64,
        channel_id: i64,
        id: &str,
    ) -> Result<bool> {
        if let Err(err) =
            with_flood_retry("check_chat_access", || self.transport.check_chat_access(channel_id))
                .await
        {
            if !err.is_permanent_channel_error() {
                warn!("Could not check FSub channel {} of {}: {}", channel_id, owner_id, err);
                return Ok(true);
            }
            warn!("FSub channel {} of {} is gone: {}", channel_id, owner_id, err);
            self.store
                .set_fsub_channel(owner_id, None)
                .await
                .context("clearing FSub channel")?;
            let notice = format!(
                "⚠️ <b>FSub Channel Error</b>\n\n\
                 Your FSub channel (<code>{}</code>) is no longer accessible. \
                 It has been removed from your settings.",
                channel_id
            );
            if let Err(err) = self.reply(owner_id, &notice, None).await {
                warn!("Failed to tell {} about FSub channel {}: {:#}", owner_id, channel_id, err);
            }
            return Ok(true);
        }

        match with_flood_retry("is_member", || self.transport.is_member(channel_id, requester_id))
            .await
        {
            Ok(true) => Ok(true),
            Ok(false) => {
                let mut buttons = Vec::new();
                match with_flood_retry("invite_link", || self.transport.invite_link(channel_id))
                    .await
                {
                    Ok(url) => buttons.push(vec![UrlButton {
                        text: "📢 Join Channel".to_string(),
                        url,
                    }]),
                    Err(err) => warn!("No invite link for FSub channel {}: {}", channel_id, err),
                }
                buttons.push(vec![UrlButton {
                    text: "🔄 Retry".to_string(),
                    url: self.links.start_link(&format!("get_{}", id)),
                }]);
                self.reply(requester_id, JOIN_REQUIRED, Some(&buttons))
                    .await?;
                Ok(false)
            }
            Err(err) => {
                warn!(
                    "Membership of {} in FSub channel {} unknown: {}",
                    requester_id, channel_id, err
                );
                Ok(true)
            }
        }
    }

    /// Copy the stored file to the requester.
    async fn send_file(&self, requester_id: i64, id: &str) -> Result<()> {
        let Some(file) = self.find_file(id).await? else {
            return self.reply(requester_id, FILE_UNAVAILABLE, None).await;
        };
        let owner = self.owner_settings(file.owner_id).await?;

        if owner.shortener_mode == ShortenerMode::TwelveHour {
            let was_verified = self
                .store
                .is_user_verified(requester_id, file.owner_id)
                .await
                .context("checking verification")?;
            let claimed = self
                .store
                .claim_verification_for_file(&file.file_unique_id, requester_id, file.owner_id)
                .await
                .context("claiming verification")?;
            if claimed && !was_verified {
                info!("User {} verified for owner {}", requester_id, file.owner_id);
                self.reply(
                    requester_id,
                    "✅ <b>Verification Successful!</b>\n\n\
                     You can now get direct links from this user's channels for the next 12 hours.",
                    None,
                )
                .await?;
            }
        }
        self.deliver(requester_id, id, &file, &owner).await
    }

    /// Owner shortcut used by the file list. Anyone else goes through `get_`.
    async fn send_own_file(&self, requester_id: i64, id: &str) -> Result<()> {
        let Some(file) = self.find_file(id).await? else {
            return self.reply(requester_id, FILE_UNAVAILABLE, None).await;
        };
        if file.owner_id != requester_id {
            info!("User {} opened an owner link of {}", requester_id, file.owner_id);
            return self.offer_file(requester_id, id).await;
        }
        let owner = self.owner_settings(file.owner_id).await?;
        self.deliver(requester_id, id, &file, &owner).await
    }

    async fn deliver(
        &self,
        requester_id: i64,
        id: &str,
        file: &FileRecord,
        owner: &UserSettings,
    ) -> Result<()> {
        let Some(storage_channel) = self
            .store
            .get_owner_storage_channel()
            .await
            .context("loading storage channel")?
        else {
            warn!("Storage channel not set, cannot deliver {}", id);
            return self.reply(requester_id, NOT_CONFIGURED, None).await;
        };

        let caption = file_caption(file, owner);
        let buttons = vec![vec![
            UrlButton {
                text: "📥 Fast Download".to_string(),
                url: self.links.download_link(file.stream_id),
            },
            UrlButton {
                text: "▶️ Watch Online".to_string(),
                url: self.links.stream_link(file.stream_id),
            },
        ]];
        let source = MessageRef::new(storage_channel, file.file_id);
        with_flood_retry("copy_message", || {
            self.transport
                .copy_message(source, requester_id, Some(&caption), Some(&buttons))
        })
        .await
        .with_context(|| format!("copying {} to {}", id, requester_id))?;
        info!("Delivered '{}' to user {}", file.file_name, requester_id);
        Ok(())
    }
}

fn file_caption(file: &FileRecord, owner: &UserSettings) -> String {
    let name = escape_html(&strip_promotions(&file.file_name));
    let name = match owner.filename_url.as_deref().filter(|u| !u.is_empty()) {
        Some(url) => format!("<a href=\"{}\">{}</a>", escape_html(url), name),
        None => format!("<code>{}</code>", name),
    };
    format!("✅ <b>Here is your file!</b>\n\n{}", name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{file_record, FakeTransport, MemoryStore, PrefixShortener, Sent};

    const OWNER: i64 = 10;
    const REQUESTER: i64 = 77;
    const STORAGE: i64 = -1001;

    struct Fixture {
        store: Arc<MemoryStore>,
        transport: Arc<FakeTransport>,
        delivery: Delivery,
    }

    fn fixture(owner: UserSettings) -> Fixture {
        let store = Arc::new(MemoryStore::with_channels(Some(STORAGE), None));
        store.put_user(owner);
        let mut record = file_record(OWNER, "AgAD1", "@chan Movie Name 2020.mkv");
        record.file_id = 40;
        record.stream_id = 41;
        store.state.lock().unwrap().files.push(record);
        let transport = Arc::new(FakeTransport::default());
        let delivery = Delivery::new(
            store.clone(),
            transport.clone(),
            Arc::new(PrefixShortener),
            LinkBuilder::new("http://host:8080", "StoreBot"),
        );
        Fixture {
            store,
            transport,
            delivery,
        }
    }

    fn shortened_owner(mode: ShortenerMode) -> UserSettings {
        let mut owner = UserSettings::new(OWNER);
        owner.shortener_url = Some("sho.rt".to_string());
        owner.shortener_api = Some("key".to_string());
        owner.shortener_mode = mode;
        owner
    }

    fn last_text_with_buttons(transport: &FakeTransport) -> (String, ButtonRows) {
        match transport.sent().last() {
            Some(Sent::Text { html, buttons, .. }) => {
                (html.clone(), buttons.clone().unwrap_or_default())
            }
            other => panic!("expected text, got {:?}", other),
        }
    }

    fn last_text(transport: &FakeTransport) -> String {
        last_text_with_buttons(transport).0
    }

    #[test]
    fn parses_deep_links() {
        assert_eq!(DeepLink::parse("get_10_AgAD"), Some(DeepLink::Get("10_AgAD")));
        assert_eq!(DeepLink::parse("finalget_AgAD"), Some(DeepLink::FinalGet("AgAD")));
        assert_eq!(
            DeepLink::parse("ownerget_10_AgAD"),
            Some(DeepLink::OwnerGet("10_AgAD"))
        );
        assert_eq!(DeepLink::parse("get_"), None);
        assert_eq!(DeepLink::parse("hello"), None);
    }

    #[tokio::test]
    async fn direct_link_without_shortener() {
        let mut owner = UserSettings::new(OWNER);
        owner.how_to_download_link = Some("https://help.example".to_string());
        let f = fixture(owner);

        f.delivery
            .handle(REQUESTER, DeepLink::Get("10_AgAD1"))
            .await
            .unwrap();

        let (text, buttons) = last_text_with_buttons(&f.transport);
        assert!(text.contains("Your link is ready"));
        assert_eq!(buttons[0][0].url, "https://t.me/StoreBot?start=finalget_10_AgAD1");
        assert_eq!(buttons[1][0].url, "https://help.example");
    }

    #[tokio::test]
    async fn each_time_mode_always_shortens() {
        let f = fixture(shortened_owner(ShortenerMode::EachTime));
        f.delivery
            .handle(REQUESTER, DeepLink::Get("10_AgAD1"))
            .await
            .unwrap();
        let (text, buttons) = last_text_with_buttons(&f.transport);
        assert!(text.contains("almost ready"));
        assert_eq!(
            buttons[0][0].url,
            "https://sho.rt/s/https://t.me/StoreBot?start=finalget_10_AgAD1"
        );
    }

    #[tokio::test]
    async fn twelve_hour_mode_verifies_once() {
        let f = fixture(shortened_owner(ShortenerMode::TwelveHour));

        f.delivery
            .handle(REQUESTER, DeepLink::Get("10_AgAD1"))
            .await
            .unwrap();
        assert!(last_text(&f.transport).contains("Verification Required"));

        f.delivery
            .handle(REQUESTER, DeepLink::FinalGet("10_AgAD1"))
            .await
            .unwrap();
        let sent = f.transport.sent();
        assert!(sent.iter().any(
            |s| matches!(s, Sent::Text { html, .. } if html.contains("Verification Successful"))
        ));
        assert!(f.store.is_user_verified(REQUESTER, OWNER).await.unwrap());

        f.delivery
            .handle(REQUESTER, DeepLink::Get("10_AgAD1"))
            .await
            .unwrap();
        let (text, buttons) = last_text_with_buttons(&f.transport);
        assert!(text.contains("You are verified"));
        assert_eq!(buttons[0][0].url, "https://t.me/StoreBot?start=finalget_10_AgAD1");
    }

    #[tokio::test]
    async fn final_get_copies_from_storage() {
        let f = fixture(UserSettings::new(OWNER));
        f.delivery
            .handle(REQUESTER, DeepLink::FinalGet("10_AgAD1"))
            .await
            .unwrap();

        match f.transport.sent().last() {
            Some(Sent::Copy {
                source,
                destination,
                caption,
                buttons,
            }) => {
                let buttons = buttons.as_ref().unwrap();
                assert_eq!(buttons[0][0].url, "http://host:8080/download/41");
                assert_eq!(buttons[0][1].url, "http://host:8080/stream/41");
                assert_eq!(*source, MessageRef::new(STORAGE, 40));
                assert_eq!(*destination, REQUESTER);
                let caption = caption.as_deref().unwrap();
                assert!(caption.contains("<code>Movie Name 2020.mkv</code>"));
                assert!(!caption.contains("@chan"));
            }
            other => panic!("expected a copy, got {:?}", other),
        }
    }

    const FSUB: i64 = -1005555555555;

    fn fsub_owner() -> UserSettings {
        let mut owner = UserSettings::new(OWNER);
        owner.fsub_channel = Some(FSUB);
        owner
    }

    #[tokio::test]
    async fn fsub_asks_outsiders_to_join() {
        let f = fixture(fsub_owner());
        f.delivery
            .handle(REQUESTER, DeepLink::Get("10_AgAD1"))
            .await
            .unwrap();

        let (text, buttons) = last_text_with_buttons(&f.transport);
        assert_eq!(text, JOIN_REQUIRED);
        assert_eq!(buttons[0][0].url, "https://t.me/+join1005555555555");
        assert_eq!(buttons[1][0].url, "https://t.me/StoreBot?start=get_10_AgAD1");
    }

    #[tokio::test]
    async fn fsub_lets_members_through() {
        let f = fixture(fsub_owner());
        f.transport.join(FSUB, REQUESTER);
        f.delivery
            .handle(REQUESTER, DeepLink::Get("10_AgAD1"))
            .await
            .unwrap();
        assert!(last_text(&f.transport).contains("Your link is ready"));
    }

    #[tokio::test]
    async fn lost_fsub_channel_is_cleared_and_owner_told() {
        let f = fixture(fsub_owner());
        f.transport.block_chat(FSUB);
        f.delivery
            .handle(REQUESTER, DeepLink::Get("10_AgAD1"))
            .await
            .unwrap();

        assert_eq!(f.store.user(OWNER).unwrap().fsub_channel, None);
        let sent = f.transport.sent();
        assert!(sent.iter().any(|s| matches!(
            s,
            Sent::Text { chat_id, html, .. } if *chat_id == OWNER && html.contains("FSub Channel Error")
        )));
        assert!(last_text(&f.transport).contains("Your link is ready"));
    }

    #[tokio::test]
    async fn owner_link_skips_the_gates() {
        let mut owner = shortened_owner(ShortenerMode::TwelveHour);
        owner.fsub_channel = Some(FSUB);
        let f = fixture(owner);
        f.delivery
            .handle(OWNER, DeepLink::OwnerGet("10_AgAD1"))
            .await
            .unwrap();

        let sent = f.transport.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(&sent[0], Sent::Copy { destination, .. } if *destination == OWNER));
        assert!(!f.store.is_user_verified(OWNER, OWNER).await.unwrap());
    }

    #[tokio::test]
    async fn owner_link_from_someone_else_is_a_public_request() {
        let f = fixture(UserSettings::new(OWNER));
        f.delivery
            .handle(REQUESTER, DeepLink::OwnerGet("10_AgAD1"))
            .await
            .unwrap();
        assert!(last_text(&f.transport).contains("Your link is ready"));
    }

    #[tokio::test]
    async fn filename_link_wraps_the_caption() {
        let mut owner = UserSettings::new(OWNER);
        owner.filename_url = Some("https://t.me/mychannel".to_string());
        let f = fixture(owner);
        f.delivery
            .handle(REQUESTER, DeepLink::FinalGet("10_AgAD1"))
            .await
            .unwrap();
        match f.transport.sent().last() {
            Some(Sent::Copy { caption, .. }) => assert!(caption
                .as_deref()
                .unwrap()
                .contains("<a href=\"https://t.me/mychannel\">Movie Name 2020.mkv</a>")),
            other => panic!("expected a copy, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn legacy_ids_resolve_without_owner() {
        let f = fixture(UserSettings::new(OWNER));
        f.delivery
            .handle(REQUESTER, DeepLink::FinalGet("AgAD1"))
            .await
            .unwrap();
        assert!(matches!(f.transport.sent().last(), Some(Sent::Copy { .. })));
    }

    #[tokio::test]
    async fn unknown_file_is_reported() {
        let f = fixture(UserSettings::new(OWNER));
        f.delivery
            .handle(REQUESTER, DeepLink::Get("10_missing"))
            .await
            .unwrap();
        assert_eq!(last_text(&f.transport), FILE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn missing_storage_channel_is_reported() {
        let f = fixture(UserSettings::new(OWNER));
        f.store.state.lock().unwrap().storage_channel = None;
        f.delivery
            .handle(REQUESTER, DeepLink::FinalGet("10_AgAD1"))
            .await
            .unwrap();
        assert_eq!(last_text(&f.transport), NOT_CONFIGURED);
    }
}
