use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{error, info, warn};

use crate::batch::{BatchSink, ClosedBatch};
use crate::composer::{Composer, Post};
use crate::error::TransportError;
use crate::models::ChannelList;
use crate::retry::with_flood_retry;
use crate::store::Store;
use crate::transport::Transport;

pub const DEFAULT_SEND_DELAY: Duration = Duration::from_millis(1500);

/// Turns settled batches into posts in every post channel of the owner.
pub struct Finalizer {
    store: Arc<dyn Store>,
    transport: Arc<dyn Transport>,
    composer: Composer,
    send_delay: Duration,
}

impl Finalizer {
    pub fn new(
        store: Arc<dyn Store>,
        transport: Arc<dyn Transport>,
        composer: Composer,
        send_delay: Duration,
    ) -> Self {
        Self {
            store,
            transport,
            composer,
            send_delay,
        }
    }

    async fn try_finalize(&self, batch: &ClosedBatch) -> Result<()> {
        let user_id = batch.key.user_id;
        let Some(settings) = self
            .store
            .get_user_settings(user_id)
            .await
            .context("loading user settings")?
        else {
            info!("User {} has no settings, batch stays unposted", user_id);
            return Ok(());
        };
        if settings.post_channels.is_empty() {
            info!("User {} has no post channels, batch stays unposted", user_id);
            return Ok(());
        }

        let channels = self.valid_channels(user_id, &settings.post_channels).await;
        if channels.is_empty() {
            warn!(
                "No accessible post channels left for user {}, dropping batch '{}'",
                user_id, batch.key.title_key
            );
            return Ok(());
        }

        let posts = self.composer.compose(&settings, &batch.files).await;
        info!(
            "Posting batch '{}' for user {}: {} posts to {} channels",
            batch.key.title_key,
            user_id,
            posts.len(),
            channels.len()
        );
        let mut channels = channels;
        for post in &posts {
            let mut lost = Vec::new();
            for &channel_id in &channels {
                match self.send_post(channel_id, post).await {
                    Ok(()) => {}
                    Err(err) if err.is_permanent_channel_error() => {
                        warn!(
                            "Post channel {} of user {} rejected batch '{}': {}",
                            channel_id, user_id, batch.key.title_key, err
                        );
                        self.drop_channel(user_id, channel_id, &err).await;
                        lost.push(channel_id);
                    }
                    Err(err) => error!(
                        "Failed to post batch '{}' to channel {}: {}",
                        batch.key.title_key, channel_id, err
                    ),
                }
                tokio::time::sleep(self.send_delay).await;
            }
            channels.retain(|channel_id| !lost.contains(channel_id));
        }
        Ok(())
    }

    async fn send_post(&self, channel_id: i64, post: &Post) -> Result<(), TransportError> {
        let buttons = post.buttons.as_ref();
        match &post.poster {
            Some(poster) => {
                with_flood_retry("send_photo", || {
                    self.transport
                        .send_photo(channel_id, poster, &post.caption, buttons)
                })
                .await?;
            }
            None => {
                with_flood_retry("send_text", || {
                    self.transport.send_text(channel_id, &post.caption, buttons)
                })
                .await?;
            }
        }
        Ok(())
    }

    /// Check every post channel, dropping the ones the bot can no longer use.
    async fn valid_channels(&self, user_id: i64, channels: &[i64]) -> Vec<i64> {
        let mut valid = Vec::with_capacity(channels.len());
        for &channel_id in channels {
            match with_flood_retry("check_chat_access", || {
                self.transport.check_chat_access(channel_id)
            })
            .await
            {
                Ok(()) => valid.push(channel_id),
                Err(err) => {
                    warn!(
                        "Post channel {} of user {} is unusable: {}",
                        channel_id, user_id, err
                    );
                    self.drop_channel(user_id, channel_id, &err).await;
                }
            }
        }
        valid
    }

    async fn drop_channel(&self, user_id: i64, channel_id: i64, err: &TransportError) {
        let list = ChannelList::Post;
        let text = if err.is_permanent_channel_error() {
            format!(
                "⚠️ <b>Channel Inaccessible</b>\n\n\
                 Your {} Channel (ID: <code>{}</code>) is no longer accessible. \
                 This can happen if I was removed or the channel was deleted.\n\n\
                 It has been automatically removed from your settings.",
                list.label(),
                channel_id
            )
        } else {
            format!(
                "🗑️ <b>Auto-Clean</b>\n\n\
                 An unexpected error occurred with one of your saved {} Channels \
                 (ID: <code>{}</code>). To prevent issues, this invalid entry has been \
                 removed from your settings.",
                list.label(),
                channel_id
            )
        };

        if let Err(err) = self
            .store
            .remove_channel_from_user_list(user_id, list, channel_id)
            .await
        {
            error!(
                "Failed to remove channel {} for user {}: {:#}",
                channel_id, user_id, err
            );
        }
        if let Err(err) =
            with_flood_retry("send_text", || self.transport.send_text(user_id, &text, None)).await
        {
            error!("Failed to notify user {} about channel {}: {}", user_id, channel_id, err);
        }
    }
}

#[async_trait]
impl BatchSink for Finalizer {
    async fn finalize(&self, batch: ClosedBatch) {
        if let Err(err) = self.try_finalize(&batch).await {
            error!(
                "Finalizing batch '{}' for user {} failed: {:#}",
                batch.key.title_key, batch.key.user_id, err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchKey;
    use crate::links::LinkBuilder;
    use crate::models::UserSettings;
    use crate::testing::{file_record, FakeTransport, MemoryStore, Sent};

    const USER: i64 = 10;

    fn setup(post_channels: Vec<i64>) -> (Arc<MemoryStore>, Arc<FakeTransport>, Finalizer) {
        let store = Arc::new(MemoryStore::default());
        let mut settings = UserSettings::new(USER);
        settings.post_channels = post_channels;
        store.put_user(settings);
        let transport = Arc::new(FakeTransport::default());
        let composer = Composer::new(LinkBuilder::new("http://host:8080", "StoreBot"), None);
        let finalizer = Finalizer::new(
            store.clone(),
            transport.clone(),
            composer,
            Duration::from_millis(10),
        );
        (store, transport, finalizer)
    }

    fn batch(names: &[&str]) -> ClosedBatch {
        ClosedBatch {
            key: BatchKey {
                user_id: USER,
                title_key: "show".to_string(),
            },
            files: names
                .iter()
                .enumerate()
                .map(|(i, name)| file_record(USER, &format!("u{}", i), name))
                .collect(),
        }
    }

    fn texts_to(sent: &[Sent], chat: i64) -> Vec<String> {
        sent.iter()
            .filter_map(|s| match s {
                Sent::Text { chat_id, html, .. } if *chat_id == chat => Some(html.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn posts_to_every_channel() {
        let (_, transport, finalizer) = setup(vec![-100, -200]);
        finalizer
            .finalize(batch(&["Show.S01E01.mkv", "Show.S01E02.mkv"]))
            .await;

        let sent = transport.sent();
        assert_eq!(texts_to(&sent, -100).len(), 1);
        assert_eq!(texts_to(&sent, -200).len(), 1);
        assert!(texts_to(&sent, -100)[0].contains("http://host:8080/get/10_u0"));
    }

    #[tokio::test(start_paused = true)]
    async fn no_post_channels_is_a_no_op() {
        let (_, transport, finalizer) = setup(vec![]);
        finalizer.finalize(batch(&["Show.S01E01.mkv"])).await;
        assert!(transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn inaccessible_channel_is_removed_and_user_notified() {
        let (store, transport, finalizer) = setup(vec![-100, -200]);
        transport.block_chat(-200);

        finalizer.finalize(batch(&["Show.S01E01.mkv"])).await;

        assert_eq!(store.user(USER).unwrap().post_channels, vec![-100]);
        let sent = transport.sent();
        let notices = texts_to(&sent, USER);
        assert_eq!(notices.len(), 1);
        assert!(notices[0].contains("Channel Inaccessible"));
        assert!(texts_to(&sent, -200).is_empty());
        assert_eq!(texts_to(&sent, -100).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn all_channels_gone_abandons_batch() {
        let (store, transport, finalizer) = setup(vec![-100]);
        transport.block_chat(-100);

        finalizer.finalize(batch(&["Show.S01E01.mkv"])).await;

        assert!(store.user(USER).unwrap().post_channels.is_empty());
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert!(texts_to(&sent, -100).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn channel_rejecting_posts_is_removed_mid_batch() {
        let (store, transport, finalizer) = setup(vec![-100, -200]);
        transport.fail_sends_to(-100);
        let names: Vec<String> = (1..=60)
            .map(|i| format!("Long.Running.Show.S01E{:02}.1080p.WEB-DL.DDP5.1.x264-GRP.mkv", i))
            .collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();

        finalizer.finalize(batch(&names)).await;

        assert_eq!(store.user(USER).unwrap().post_channels, vec![-200]);
        let sent = transport.sent();
        let notices = texts_to(&sent, USER);
        assert_eq!(notices.len(), 1);
        assert!(notices[0].contains("Channel Inaccessible"));
        assert!(texts_to(&sent, -200).len() > 1);
        assert_eq!(transport.rejected_sends(-100), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn flood_waits_are_retried() {
        let (_, transport, finalizer) = setup(vec![-100]);
        transport.flood_waits.lock().unwrap().push(3);

        let start = tokio::time::Instant::now();
        finalizer.finalize(batch(&["Show.S01E01.mkv"])).await;

        assert!(start.elapsed() >= Duration::from_secs(4));
        assert_eq!(texts_to(&transport.sent(), -100).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_user_is_ignored() {
        let (_, transport, finalizer) = setup(vec![-100]);
        let mut closed = batch(&["Show.S01E01.mkv"]);
        closed.key.user_id = 999;
        finalizer.finalize(closed).await;
        assert!(transport.sent().is_empty());
    }
}
