use std::sync::Arc;

use anyhow::Result;
use grammers_client::{
    types::{Chat, Message, User},
    Client, InputMessage, Update,
};
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::command::{parse_command, Command};
use crate::composer::escape_html;
use crate::delivery::{DeepLink, Delivery, NOT_CONFIGURED};
use crate::ingest::{IngestJob, IngestSender};
use crate::library::Library;
use crate::settings::SettingsCommands;
use crate::store::Store;
use crate::telegram::{incoming_file, marked_id, TelegramTransport};
use crate::transport::IncomingFile;

/// Telegram front end: routes updates to ingestion, deep links and settings.
pub struct Bot {
    client: Client,
    me: User,
    transport: Arc<TelegramTransport>,
    store: Arc<dyn Store>,
    delivery: Delivery,
    settings: SettingsCommands,
    library: Library,
    ingest: IngestSender,
}

impl Bot {
    pub fn new(
        client: Client,
        transport: Arc<TelegramTransport>,
        store: Arc<dyn Store>,
        delivery: Delivery,
        settings: SettingsCommands,
        library: Library,
        ingest: IngestSender,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            me: transport.me().clone(),
            transport,
            store,
            delivery,
            settings,
            library,
            ingest,
        })
    }

    /// Main loop to receive updates asynchronously
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping update loop");
                    break;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, exiting");
                    break;
                }
                update = self.client.next_update() => {
                    let update = match update {
                        Ok(update) => update,
                        Err(err) => {
                            error!("Error receiving update: {}", err);
                            continue;
                        }
                    };
                    let self_ = Arc::clone(&self);

                    tokio::spawn(async move {
                        if let Err(err) = self_.handle_update(update).await {
                            error!("Error handling update: {:#}", err);
                        }
                    });
                }
            }
        }
    }

    async fn handle_update(&self, update: Update) -> Result<()> {
        match update {
            Update::NewMessage(msg) if !msg.outgoing() => self.handle_message(msg).await,
            _ => Ok(()),
        }
    }

    async fn handle_message(&self, msg: Message) -> Result<()> {
        let chat = msg.chat();
        self.transport.remember(&chat);

        match chat {
            Chat::User(_) => self.handle_private(msg).await,
            Chat::Channel(_) => self.handle_channel_post(msg).await,
            Chat::Group(_) => Ok(()),
        }
    }

    async fn handle_private(&self, msg: Message) -> Result<()> {
        let user_id = marked_id(&msg.chat());

        if let Some(command) = parse_command(msg.text()) {
            if let Some(via) = &command.via {
                if via.to_lowercase() != self.me.username().unwrap_or_default().to_lowercase() {
                    warn!("Ignoring command for unknown bot: {}", via);
                    return Ok(());
                }
            }
            info!("Received command from {}: {:?}", user_id, command);
            return self.handle_command(&msg, user_id, command).await;
        }

        if let Some(file) = incoming_file(&msg) {
            return self.handle_private_file(&msg, user_id, file).await;
        }
        Ok(())
    }

    async fn handle_command(&self, msg: &Message, user_id: i64, command: Command) -> Result<()> {
        if command.name == "start" {
            return self.handle_start(msg, user_id, command).await;
        }
        let reply = match self.settings.execute(user_id, &command).await {
            Ok(None) => self.library.execute(user_id, &command).await,
            other => other,
        };
        match reply {
            Ok(Some(reply)) => {
                msg.reply(InputMessage::html(reply)).await?;
            }
            Ok(None) => debug!("Unhandled command {}", command.name),
            Err(err) => {
                error!("Command /{} from {} failed: {:#}", command.name, user_id, err);
                msg.reply("Something went wrong.").await?;
            }
        }
        Ok(())
    }

    async fn handle_start(&self, msg: &Message, user_id: i64, command: Command) -> Result<()> {
        self.store.add_user(user_id).await?;

        if let Some(link) = command.arg.as_deref().and_then(DeepLink::parse) {
            if let Err(err) = self.delivery.handle(user_id, link).await {
                error!("Deep link {:?} for {} failed: {:#}", link, user_id, err);
                msg.reply("Something went wrong.").await?;
            }
            return Ok(());
        }

        msg.reply(InputMessage::html(
            "👋 <b>Welcome to your File Store Assistant!</b>\n\n\
            🗂️ <b>File Storage</b>\n\
            \u{2022} Send me files or post them in your database channels\n\
            \u{2022} Get fast download and streaming links\n\n\
            📢 <b>Auto-Posting</b>\n\
            \u{2022} Episodes of the same title are grouped into one post\n\
            \u{2022} Posters, shortener links and footer buttons\n\n\
            Send /help to see every command.",
        ))
        .await?;
        Ok(())
    }

    async fn handle_private_file(
        &self,
        msg: &Message,
        user_id: i64,
        file: IncomingFile,
    ) -> Result<()> {
        if self.store.get_owner_storage_channel().await?.is_none() {
            msg.reply(NOT_CONFIGURED).await?;
            return Ok(());
        }
        let name = file.file_name.clone();
        self.enqueue(user_id, file);
        msg.reply(InputMessage::html(format!(
            "⏳ <code>{}</code> received, it will be stored and posted shortly.",
            escape_html(&name)
        )))
        .await?;
        Ok(())
    }

    async fn handle_channel_post(&self, msg: Message) -> Result<()> {
        let Some(file) = incoming_file(&msg) else {
            return Ok(());
        };
        let channel_id = marked_id(&msg.chat());
        match self.store.find_owner_by_db_channel(channel_id).await? {
            Some(owner_id) => self.enqueue(owner_id, file),
            None => debug!("Ignoring media in unregistered channel {}", channel_id),
        }
        Ok(())
    }

    fn enqueue(&self, user_id: i64, file: IncomingFile) {
        debug!("Queueing '{}' for user {}", file.file_name, user_id);
        if self.ingest.send(IngestJob { user_id, file }).is_err() {
            warn!("Ingestion queue is closed, dropping file for user {}", user_id);
        }
    }
}
