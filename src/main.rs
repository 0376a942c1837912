use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bot::Bot;
use dotenv::dotenv;
use grammers_client::{Client, Config as ClientConfig, InitParams};
use grammers_mtsender::{FixedReconnect, ReconnectionPolicy};
use grammers_session::Session;
use log::{error, info, warn};
use simplelog::TermLogger;
use tokio_util::sync::CancellationToken;

use crate::batch::BatchAccumulator;
use crate::composer::Composer;
use crate::config::Config;
use crate::db::MongoStore;
use crate::delivery::Delivery;
use crate::finalizer::Finalizer;
use crate::ingest::IngestionWorker;
use crate::library::Library;
use crate::links::LinkBuilder;
use crate::poster::{OmdbPosters, PosterLookup, DEFAULT_OMDB_ENDPOINT};
use crate::server::AppState;
use crate::settings::SettingsCommands;
use crate::shortener::HttpShortener;
use crate::store::Store;
use crate::telegram::TelegramTransport;
use crate::transport::Transport;

mod batch;
mod bot;
mod command;
mod composer;
mod config;
mod db;
mod delivery;
mod error;
mod finalizer;
mod ingest;
mod library;
mod links;
mod models;
mod parser;
mod poster;
mod retry;
mod server;
mod settings;
mod shortener;
mod similarity;
mod store;
mod telegram;
mod timer;
mod transport;

#[cfg(test)]
mod testing;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenv().ok();
    let config = Config::from_env()?;

    // Initialize logging
    TermLogger::init(
        config.log_level,
        simplelog::ConfigBuilder::new()
            .set_time_format_rfc3339()
            .build(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )
    .context("error initializing termlogger")?;

    // Fill in the configuration and connect to Telegram
    static RECONNECTION_POLICY: &dyn ReconnectionPolicy = &FixedReconnect {
        attempts: 3,
        delay: Duration::from_secs(5),
    };
    let client = Client::connect(ClientConfig {
        api_id: config.api_id,
        api_hash: config.api_hash.clone(),
        session: Session::load_file_or_create(&config.session_file)?,
        params: InitParams {
            reconnection_policy: RECONNECTION_POLICY,
            ..Default::default()
        },
    })
    .await?;

    // Authorize as a bot if needed
    if !client.is_authorized().await? {
        info!("Not authorized, signing in");
        client.bot_sign_in(&config.bot_token).await?;
    }
    client.session().save_to_file(&config.session_file)?;

    let me = client.get_me().await?;
    let username = me.username().unwrap_or_default().to_string();
    info!("Signed in as @{}", username);

    let store: Arc<dyn Store> =
        Arc::new(MongoStore::connect(&config.mongo_uri, &config.database_name).await?);
    let telegram = Arc::new(TelegramTransport::new(client.clone(), me));
    let transport: Arc<dyn Transport> = telegram.clone();
    let links = LinkBuilder::new(&config.base_url, &username);

    let posters: Option<Arc<dyn PosterLookup>> = match &config.omdb_api_key {
        Some(key) => Some(Arc::new(OmdbPosters::new(key, DEFAULT_OMDB_ENDPOINT)?)),
        None => {
            warn!("OMDB_API_KEY is not set, posts will go out without posters");
            None
        }
    };
    let finalizer = Arc::new(Finalizer::new(
        store.clone(),
        transport.clone(),
        Composer::new(links.clone(), posters),
        config.send_delay,
    ));
    let accumulator = Arc::new(BatchAccumulator::new(finalizer, config.batch_debounce));

    let shutdown = CancellationToken::new();
    let (ingest_tx, ingest_rx) = ingest::queue();
    let worker = Arc::new(IngestionWorker::new(
        store.clone(),
        transport.clone(),
        accumulator.clone(),
    ));
    let worker_task = tokio::spawn({
        let worker = worker.clone();
        let shutdown = shutdown.clone();
        async move { worker.run(ingest_rx, shutdown).await }
    });

    let delivery = Delivery::new(
        store.clone(),
        transport.clone(),
        Arc::new(HttpShortener::new()?),
        links.clone(),
    );
    let settings = SettingsCommands::new(store.clone(), transport.clone(), config.admin_id);
    let library = Library::new(store.clone(), links.clone());
    let bot = Bot::new(
        client,
        telegram,
        store.clone(),
        delivery,
        settings,
        library,
        ingest_tx,
    );

    let state = AppState {
        store,
        transport,
        links,
    };

    // Run both the bot and HTTP server concurrently
    tokio::select! {
        _ = bot.run(shutdown.clone()) => {},
        result = server::serve(config.listen_addr, state, shutdown.clone()) => {
            if let Err(err) = result {
                error!("Web server stopped: {:#}", err);
            }
        },
    }

    shutdown.cancel();
    accumulator.shutdown();
    if let Err(err) = worker_task.await {
        error!("Ingestion worker did not stop cleanly: {}", err);
    }
    info!("Bye");
    Ok(())
}
