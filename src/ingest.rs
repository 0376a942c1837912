//! Sequential worker that moves incoming media into the storage channels.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use futures::FutureExt;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::batch::BatchAccumulator;
use crate::links;
use crate::models::FileRecord;
use crate::retry::with_flood_retry;
use crate::store::Store;
use crate::transport::{IncomingFile, Transport};

#[derive(Debug, Clone)]
pub struct IngestJob {
    pub user_id: i64,
    pub file: IncomingFile,
}

pub type IngestSender = mpsc::UnboundedSender<IngestJob>;
pub type IngestReceiver = mpsc::UnboundedReceiver<IngestJob>;

pub fn queue() -> (IngestSender, IngestReceiver) {
    mpsc::unbounded_channel()
}

pub struct IngestionWorker {
    store: Arc<dyn Store>,
    transport: Arc<dyn Transport>,
    accumulator: Arc<BatchAccumulator>,
}

impl IngestionWorker {
    pub fn new(
        store: Arc<dyn Store>,
        transport: Arc<dyn Transport>,
        accumulator: Arc<BatchAccumulator>,
    ) -> Self {
        Self {
            store,
            transport,
            accumulator,
        }
    }

    /// Drain the queue one job at a time until it closes or `shutdown` fires.
    pub async fn run(&self, mut jobs: IngestReceiver, shutdown: CancellationToken) {
        info!("Ingestion worker started");
        loop {
            let job = tokio::select! {
                _ = shutdown.cancelled() => break,
                job = jobs.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let file_name = job.file.file_name.clone();
            let user_id = job.user_id;
            match AssertUnwindSafe(self.process(job)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!("Failed to ingest '{}' from user {}: {:#}", file_name, user_id, err)
                }
                Err(_) => error!("Ingesting '{}' from user {} panicked", file_name, user_id),
            }
        }
        info!("Ingestion worker stopped");
    }

    pub async fn process(&self, job: IngestJob) -> Result<()> {
        let IngestJob { user_id, file } = job;
        let Some(storage_channel) = self
            .store
            .get_owner_storage_channel()
            .await
            .context("loading storage channel")?
        else {
            bail!("no storage channel configured, dropping '{}'", file.file_name);
        };

        info!(
            "Storing '{}' ({}) from user {}",
            file.file_name,
            bytesize::to_string(file.file_size, true),
            user_id
        );

        let stored = with_flood_retry("copy_message", || {
            self.transport
                .copy_message(file.source, storage_channel, None, None)
        })
        .await
        .with_context(|| format!("copying to storage channel {}", storage_channel))?;

        let stream_channel = self
            .store
            .get_stream_channel()
            .await
            .context("loading stream channel")?;
        let streamed = match stream_channel {
            Some(stream_channel) if stream_channel != storage_channel => {
                match with_flood_retry("copy_message", || {
                    self.transport
                        .copy_message(file.source, stream_channel, None, None)
                })
                .await
                {
                    Ok(streamed) => streamed,
                    Err(err) => {
                        warn!(
                            "Copying '{}' to stream channel {} failed, streaming from storage: {}",
                            file.file_name, stream_channel, err
                        );
                        stored
                    }
                }
            }
            _ => stored,
        };

        let record = FileRecord {
            id: None,
            owner_id: user_id,
            file_unique_id: file.unique_id.clone(),
            file_id: stored.message_id,
            stream_id: streamed.message_id,
            file_name: file.file_name.clone(),
            file_size: file.file_size,
            raw_link: links::raw_link(stored.chat_id, stored.message_id),
            updated_at: Utc::now(),
        };
        self.store
            .upsert_file_record(&record)
            .await
            .context("saving file record")?;
        debug!("Saved record for '{}' ({})", record.file_name, record.file_unique_id);

        self.accumulator.on_arrival(user_id, record);
        Ok(())
    }
}
