//! Groups freshly stored files into per-user batches keyed by title.
//!
//! Every arrival for a key restarts that batch's debounce timer. The batch is
//! handed to a [`BatchSink`] only after a full quiet interval.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, info, warn};

use crate::models::FileRecord;
use crate::parser;
use crate::timer::{self, TimerHandle};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(7);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchKey {
    pub user_id: i64,
    pub title_key: String,
}

/// Files waiting for their batch's timer.
#[derive(Debug)]
struct OpenBatch {
    files: Vec<FileRecord>,
    /// Bumped on every arrival so a superseded timer cannot close the batch.
    generation: u64,
    timer: TimerHandle,
}

/// A batch whose quiet period elapsed, files in arrival order.
#[derive(Debug, Clone)]
pub struct ClosedBatch {
    pub key: BatchKey,
    pub files: Vec<FileRecord>,
}

/// Receives batches once they settle.
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn finalize(&self, batch: ClosedBatch);
}

pub struct BatchAccumulator {
    batches: Arc<DashMap<BatchKey, OpenBatch>>,
    generations: AtomicU64,
    debounce: Duration,
    sink: Arc<dyn BatchSink>,
}

impl BatchAccumulator {
    pub fn new(sink: Arc<dyn BatchSink>, debounce: Duration) -> Self {
        Self {
            batches: Arc::new(DashMap::new()),
            generations: AtomicU64::new(0),
            debounce,
            sink,
        }
    }

    /// Add a stored file to its batch and restart that batch's timer.
    ///
    /// Returns the batch key, or `None` when no title key could be derived.
    pub fn on_arrival(&self, user_id: i64, file: FileRecord) -> Option<BatchKey> {
        let Some(title_key) = parser::title_key(&file.file_name) else {
            warn!(
                "No title key for '{}' from user {}, not batching it",
                file.file_name, user_id
            );
            return None;
        };
        let key = BatchKey {
            user_id,
            title_key,
        };
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;

        // The entry guard keeps this key locked until the new timer is stored.
        match self.batches.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let batch = entry.get_mut();
                batch.timer.cancel();
                batch.files.push(file);
                batch.generation = generation;
                batch.timer = self.schedule_close(key.clone(), generation);
                debug!(
                    "Batch '{}' for user {} now has {} files",
                    key.title_key,
                    user_id,
                    batch.files.len()
                );
            }
            Entry::Vacant(entry) => {
                info!("Opened batch '{}' for user {}", key.title_key, user_id);
                entry.insert(OpenBatch {
                    files: vec![file],
                    generation,
                    timer: self.schedule_close(key.clone(), generation),
                });
            }
        }
        Some(key)
    }

    fn schedule_close(&self, key: BatchKey, generation: u64) -> TimerHandle {
        let batches = Arc::clone(&self.batches);
        let sink = Arc::clone(&self.sink);
        timer::schedule(self.debounce, async move {
            let Some((key, batch)) =
                batches.remove_if(&key, |_, batch| batch.generation == generation)
            else {
                debug!("Batch '{}' already closed or superseded", key.title_key);
                return;
            };
            if batch.files.is_empty() {
                return;
            }
            info!(
                "Closing batch '{}' for user {} with {} files",
                key.title_key,
                key.user_id,
                batch.files.len()
            );
            sink.finalize(ClosedBatch {
                key,
                files: batch.files,
            })
            .await;
        })
    }

    pub fn open_batches(&self) -> usize {
        self.batches.len()
    }

    /// Number of files waiting in the batch for `key`, if it is open.
    #[cfg(test)]
    pub fn pending_files(&self, key: &BatchKey) -> Option<usize> {
        self.batches.get(key).map(|batch| batch.files.len())
    }

    /// Cancel every pending timer and drop the open batches. The files stay stored.
    pub fn shutdown(&self) {
        let pending = self.open_batches();
        self.batches.retain(|_, batch| {
            batch.timer.cancel();
            false
        });
        if pending > 0 {
            warn!("Dropped {} open batches on shutdown", pending);
        }
    }
}
