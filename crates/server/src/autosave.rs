// Autosave coordinator: coalesces rapid edits into one write per document.
//
// Each document holds at most one pending snapshot and one armed timer.
// Every edit overwrites the snapshot and re-arms the timer; when the quiet
// period passes without another edit the latest snapshot is persisted.
// Failures leave the snapshot pending for the next edit to retry. Writes of
// one document never overlap.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::events::{DocEvent, EventBus};
use crate::store::{DocumentStore, StoreError};

#[derive(Debug)]
struct PendingSave {
    user_id: String,
    content: String,
    /// Bumped on every edit; a finished write only clears the record when
    /// no newer edit arrived while it was in flight.
    generation: u64,
    timer: Option<JoinHandle<()>>,
    /// Held for the duration of a write of this document.
    writing: Arc<Mutex<()>>,
}

struct AutosaveInner<S> {
    store: Arc<S>,
    events: EventBus,
    quiet_period: Duration,
    pending: Mutex<HashMap<String, PendingSave>>,
}

pub struct AutosaveCoordinator<S> {
    inner: Arc<AutosaveInner<S>>,
}

impl<S> Clone for AutosaveCoordinator<S> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<S: DocumentStore> AutosaveCoordinator<S> {
    pub fn new(store: Arc<S>, events: EventBus, quiet_period: Duration) -> Self {
        Self {
            inner: Arc::new(AutosaveInner {
                store,
                events,
                quiet_period,
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn quiet_period(&self) -> Duration {
        self.inner.quiet_period
    }

    /// Overwrite the pending snapshot for `document_id` and restart its timer.
    pub async fn record_edit(&self, user_id: &str, document_id: &str, content: &str) {
        let mut pending = self.inner.pending.lock().await;
        let entry = pending.entry(document_id.to_string()).or_insert_with(|| PendingSave {
            user_id: String::new(),
            content: String::new(),
            generation: 0,
            timer: None,
            writing: Arc::new(Mutex::new(())),
        });

        entry.user_id = user_id.to_string();
        entry.content = content.to_string();
        entry.generation += 1;
        if let Some(timer) = entry.timer.take() {
            timer.abort();
        }

        let inner = Arc::clone(&self.inner);
        let document = document_id.to_string();
        let generation = entry.generation;
        entry.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(inner.quiet_period).await;
            let _ = inner.persist(&document, Some(generation)).await;
        }));

        debug!(document_id = %document_id, generation, "autosave armed");
    }

    /// Persist the pending snapshot for `document_id` now. Returns `false`
    /// when nothing was pending.
    pub async fn flush(&self, document_id: &str) -> Result<bool, StoreError> {
        {
            let mut pending = self.inner.pending.lock().await;
            let Some(entry) = pending.get_mut(document_id) else {
                return Ok(false);
            };
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
        }
        self.inner.persist(document_id, None).await
    }

    /// Persist every pending snapshot. Failures are logged and counted out;
    /// returns the number of documents written.
    pub async fn flush_all(&self) -> usize {
        let document_ids: Vec<String> = self.inner.pending.lock().await.keys().cloned().collect();
        let mut saved = 0;
        for document_id in document_ids {
            match self.flush(&document_id).await {
                Ok(true) => saved += 1,
                Ok(false) => {}
                Err(error) => {
                    warn!(document_id = %document_id, error = %error, "flush failed");
                }
            }
        }
        info!(saved, "autosave flushed");
        saved
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.pending.lock().await.len()
    }

    pub async fn has_pending(&self, document_id: &str) -> bool {
        self.inner.pending.lock().await.contains_key(document_id)
    }

    /// Content not yet persisted for `document_id`, if any.
    pub async fn pending_content(&self, document_id: &str) -> Option<String> {
        self.inner.pending.lock().await.get(document_id).map(|entry| entry.content.clone())
    }
}

impl<S: DocumentStore> AutosaveInner<S> {
    /// Write whatever is pending for `document_id`. With `expected` set,
    /// only proceed if the record is still at that generation. Waits for a
    /// write already in flight and skips the record if that write settled it.
    async fn persist(&self, document_id: &str, expected: Option<u64>) -> Result<bool, StoreError> {
        let writing = {
            let pending = self.pending.lock().await;
            let Some(entry) = pending.get(document_id) else {
                return Ok(false);
            };
            if expected.is_some_and(|generation| generation != entry.generation) {
                return Ok(false);
            }
            Arc::clone(&entry.writing)
        };
        let _write = writing.lock().await;

        let (user_id, content, generation) = {
            let mut pending = self.pending.lock().await;
            let Some(entry) = pending.get_mut(document_id) else {
                debug!(document_id = %document_id, "pending content saved by an earlier write");
                return Ok(false);
            };
            if expected.is_some_and(|generation| generation != entry.generation) {
                return Ok(false);
            }
            entry.timer = None;
            (entry.user_id.clone(), entry.content.clone(), entry.generation)
        };

        match self.store.persist_content(document_id, &user_id, &content).await {
            Ok(record) => {
                {
                    let mut pending = self.pending.lock().await;
                    if pending.get(document_id).is_some_and(|entry| entry.generation == generation) {
                        pending.remove(document_id);
                    }
                }
                info!(
                    document_id = %document_id,
                    user_id = %user_id,
                    bytes = content.len(),
                    "document autosaved"
                );
                self.events.publish(DocEvent::Saved {
                    document_id: document_id.to_string(),
                    user_id,
                    saved_at: record.updated_at.unwrap_or_else(Utc::now),
                });
                Ok(true)
            }
            Err(error) => {
                warn!(document_id = %document_id, error = %error, "autosave failed, keeping pending content");
                self.events.publish(DocEvent::SaveFailed {
                    document_id: document_id.to_string(),
                    error: error.to_string(),
                });
                Err(error)
            }
        }
    }
}
