//! In-process [`RemoteStore`].
//!
//! Documents live in a `DashMap`; each key has a broadcast channel that fans
//! pushes out to subscribers. Delivery is at-most-once: a subscriber that
//! falls too far behind skips the pushes it missed and resumes with the next
//! one, which is harmless because every push carries the whole document.

use super::{DocumentStream, RemoteStore};
use crate::document::SessionDocument;
use crate::identity::SessionKey;
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    documents: DashMap<SessionKey, SessionDocument>,
    channels: DashMap<SessionKey, broadcast::Sender<Option<SessionDocument>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the stored document, without going through the trait.
    pub fn document(&self, key: &SessionKey) -> Option<SessionDocument> {
        self.inner.documents.get(key).map(|doc| doc.value().clone())
    }

    /// Delete the document and tell subscribers it is gone.
    pub fn remove(&self, key: &SessionKey) {
        self.inner.documents.remove(key);
        let _ = self.sender(key).send(None);
    }

    pub fn subscriber_count(&self, key: &SessionKey) -> usize {
        self.inner
            .channels
            .get(key)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    fn sender(&self, key: &SessionKey) -> broadcast::Sender<Option<SessionDocument>> {
        self.inner
            .channels
            .entry(key.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn write(&self, key: &SessionKey, document: &SessionDocument) -> Result<()> {
        self.inner.documents.insert(key.clone(), document.clone());
        // No subscribers is fine.
        let _ = self.sender(key).send(Some(document.clone()));
        Ok(())
    }

    async fn read(&self, key: &SessionKey) -> Result<Option<SessionDocument>> {
        Ok(self.document(key))
    }

    async fn subscribe(&self, key: &SessionKey) -> Result<DocumentStream> {
        // Subscribe before reading so no write can fall between the two.
        let rx = self.sender(key).subscribe();
        let current = self.document(key);
        let session = key.clone();

        let updates = stream::unfold(rx, move |mut rx| {
            let session = session.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(document) => return Some((document, rx)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(session = %session, skipped, "subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(stream::once(async move { current }).chain(updates).boxed())
    }
}
