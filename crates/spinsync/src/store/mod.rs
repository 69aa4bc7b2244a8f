//! Remote session store interface.
//!
//! The store is a keyed document store with whole-document overwrite and
//! push subscriptions. It is the only shared mutable resource between
//! clients; there are no locks and no compare-and-swap, so the last write to
//! reach the store wins.

mod memory;

pub use memory::MemoryStore;

use crate::document::SessionDocument;
use crate::identity::SessionKey;
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Stream of pushes for one key. `None` items mean the document is absent.
/// Dropping the stream unsubscribes.
pub type DocumentStream = BoxStream<'static, Option<SessionDocument>>;

#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Overwrite the document stored under `key`.
    async fn write(&self, key: &SessionKey, document: &SessionDocument) -> Result<()>;

    async fn read(&self, key: &SessionKey) -> Result<Option<SessionDocument>>;

    /// Subscribe to every change of `key`, including the subscriber's own
    /// writes. The current value is delivered first.
    async fn subscribe(&self, key: &SessionKey) -> Result<DocumentStream>;
}

/// Read the session and create it if it is absent or was never initialized.
///
/// This is the only path that creates session content. Returns whether a
/// fresh document was written.
pub async fn initialize_if_absent(
    store: &dyn RemoteStore,
    key: &SessionKey,
    fresh: &SessionDocument,
) -> Result<bool> {
    match store.read(key).await? {
        Some(existing) if existing.initialized => {
            tracing::debug!(session = %key, revision = existing.revision, "joined existing session");
            Ok(false)
        }
        _ => {
            store.write(key, fresh).await?;
            tracing::info!(session = %key, "created session");
            Ok(true)
        }
    }
}
