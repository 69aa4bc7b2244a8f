//! Testing utilities for spinsync.
//!
//! - [`FlakyStore`] wraps any [`RemoteStore`] and can fail or stall reads,
//!   writes and subscriptions on demand, while recording every write.
//! - [`wait_for`] and [`next_change`] wait on an engine's projection with a
//!   timeout instead of sleeping.

use anyhow::{bail, Result};
use async_trait::async_trait;
use spinsync::{
    DocumentStream, EngineHandle, Projection, RemoteStore, SessionDocument, SessionKey,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How a wrapped operation should misbehave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fault {
    #[default]
    None,
    /// Return an error immediately.
    Fail,
    /// Never complete.
    Hang,
}

#[derive(Default)]
struct Faults {
    read: Mutex<Fault>,
    write: Mutex<Fault>,
    subscribe: Mutex<Fault>,
}

/// A [`RemoteStore`] wrapper with switchable faults and a write log.
#[derive(Clone)]
pub struct FlakyStore {
    inner: Arc<dyn RemoteStore>,
    faults: Arc<Faults>,
    writes: Arc<Mutex<Vec<(SessionKey, SessionDocument)>>>,
    paused: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn RemoteStore>) -> Self {
        Self {
            inner,
            faults: Arc::new(Faults::default()),
            writes: Arc::new(Mutex::new(Vec::new())),
            paused: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_read_fault(&self, fault: Fault) {
        *self.faults.read.lock().unwrap() = fault;
    }

    pub fn set_write_fault(&self, fault: Fault) {
        *self.faults.write.lock().unwrap() = fault;
    }

    pub fn set_subscribe_fault(&self, fault: Fault) {
        *self.faults.subscribe.lock().unwrap() = fault;
    }

    /// Make every operation hang until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Writes that reached the inner store, in order.
    pub fn writes(&self) -> Vec<(SessionKey, SessionDocument)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }

    async fn gate(&self, fault: &Mutex<Fault>, operation: &str) -> Result<()> {
        while self.paused.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let fault = *fault.lock().unwrap();
        match fault {
            Fault::None => Ok(()),
            Fault::Fail => bail!("injected {operation} failure"),
            Fault::Hang => futures::future::pending().await,
        }
    }
}

#[async_trait]
impl RemoteStore for FlakyStore {
    async fn write(&self, key: &SessionKey, document: &SessionDocument) -> Result<()> {
        self.gate(&self.faults.write, "write").await?;
        self.inner.write(key, document).await?;
        self.writes
            .lock()
            .unwrap()
            .push((key.clone(), document.clone()));
        Ok(())
    }

    async fn read(&self, key: &SessionKey) -> Result<Option<SessionDocument>> {
        self.gate(&self.faults.read, "read").await?;
        self.inner.read(key).await
    }

    async fn subscribe(&self, key: &SessionKey) -> Result<DocumentStream> {
        self.gate(&self.faults.subscribe, "subscribe").await?;
        self.inner.subscribe(key).await
    }
}

/// Default wait used by the helpers.
pub const WAIT: Duration = Duration::from_secs(2);

/// Wait until the projection satisfies `predicate`, or fail after `WAIT`.
pub async fn wait_for<F>(handle: &EngineHandle, predicate: F) -> Result<Projection>
where
    F: FnMut(&Projection) -> bool,
{
    let mut rx = handle.watch();
    let matched = match tokio::time::timeout(WAIT, rx.wait_for(predicate)).await {
        Ok(Ok(projection)) => Projection::clone(&projection),
        Ok(Err(_)) => bail!("engine shut down while waiting"),
        Err(_) => bail!(
            "projection never matched; last seen {:?}",
            handle.projection()
        ),
    };
    Ok(matched)
}

/// Wait for the next projection change and return it.
pub async fn next_change(handle: &EngineHandle) -> Result<Projection> {
    let mut rx = handle.watch();
    rx.borrow_and_update();
    match tokio::time::timeout(WAIT, rx.changed()).await {
        Ok(Ok(())) => {
            let changed = Projection::clone(&rx.borrow());
            Ok(changed)
        }
        Ok(Err(_)) => bail!("engine shut down while waiting"),
        Err(_) => bail!("no projection change within {WAIT:?}"),
    }
}

/// Let spawned tasks run until they block.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spinsync::{MemoryStore, Roster};

    #[tokio::test]
    async fn failing_write_is_not_recorded() {
        let store = FlakyStore::new(Arc::new(MemoryStore::new()));
        let key = SessionKey::new("k");
        let doc = SessionDocument::fresh(&Roster::default());

        store.set_write_fault(Fault::Fail);
        assert!(store.write(&key, &doc).await.is_err());
        assert_eq!(store.write_count(), 0);

        store.set_write_fault(Fault::None);
        store.write(&key, &doc).await.unwrap();
        assert_eq!(store.writes(), vec![(key.clone(), doc.clone())]);
        assert_eq!(store.read(&key).await.unwrap(), Some(doc));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_read_never_completes() {
        let store = FlakyStore::new(Arc::new(MemoryStore::new()));
        store.set_read_fault(Fault::Hang);
        let key = SessionKey::new("k");
        let read = store.read(&key);
        assert!(tokio::time::timeout(Duration::from_secs(60), read)
            .await
            .is_err());
    }
}
