//! Async driver for one client's session.
//!
//! ```text
//! EngineHandle ── Request ──┐
//!                           ▼
//!   remote events ──► Driver loop ──► SessionMachine (decides)
//!   (init + subscription)   │
//!   timers ─────────────────┤
//!                           ├──► writer task ──► RemoteStore::write
//!                           └──► watch::Sender<Projection>
//! ```
//!
//! All state changes happen on the single driver task, one event at a time.
//! Remote writes are queued to a writer task and never awaited by the driver,
//! so a failed or slow write leaves the local projection standing.

use crate::config::SessionConfig;
use crate::document::SessionDocument;
use crate::error::SyncError;
use crate::identity::SessionKey;
use crate::machine::{Intent, Outcome, Projection, RemoteEvent, SessionMachine};
use crate::store::{initialize_if_absent, RemoteStore};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

const REQUEST_CAPACITY: usize = 32;

pub struct EngineBuilder {
    store: Arc<dyn RemoteStore>,
    config: SessionConfig,
    key: Option<SessionKey>,
    client_id: Option<Uuid>,
}

impl EngineBuilder {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            config: SessionConfig::default(),
            key: None,
            client_id: None,
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Session to join. Defaults to the configured default key.
    pub fn with_session_key(mut self, key: SessionKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_client_id(mut self, client_id: Uuid) -> Self {
        self.client_id = Some(client_id);
        self
    }

    pub fn build(self) -> Engine {
        let key = self
            .key
            .unwrap_or_else(|| SessionKey::new(self.config.default_key.clone()));
        Engine {
            store: self.store,
            config: self.config,
            key,
            client_id: self.client_id.unwrap_or_else(Uuid::new_v4),
        }
    }
}

pub struct Engine {
    store: Arc<dyn RemoteStore>,
    config: SessionConfig,
    key: SessionKey,
    client_id: Uuid,
}

impl Engine {
    /// Spawn the driver, writer and sync tasks. Must run inside a Tokio
    /// runtime.
    pub fn start(self) -> EngineHandle {
        let mut machine = SessionMachine::new(&self.config, self.client_id);
        machine.begin();

        let (projection_tx, projection_rx) = watch::channel(machine.projection());
        let (request_tx, request_rx) = mpsc::channel(REQUEST_CAPACITY);
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        let (write_tx, write_rx) = mpsc::unbounded_channel();

        let span = tracing::info_span!("session", key = %self.key, client = %self.client_id);

        tokio::spawn(
            write_loop(self.store.clone(), self.key.clone(), write_rx).instrument(span.clone()),
        );
        let sync = tokio::spawn(
            sync_remote(
                self.store.clone(),
                self.key.clone(),
                machine.fresh_document(),
                remote_tx,
            )
            .instrument(span.clone()),
        );

        let driver = Driver {
            machine,
            writes: write_tx,
            projection: projection_tx,
            celebration_timeout: self.config.celebration_timeout(),
        };
        let task = tokio::spawn(
            driver
                .run(request_rx, remote_rx, sync, self.config.startup_timeout())
                .instrument(span),
        );

        info!(session = %self.key, client = %self.client_id, "session engine started");
        EngineHandle {
            key: self.key,
            client_id: self.client_id,
            requests: request_tx,
            projection: projection_rx,
            task,
        }
    }
}

enum Request {
    Intent(Intent, oneshot::Sender<Outcome>),
    Shutdown,
}

/// Presentation-facing side of a running engine.
pub struct EngineHandle {
    key: SessionKey,
    client_id: Uuid,
    requests: mpsc::Sender<Request>,
    projection: watch::Receiver<Projection>,
    task: JoinHandle<()>,
}

impl EngineHandle {
    pub fn session_key(&self) -> &SessionKey {
        &self.key
    }

    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    pub fn projection(&self) -> Projection {
        self.projection.borrow().clone()
    }

    /// Receiver that changes whenever the projection does.
    pub fn watch(&self) -> watch::Receiver<Projection> {
        self.projection.clone()
    }

    pub async fn wait_until_ready(&self) -> Result<Projection, SyncError> {
        let mut rx = self.projection.clone();
        let ready = rx
            .wait_for(|p| !p.is_awaiting_remote())
            .await
            .map_err(|_| SyncError::Closed)?;
        Ok(Projection::clone(&ready))
    }

    pub async fn request_draw(&self) -> Result<Outcome, SyncError> {
        self.request(Intent::Draw).await
    }

    pub async fn request_undo(&self) -> Result<Outcome, SyncError> {
        self.request(Intent::Undo).await
    }

    pub async fn request_reset(&self) -> Result<Outcome, SyncError> {
        self.request(Intent::Reset).await
    }

    pub async fn dismiss_selection(&self) -> Result<Outcome, SyncError> {
        self.request(Intent::Dismiss).await
    }

    pub async fn request(&self, intent: Intent) -> Result<Outcome, SyncError> {
        let (reply, outcome) = oneshot::channel();
        self.requests
            .send(Request::Intent(intent, reply))
            .await
            .map_err(|_| SyncError::Closed)?;
        outcome.await.map_err(|_| SyncError::Closed)
    }

    /// Stop the driver and drop the subscription. Queued writes still flush.
    pub async fn shutdown(self) {
        let _ = self.requests.send(Request::Shutdown).await;
        if let Err(err) = self.task.await {
            warn!(error = %err, "session driver ended abnormally");
        }
    }
}

struct Driver {
    machine: SessionMachine,
    writes: mpsc::UnboundedSender<SessionDocument>,
    projection: watch::Sender<Projection>,
    celebration_timeout: Duration,
}

impl Driver {
    async fn run(
        mut self,
        mut requests: mpsc::Receiver<Request>,
        mut remote: mpsc::UnboundedReceiver<RemoteEvent>,
        sync: JoinHandle<()>,
        startup_timeout: Duration,
    ) {
        let startup = time::sleep(startup_timeout);
        tokio::pin!(startup);
        let celebration = time::sleep(Duration::ZERO);
        tokio::pin!(celebration);
        let mut celebration_epoch = self.machine.celebration_epoch();

        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(Request::Intent(intent, reply)) => {
                        let outcome = self.apply(intent);
                        let _ = reply.send(outcome);
                    }
                    Some(Request::Shutdown) | None => break,
                },
                Some(event) = remote.recv() => self.machine.handle_remote(event),
                () = &mut startup, if self.machine.startup_timer_armed() => {
                    self.machine.startup_timed_out();
                }
                () = &mut celebration, if self.machine.celebrating() => {
                    self.machine.dismiss();
                    debug!("celebration auto-dismissed");
                }
            }

            // A new selection restarts the celebration timer.
            if self.machine.celebration_epoch() != celebration_epoch {
                celebration_epoch = self.machine.celebration_epoch();
                celebration
                    .as_mut()
                    .reset(Instant::now() + self.celebration_timeout);
            }
            self.publish();
        }

        sync.abort();
        debug!("session driver stopped");
    }

    fn apply(&mut self, intent: Intent) -> Outcome {
        let decision = self.machine.handle_intent(intent);
        if let Some(document) = decision.push {
            if self.writes.send(document).is_err() {
                warn!("writer task gone; change stays local");
            }
        }
        decision.outcome
    }

    fn publish(&self) {
        let next = self.machine.projection();
        self.projection.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

/// Writes run in order, one at a time. Failures are logged and dropped.
async fn write_loop(
    store: Arc<dyn RemoteStore>,
    key: SessionKey,
    mut documents: mpsc::UnboundedReceiver<SessionDocument>,
) {
    while let Some(document) = documents.recv().await {
        match store.write(&key, &document).await {
            Ok(()) => debug!(revision = document.revision, "pushed session document"),
            Err(err) => {
                let err = SyncError::remote("write", &err);
                warn!(revision = document.revision, error = %err, "push failed; keeping local projection");
            }
        }
    }
}

/// Initialize the session if needed, then forward every push.
///
/// Subscribing only after initialization keeps a transient "absent" read
/// from being taken as final.
async fn sync_remote(
    store: Arc<dyn RemoteStore>,
    key: SessionKey,
    fresh: SessionDocument,
    events: mpsc::UnboundedSender<RemoteEvent>,
) {
    let init = match initialize_if_absent(store.as_ref(), &key, &fresh).await {
        Ok(created) => RemoteEvent::InitCompleted { created },
        Err(err) => RemoteEvent::Failed(SyncError::remote("initialize", &err)),
    };
    if events.send(init).is_err() {
        return;
    }

    let mut pushes = match store.subscribe(&key).await {
        Ok(pushes) => pushes,
        Err(err) => {
            let _ = events.send(RemoteEvent::Failed(SyncError::remote("subscribe", &err)));
            return;
        }
    };
    while let Some(document) = pushes.next().await {
        if events.send(RemoteEvent::Pushed(document)).is_err() {
            break;
        }
    }
    debug!("subscription ended");
}
