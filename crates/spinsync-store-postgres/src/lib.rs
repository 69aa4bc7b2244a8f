//! PostgreSQL implementation of the spinsync [`RemoteStore`].
//!
//! Each session is one row holding the whole document as JSONB. Writes are
//! unconditional upserts, so the last write wins exactly as with any other
//! store. Every write also raises a `NOTIFY` carrying the session key;
//! subscribers `LISTEN` on the channel and re-read the row when their key
//! comes by.
//!
//! # Database Schema
//!
//! ```sql
//! CREATE TABLE spinsync_sessions (
//!     key TEXT PRIMARY KEY,
//!     document JSONB NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! ```
//!
//! [`PgSessionStore::migrate`] creates it if missing.
//!
//! # Usage
//!
//! ```rust,ignore
//! use spinsync_store_postgres::PgSessionStore;
//! use sqlx::PgPool;
//!
//! let pool = PgPool::connect("postgres://localhost/wheel").await?;
//! let store = PgSessionStore::new(pool);
//! store.migrate().await?;
//!
//! let handle = EngineBuilder::new(Arc::new(store)).build().start();
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use spinsync::{DocumentStream, RemoteStore, SessionDocument, SessionKey};
use sqlx::postgres::PgListener;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tokio::sync::mpsc;

/// Default `LISTEN/NOTIFY` channel.
pub const DEFAULT_CHANNEL: &str = "spinsync_sessions";

/// PostgreSQL session store.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
    channel: String,
}

impl PgSessionStore {
    /// Create a store notifying on [`DEFAULT_CHANNEL`].
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            channel: DEFAULT_CHANNEL.to_string(),
        }
    }

    /// Create a store with a custom notification channel, e.g. to keep
    /// several deployments on one database apart.
    pub fn with_channel(pool: PgPool, channel: impl Into<String>) -> Self {
        Self {
            pool,
            channel: channel.into(),
        }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Create the sessions table if it does not exist.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS spinsync_sessions (
                key TEXT PRIMARY KEY,
                document JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("create spinsync_sessions")?;
        Ok(())
    }
}

/// Decode a stored JSONB value, tolerating missing fields.
fn decode_document(value: serde_json::Value) -> Result<SessionDocument> {
    Ok(SessionDocument::from_value(value)?)
}

/// Whether a notification payload concerns `key`.
fn concerns(payload: &str, key: &SessionKey) -> bool {
    payload == key.as_str()
}

async fn fetch(pool: &PgPool, key: &SessionKey) -> Result<Option<SessionDocument>> {
    let row = sqlx::query("SELECT document FROM spinsync_sessions WHERE key = $1")
        .bind(key.as_str())
        .fetch_optional(pool)
        .await
        .with_context(|| format!("read session {key}"))?;

    row.map(|row| -> Result<SessionDocument> {
        let Json(value): Json<serde_json::Value> = row.try_get("document")?;
        decode_document(value)
    })
    .transpose()
}

#[async_trait]
impl RemoteStore for PgSessionStore {
    /// Upsert the document and notify listeners in one transaction, so the
    /// notification is only delivered once the row is visible.
    async fn write(&self, key: &SessionKey, document: &SessionDocument) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO spinsync_sessions (key, document, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE
            SET document = EXCLUDED.document,
                updated_at = NOW()
            "#,
        )
        .bind(key.as_str())
        .bind(Json(document))
        .execute(&mut *tx)
        .await
        .with_context(|| format!("write session {key}"))?;

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(&self.channel)
            .bind(key.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn read(&self, key: &SessionKey) -> Result<Option<SessionDocument>> {
        fetch(&self.pool, key).await
    }

    /// Listen for notifications and forward the re-read document for `key`.
    ///
    /// The current document is sent first. The listener task ends when the
    /// returned stream is dropped.
    async fn subscribe(&self, key: &SessionKey) -> Result<DocumentStream> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .context("connect listener")?;
        listener
            .listen(&self.channel)
            .await
            .with_context(|| format!("listen on {}", self.channel))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let current = fetch(&self.pool, key).await?;
        let _ = tx.send(current);

        let pool = self.pool.clone();
        let key = key.clone();
        tokio::spawn(async move {
            loop {
                let notification = tokio::select! {
                    _ = tx.closed() => break,
                    received = listener.recv() => received,
                };
                match notification {
                    Ok(notification) if concerns(notification.payload(), &key) => {
                        match fetch(&pool, &key).await {
                            Ok(document) => {
                                if tx.send(document).is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                tracing::warn!(session = %key, error = %format!("{err:#}"), "re-read after notify failed");
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        // PgListener reconnects on the next recv.
                        tracing::warn!(session = %key, error = %err, "listener error");
                    }
                }
            }
            tracing::debug!(session = %key, "listener stopped");
        });

        let pushes = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|document| (document, rx))
        });
        Ok(pushes.boxed())
    }
}

/// Utility functions for session maintenance.
impl PgSessionStore {
    /// All sessions with their last write time, most recent first.
    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT key, updated_at
            FROM spinsync_sessions
            ORDER BY updated_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| SessionSummary {
                key: SessionKey::new(row.get::<String, _>("key")),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    /// Delete sessions nobody has written to since `older_than`.
    pub async fn delete_stale(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM spinsync_sessions
            WHERE updated_at < $1
            "#,
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

/// One row of [`PgSessionStore::list_sessions`].
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub key: SessionKey,
    pub updated_at: DateTime<Utc>,
}
