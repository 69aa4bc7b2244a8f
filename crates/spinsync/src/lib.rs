//! # Spinsync
//!
//! Shared elimination wheels: many clients draw unique items from one fixed
//! roster, and every draw is mirrored to every connected client through a
//! single remote document.
//!
//! ## Core Concepts
//!
//! - [`SessionDocument`] = the whole shared state, always written in full
//! - [`SessionMachine`] = pure decisions (draw, undo, reset, remote pushes)
//! - [`RemoteStore`] = the only shared resource (`read`, `write`, `subscribe`)
//! - [`EngineHandle`] = what a presentation layer talks to
//!
//! ## Architecture
//!
//! ```text
//! Presentation
//!     │ request_draw() / request_undo() / request_reset() / dismiss_selection()
//!     ▼
//! EngineHandle ──► Driver loop ──► SessionMachine.decide
//!                     ▲   │
//!     push (watch) ◄──┘   └──► writer task ──► RemoteStore.write ──┐
//!                     ▲                                            │
//!                     └────────── RemoteStore.subscribe ◄──────────┘
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Fixed roster** - Wheel order never changes; drawn items are tracked
//!    separately, most recent first
//! 2. **Drawn ⊆ roster** - No duplicates, never larger than the roster
//! 3. **Whole-document writes** - No partial updates; the last write wins
//! 4. **Create once** - Only read-then-initialize-if-absent creates a session,
//!    and the subscription starts after it
//! 5. **Local undo** - Undo records never leave the client; any foreign push
//!    clears them
//! 6. **Never blocked** - If the store stays silent past the startup timeout,
//!    the client seeds the default roster locally and carries on
//!
//! ## Guarantees
//!
//! - **Last write wins**: two clients drawing from the same stale projection
//!   both push; whichever write lands last is what everyone converges on
//! - **No retries**: a failed write is logged and the local projection stands
//! - **At-most-once pushes**: a lagging subscriber skips to the latest document
//!
//! ## Example
//!
//! ```ignore
//! use spinsync::{EngineBuilder, MemoryKeyStore, MemoryStore, SessionConfig, SessionIdentityResolver};
//! use std::sync::Arc;
//!
//! let key = SessionIdentityResolver::new(Arc::new(MemoryKeyStore::default()))
//!     .resolve(Some("friday-night"));
//!
//! let handle = EngineBuilder::new(Arc::new(MemoryStore::new()))
//!     .with_config(SessionConfig::default())
//!     .with_session_key(key)
//!     .build()
//!     .start();
//!
//! handle.wait_until_ready().await?;
//! if let Some(selection) = handle.request_draw().await?.selection() {
//!     println!("drew {}", selection.identifier);
//! }
//! ```

mod config;
mod document;
mod engine;
mod error;
mod identity;
mod machine;
mod roster;

pub mod store;

pub use crate::config::{SessionConfig, DEFAULT_CELEBRATION_TIMEOUT, DEFAULT_STARTUP_TIMEOUT};

pub use crate::document::{Selection, SessionDocument};

pub use crate::error::{ConfigError, ErrorKind, NoOpReason, SyncError};

pub use crate::identity::{
    session_param_from_query, KeyStore, MemoryKeyStore, SessionIdentityResolver, SessionKey,
    DEFAULT_SESSION_KEY, SESSION_PARAM,
};

pub use crate::machine::{
    Decision, Intent, Outcome, Phase, Projection, RemoteEvent, SessionMachine, UndoRecord,
};

pub use crate::roster::{
    undrawn, DrawPolicy, ImageCatalog, Roster, SpinPlan, DEFAULT_PLACEHOLDER_IMAGE,
    DEFAULT_ROSTER,
};

pub use crate::store::{initialize_if_absent, DocumentStream, MemoryStore, RemoteStore};

pub use crate::engine::{Engine, EngineBuilder, EngineHandle};

// Re-export commonly used external types
pub use async_trait::async_trait;
