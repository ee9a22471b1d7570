//! Lectern Core - shared library for the Lectern media server.
//!
//! Lectern exposes an audiobook library to remote controllers (car
//! head-units, voice assistants, watches): a browsable content tree, a
//! single playback session they can drive, and the arbitration of the
//! shared audio output with other sources on the host.
//!
//! # Architecture
//!
//! - [`library`]: Repository trait for catalog records, plus an in-memory store
//! - [`catalog`]: Prefix-typed node ids and the content tree builder
//! - [`artwork`]: Bounded decoding and re-encoding of cover art
//! - [`engine`]: Playback engine trait and a headless clock implementation
//! - [`services`]: Playback session, focus arbitration, command routing, browse
//! - [`events`]: Event system for real-time controller updates
//! - [`api`]: HTTP, SSE and WebSocket surface
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! The host supplies the collaborators the core does not own:
//!
//! - [`LibraryRepository`](library::LibraryRepository): catalog storage
//! - [`PlaybackEngine`](engine::PlaybackEngine): audio output
//! - [`FocusBroker`](services::FocusBroker): shared audio output arbitration
//! - [`TaskSpawner`](runtime::TaskSpawner): spawning background tasks
//! - [`EventEmitter`](events::EventEmitter): receiving domain events
//!
//! Each has an implementation suitable for the standalone server.

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod artwork;
pub mod auth;
pub mod bootstrap;
pub mod catalog;
pub mod engine;
pub mod error;
pub mod events;
pub mod library;
pub mod protocol_constants;
pub mod runtime;
pub mod services;
pub mod state;
pub mod utils;

#[cfg(test)]
mod test_support;

// Re-export commonly used types at the crate root
pub use artwork::{Artwork, ArtworkTranscoder, RasterImage};
pub use auth::{AuthorizedCaller, CallerAllowList, CallerIdentity};
pub use catalog::{CatalogNode, ContentTreeBuilder, NodeId, NodeKind, Page};
pub use engine::{EngineError, EngineEvent, HeadlessEngine, PlaybackEngine};
pub use error::{ErrorCode, LecternError, LecternResult};
pub use events::{BroadcastEvent, BroadcastEventBridge, EventEmitter, FocusEvent, PlaybackEvent};
pub use library::{InMemoryLibrary, ItemRecord, LibraryError, LibraryRepository};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use state::Config;
pub use utils::now_millis;

// Re-export service types
pub use services::{
    CommandRouter, FocusBroker, FocusChange, LocalFocusBroker, PlaybackSession, PlaybackSnapshot,
    PlaybackState, RemoteCommand, SessionHandle,
};

// Re-export bootstrap types
pub use bootstrap::{bootstrap_services, BootstrappedServices, HostServices};

// Re-export API types
pub use api::{start_server, AppState, AppStateBuilder, ServerError, WsConnectionManager};
