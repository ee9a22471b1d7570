//! Playback engine abstraction.
//!
//! The session drives audio through [`PlaybackEngine`] and never decodes
//! anything itself. Hosts with a real decoder implement the trait;
//! [`HeadlessEngine`] tracks transport state and a playhead clock for the
//! standalone server.

mod headless;

pub use headless::HeadlessEngine;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors raised by a playback engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The source to load does not exist.
    #[error("Source missing: {0}")]
    SourceMissing(String),

    /// A transport command arrived before anything was loaded.
    #[error("Nothing loaded")]
    NotLoaded,
}

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Events reported by the engine, independent of session commands.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Periodic or edge-triggered transport report.
    Progress { playing: bool, position_ms: u64 },
    /// Terminal failure of the current source.
    Failed { message: String },
}

/// Controllable audio output.
#[async_trait]
pub trait PlaybackEngine: Send + Sync {
    /// Loads `uri` and positions it at `start_position_ms`, ready to play.
    ///
    /// Resolves once the engine can start without further buffering.
    async fn load(&self, uri: &str, start_position_ms: u64) -> EngineResult<()>;

    async fn play(&self) -> EngineResult<()>;

    async fn pause(&self) -> EngineResult<()>;

    async fn seek(&self, position_ms: u64) -> EngineResult<()>;

    async fn set_speed(&self, speed: f32) -> EngineResult<()>;

    /// Scales output volume; 1.0 is unattenuated.
    async fn set_volume(&self, factor: f32) -> EngineResult<()>;

    /// Subscribes to transport events.
    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;
}
