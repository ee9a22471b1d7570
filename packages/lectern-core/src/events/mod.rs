//! Event system for real-time controller updates.
//!
//! This module provides:
//! - [`EventEmitter`] trait for the session to publish events
//! - [`BroadcastEventBridge`] for WebSocket and SSE transport
//! - Event types for playback and audio focus

mod bridge;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

use crate::services::focus::FocusChange;
use crate::services::session::PlaybackSnapshot;

/// Events broadcast to connected controllers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum BroadcastEvent {
    /// Playback session snapshots.
    Playback(PlaybackEvent),

    /// Audio focus changes.
    Focus(FocusEvent),
}

/// Playback session updates. Both variants carry the full snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlaybackEvent {
    /// The session moved to a new state.
    StateChanged(PlaybackSnapshot),
    /// Position moved without a state change (cadence tick, seek, speed).
    Position(PlaybackSnapshot),
}

impl PlaybackEvent {
    pub fn snapshot(&self) -> &PlaybackSnapshot {
        match self {
            Self::StateChanged(s) | Self::Position(s) => s,
        }
    }
}

/// Audio focus updates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FocusEvent {
    Changed {
        change: FocusChange,
        held: bool,
        /// Output volume factor now applied.
        volume: f32,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

impl BroadcastEvent {
    /// `category.type`, used as the SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Playback(PlaybackEvent::StateChanged(_)) => "playback.stateChanged",
            Self::Playback(PlaybackEvent::Position(_)) => "playback.position",
            Self::Focus(FocusEvent::Changed { .. }) => "focus.changed",
        }
    }
}

impl From<PlaybackEvent> for BroadcastEvent {
    fn from(event: PlaybackEvent) -> Self {
        BroadcastEvent::Playback(event)
    }
}

impl From<FocusEvent> for BroadcastEvent {
    fn from(event: FocusEvent) -> Self {
        BroadcastEvent::Focus(event)
    }
}
