//! Event emitter abstraction for decoupling the session from transport.
//!
//! The session depends on the [`EventEmitter`] trait rather than a concrete
//! broadcast channel, so tests and embedding hosts can observe events
//! without a network surface.

use super::{FocusEvent, PlaybackEvent};

/// Trait for emitting domain events without knowledge of transport.
pub trait EventEmitter: Send + Sync {
    /// Emits a playback snapshot event.
    fn emit_playback(&self, event: PlaybackEvent);

    /// Emits an audio focus event.
    fn emit_focus(&self, event: FocusEvent);
}

/// Emitter that discards everything.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_playback(&self, _event: PlaybackEvent) {}

    fn emit_focus(&self, _event: FocusEvent) {}
}

/// Logs all events at debug level.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_playback(&self, event: PlaybackEvent) {
        tracing::debug!(?event, "playback_event");
    }

    fn emit_focus(&self, event: FocusEvent) {
        tracing::debug!(?event, "focus_event");
    }
}
