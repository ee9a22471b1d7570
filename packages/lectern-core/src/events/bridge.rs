//! Maps domain events onto the broadcast channel that WebSocket and SSE
//! handlers subscribe to.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::emitter::EventEmitter;
use super::{BroadcastEvent, FocusEvent, PlaybackEvent};

/// Bridges domain events to the broadcast channel.
///
/// An optional external emitter also receives every event, for hosts that
/// embed the core and want events outside the network surface.
#[derive(Clone)]
pub struct BroadcastEventBridge {
    tx: broadcast::Sender<BroadcastEvent>,
    external_emitter: Arc<RwLock<Option<Arc<dyn EventEmitter>>>>,
}

impl BroadcastEventBridge {
    /// Creates a new bridge with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            external_emitter: Arc::new(RwLock::new(None)),
        }
    }

    /// Sets the external emitter. May be called after construction.
    pub fn set_external_emitter(&self, emitter: Arc<dyn EventEmitter>) {
        *self.external_emitter.write() = Some(emitter);
    }

    /// Returns a new receiver for the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.tx.subscribe()
    }

    /// Returns the number of live subscribers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Generates an [`EventEmitter`] method that forwards to the external emitter
/// (if set) and then sends to the broadcast channel.
macro_rules! impl_emit {
    ($method:ident, $event_ty:ty, $variant:ident) => {
        fn $method(&self, event: $event_ty) {
            if let Some(ref emitter) = *self.external_emitter.read() {
                emitter.$method(event.clone());
            }
            if let Err(e) = self.tx.send(BroadcastEvent::$variant(event)) {
                log::trace!("[EventBridge] No broadcast receivers: {}", e);
            }
        }
    };
}

impl EventEmitter for BroadcastEventBridge {
    impl_emit!(emit_playback, PlaybackEvent, Playback);
    impl_emit!(emit_focus, FocusEvent, Focus);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::focus::FocusChange;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    impl EventEmitter for Counter {
        fn emit_playback(&self, _event: PlaybackEvent) {}
        fn emit_focus(&self, _event: FocusEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn gained() -> FocusEvent {
        FocusEvent::Changed {
            change: FocusChange::Gained,
            held: true,
            volume: 1.0,
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn forwards_to_subscribers_and_external_emitter() {
        let bridge = BroadcastEventBridge::new(8);
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        bridge.set_external_emitter(counter.clone());
        let mut rx = bridge.subscribe();

        bridge.emit_focus(gained());

        assert!(matches!(rx.recv().await.unwrap(), BroadcastEvent::Focus(_)));
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn emitting_without_subscribers_is_harmless() {
        let bridge = BroadcastEventBridge::new(8);
        assert_eq!(bridge.receiver_count(), 0);
        bridge.emit_focus(gained());
    }
}
