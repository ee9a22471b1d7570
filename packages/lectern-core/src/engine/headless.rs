//! Engine that keeps a virtual playhead without producing audio.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{EngineError, EngineEvent, EngineResult, PlaybackEngine};
use crate::protocol_constants::ENGINE_EVENT_CAPACITY;
use crate::runtime::TaskSpawner;

struct Transport {
    source: Option<String>,
    playing: bool,
    /// Position at `anchor`.
    anchor_position_ms: u64,
    anchor: Instant,
    speed: f32,
    volume: f32,
}

impl Transport {
    fn position_ms(&self) -> u64 {
        if !self.playing {
            return self.anchor_position_ms;
        }
        let elapsed = self.anchor.elapsed().as_millis() as f64 * f64::from(self.speed);
        self.anchor_position_ms + elapsed as u64
    }

    /// Folds elapsed play time into the anchor.
    fn rebase(&mut self) {
        self.anchor_position_ms = self.position_ms();
        self.anchor = Instant::now();
    }
}

/// Headless [`PlaybackEngine`].
///
/// Local sources must exist on disk to load; remote URIs are accepted as-is.
/// Progress is reported only by the ticker, and only while playing.
pub struct HeadlessEngine {
    transport: Mutex<Transport>,
    events: broadcast::Sender<EngineEvent>,
}

impl HeadlessEngine {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(ENGINE_EVENT_CAPACITY);
        Self {
            transport: Mutex::new(Transport {
                source: None,
                playing: false,
                anchor_position_ms: 0,
                anchor: Instant::now(),
                speed: 1.0,
                volume: 1.0,
            }),
            events,
        }
    }

    /// Current playhead.
    pub fn position_ms(&self) -> u64 {
        self.transport.lock().position_ms()
    }

    /// Current output volume factor.
    pub fn volume(&self) -> f32 {
        self.transport.lock().volume
    }

    pub fn is_playing(&self) -> bool {
        self.transport.lock().playing
    }

    /// Starts the progress ticker; it stops when `cancel` fires.
    pub fn start<S: TaskSpawner>(
        self: &Arc<Self>,
        spawner: &S,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        let engine = Arc::clone(self);
        spawner.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let (playing, position_ms) = {
                            let t = engine.transport.lock();
                            (t.playing, t.position_ms())
                        };
                        if playing {
                            engine.emit(EngineEvent::Progress { playing, position_ms });
                        }
                    }
                }
            }
            log::debug!("[Engine] Progress ticker stopped");
        });
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is normal before the session starts.
        let _ = self.events.send(event);
    }

    async fn source_exists(uri: &str) -> bool {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            return true;
        }
        let path = uri.strip_prefix("file://").unwrap_or(uri);
        tokio::fs::try_exists(Path::new(path)).await.unwrap_or(false)
    }
}

impl Default for HeadlessEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlaybackEngine for HeadlessEngine {
    async fn load(&self, uri: &str, start_position_ms: u64) -> EngineResult<()> {
        if !Self::source_exists(uri).await {
            return Err(EngineError::SourceMissing(uri.to_string()));
        }
        let mut t = self.transport.lock();
        t.source = Some(uri.to_string());
        t.playing = false;
        t.anchor_position_ms = start_position_ms;
        t.anchor = Instant::now();
        log::info!("[Engine] Loaded {} at {}ms", uri, start_position_ms);
        Ok(())
    }

    async fn play(&self) -> EngineResult<()> {
        let mut t = self.transport.lock();
        if t.source.is_none() {
            return Err(EngineError::NotLoaded);
        }
        t.rebase();
        t.playing = true;
        Ok(())
    }

    async fn pause(&self) -> EngineResult<()> {
        let mut t = self.transport.lock();
        t.rebase();
        t.playing = false;
        Ok(())
    }

    async fn seek(&self, position_ms: u64) -> EngineResult<()> {
        let mut t = self.transport.lock();
        if t.source.is_none() {
            return Err(EngineError::NotLoaded);
        }
        t.anchor_position_ms = position_ms;
        t.anchor = Instant::now();
        Ok(())
    }

    async fn set_speed(&self, speed: f32) -> EngineResult<()> {
        let mut t = self.transport.lock();
        t.rebase();
        t.speed = speed;
        Ok(())
    }

    async fn set_volume(&self, factor: f32) -> EngineResult<()> {
        self.transport.lock().volume = factor.clamp(0.0, 1.0);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_rejects_missing_local_source() {
        let engine = HeadlessEngine::new();
        let err = engine.load("/definitely/not/here.m4b", 0).await;
        assert!(matches!(err, Err(EngineError::SourceMissing(_))));
        assert!(matches!(engine.play().await, Err(EngineError::NotLoaded)));
    }

    #[tokio::test(start_paused = true)]
    async fn playhead_advances_at_speed_while_playing() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let engine = HeadlessEngine::new();
        engine
            .load(file.path().to_str().unwrap(), 1_000)
            .await
            .unwrap();
        engine.set_speed(2.0).await.unwrap();
        engine.play().await.unwrap();

        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(engine.position_ms(), 2_000);

        engine.pause().await.unwrap();
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(engine.position_ms(), 2_000);
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_reports_progress_only_while_playing() {
        let engine = Arc::new(HeadlessEngine::new());
        let mut events = engine.subscribe();
        let cancel = CancellationToken::new();
        engine.start(
            &crate::runtime::TokioSpawner::current(),
            Duration::from_millis(100),
            cancel.clone(),
        );
        engine.load("https://cdn.example/book.mp3", 0).await.unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(events.try_recv().is_err());

        engine.play().await.unwrap();
        let event = events.recv().await.unwrap();
        assert!(matches!(event, EngineEvent::Progress { playing: true, .. }));
        cancel.cancel();
    }

    #[tokio::test]
    async fn volume_is_clamped() {
        let engine = HeadlessEngine::new();
        engine.set_volume(0.3).await.unwrap();
        assert!((engine.volume() - 0.3).abs() < f32::EPSILON);
        engine.set_volume(4.0).await.unwrap();
        assert_eq!(engine.volume(), 1.0);
    }
}
