//! Playback session state machine.
//!
//! One actor task owns the session: state, current item, position, speed and
//! audio focus. Commands, load completions, engine events, focus changes and
//! snapshot queries all arrive as [`SessionMessage`]s on a single channel and
//! are handled strictly in order, so transitions never interleave.
//!
//! ```text
//! Idle ──load──▶ Buffering ──ready+focus──▶ Playing ⇄ Paused
//!                    │                         ▲        ▲
//!                    └──ready, no focus────────┼────────┘
//! any ──engine failure / not found──▶ Error ──load──▶ Buffering
//! any ──stop──▶ Idle
//! ```
//!
//! Loads run off the actor. Each carries a generation number and a
//! cancellation token; starting a new load cancels the previous one and any
//! completion with a stale generation is discarded.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex as AsyncMutex};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::focus::{AudioFocusArbiter, FocusAction, FocusBroker, FocusChange, FocusGrant};
use crate::catalog::{ContentTreeBuilder, NodeId, PlayableTarget};
use crate::engine::{EngineEvent, PlaybackEngine};
use crate::error::{LecternError, LecternResult};
use crate::events::{EventEmitter, FocusEvent, PlaybackEvent};
use crate::protocol_constants::{
    CHAPTER_RESTART_THRESHOLD_MS, DUCK_VOLUME_FACTOR, MAX_PLAYBACK_SPEED, MIN_PLAYBACK_SPEED,
    NEXT_CHAPTER_LEAD_MS, POSITION_PUBLISH_INTERVAL_MS, SESSION_CHANNEL_CAPACITY,
};
use crate::runtime::TaskSpawner;
use crate::utils::now_millis;

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackState {
    #[default]
    Idle,
    Buffering,
    Playing,
    Paused,
    Error,
}

/// Point-in-time view of the session, published on every transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSnapshot {
    pub state: PlaybackState,
    pub active_item_id: Option<String>,
    pub position_ms: u64,
    pub speed: f32,
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Cadence of position snapshots while playing.
    pub position_publish_interval: Duration,
    pub duck_volume_factor: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            position_publish_interval: Duration::from_millis(POSITION_PUBLISH_INTERVAL_MS),
            duck_volume_factor: DUCK_VOLUME_FACTOR,
        }
    }
}

/// Commands accepted by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    /// Load a playable node and start it once ready.
    Load(NodeId),
    Play,
    Pause,
    Stop,
    SeekTo(u64),
    /// Seek relative to the current position.
    SkipBy(i64),
    SetSpeed(f32),
    NextChapter,
    PreviousChapter,
}

// ─────────────────────────────────────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct LoadedItem {
    id: String,
    duration_ms: u64,
    chapter_starts: Vec<u64>,
    start_ms: u64,
    chapter_index: Option<usize>,
    source_uri: String,
}

impl From<PlayableTarget> for LoadedItem {
    fn from(target: PlayableTarget) -> Self {
        let duration_ms = target.item.duration_ms;
        Self {
            chapter_starts: target
                .item
                .chapters
                .iter()
                .map(|c| c.start_ms.min(duration_ms))
                .collect(),
            id: target.item.id,
            duration_ms,
            start_ms: target.start_ms,
            chapter_index: target.chapter_index,
            source_uri: target.item.source_uri,
        }
    }
}

#[derive(Debug)]
enum LoadOutcome {
    Ready(LoadedItem),
    NotFound,
    Failed(String),
}

/// Everything the session actor reacts to.
#[derive(Debug)]
pub(crate) enum SessionMessage {
    Command(SessionCommand),
    LoadCompleted {
        generation: u64,
        outcome: LoadOutcome,
    },
    Engine(EngineEvent),
    Focus(FocusChange),
    Snapshot(oneshot::Sender<PlaybackSnapshot>),
}

// ─────────────────────────────────────────────────────────────────────────────
// Handle
// ─────────────────────────────────────────────────────────────────────────────

/// The only way into the session. Cheap to clone.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionMessage>,
}

impl SessionHandle {
    pub async fn send(&self, command: SessionCommand) -> LecternResult<()> {
        self.deliver(SessionMessage::Command(command)).await
    }

    /// Reports a host audio focus change.
    pub async fn report_focus_change(&self, change: FocusChange) -> LecternResult<()> {
        self.deliver(SessionMessage::Focus(change)).await
    }

    /// Current snapshot, answered after every message queued before it.
    pub async fn snapshot(&self) -> LecternResult<PlaybackSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.deliver(SessionMessage::Snapshot(reply)).await?;
        rx.await.map_err(|_| session_closed())
    }

    async fn deliver(&self, message: SessionMessage) -> LecternResult<()> {
        self.tx.send(message).await.map_err(|_| session_closed())
    }
}

fn session_closed() -> LecternError {
    LecternError::Internal("playback session closed".into())
}

// ─────────────────────────────────────────────────────────────────────────────
// Spawning
// ─────────────────────────────────────────────────────────────────────────────

/// Collaborators the session drives.
pub struct SessionDeps {
    pub catalog: Arc<ContentTreeBuilder>,
    pub engine: Arc<dyn PlaybackEngine>,
    pub broker: Arc<dyn FocusBroker>,
    pub emitter: Arc<dyn EventEmitter>,
}

pub struct PlaybackSession;

impl PlaybackSession {
    /// Starts the session actor and its engine event forwarder.
    ///
    /// Both stop when `cancel` fires.
    pub fn spawn<S>(
        spawner: &S,
        deps: SessionDeps,
        config: SessionConfig,
        cancel: CancellationToken,
    ) -> SessionHandle
    where
        S: TaskSpawner + Clone + 'static,
    {
        let (tx, rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);

        spawner.spawn(forward_engine_events(
            deps.engine.subscribe(),
            tx.downgrade(),
            cancel.clone(),
        ));

        let actor = SessionActor {
            state: PlaybackState::Idle,
            active_item_id: None,
            loaded: None,
            position_ms: 0,
            position_anchor: Instant::now(),
            speed: 1.0,
            generation: 0,
            load_token: CancellationToken::new(),
            intent_play: false,
            pending_seek: None,
            arbiter: AudioFocusArbiter::new(deps.broker)
                .with_duck_factor(config.duck_volume_factor),
            catalog: deps.catalog,
            engine: deps.engine,
            emitter: deps.emitter,
            load_lock: Arc::new(AsyncMutex::new(())),
            tx: tx.downgrade(),
            spawner: spawner.clone(),
        };
        spawner.spawn(actor.run(rx, cancel, config.position_publish_interval));

        log::info!("[Session] Started");
        SessionHandle { tx }
    }
}

async fn forward_engine_events(
    mut events: broadcast::Receiver<EngineEvent>,
    tx: mpsc::WeakSender<SessionMessage>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(event) => {
                let Some(tx) = tx.upgrade() else { break };
                if tx.send(SessionMessage::Engine(event)).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                log::warn!("[Session] Dropped {} engine event(s)", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Actor
// ─────────────────────────────────────────────────────────────────────────────

struct SessionActor<S> {
    state: PlaybackState,
    active_item_id: Option<String>,
    loaded: Option<LoadedItem>,
    /// Position at `position_anchor`; extrapolated while playing.
    position_ms: u64,
    position_anchor: Instant,
    speed: f32,

    generation: u64,
    load_token: CancellationToken,
    /// Start playing when the pending load completes.
    intent_play: bool,
    /// Seek requested while buffering, applied at completion.
    pending_seek: Option<u64>,

    arbiter: AudioFocusArbiter,
    catalog: Arc<ContentTreeBuilder>,
    engine: Arc<dyn PlaybackEngine>,
    emitter: Arc<dyn EventEmitter>,
    load_lock: Arc<AsyncMutex<()>>,
    tx: mpsc::WeakSender<SessionMessage>,
    spawner: S,
}

impl<S> SessionActor<S>
where
    S: TaskSpawner + Clone + 'static,
{
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<SessionMessage>,
        cancel: CancellationToken,
        publish_interval: Duration,
    ) {
        let mut ticker = tokio::time::interval(publish_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                message = rx.recv() => match message {
                    Some(message) => self.handle(message).await,
                    None => break,
                },
                _ = ticker.tick() => self.on_tick().await,
            }
        }

        self.load_token.cancel();
        log::info!("[Session] Stopped");
    }

    async fn handle(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Command(command) => self.on_command(command).await,
            SessionMessage::LoadCompleted {
                generation,
                outcome,
            } => {
                if generation != self.generation {
                    log::debug!(
                        "[Session] Discarding stale load (generation {} != {})",
                        generation,
                        self.generation
                    );
                    return;
                }
                self.on_load_completed(outcome).await;
            }
            SessionMessage::Engine(event) => self.on_engine_event(event).await,
            SessionMessage::Focus(change) => self.on_focus_change(change).await,
            SessionMessage::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────────────────

    async fn on_command(&mut self, command: SessionCommand) {
        log::debug!("[Session] {:?} in {:?}", command, self.state);
        match command {
            SessionCommand::Load(id) => self.begin_load(id).await,
            SessionCommand::Play => self.play().await,
            SessionCommand::Pause => self.pause().await,
            SessionCommand::Stop => self.stop().await,
            SessionCommand::SeekTo(ms) => match self.state {
                PlaybackState::Buffering => self.pending_seek = Some(ms),
                PlaybackState::Playing | PlaybackState::Paused => self.seek_loaded(ms).await,
                _ => {}
            },
            SessionCommand::SkipBy(delta) => {
                if self.is_transport_ready() {
                    let target = (self.position() as i64).saturating_add(delta).max(0);
                    self.seek_loaded(target as u64).await;
                }
            }
            SessionCommand::SetSpeed(speed) => self.set_speed(speed).await,
            SessionCommand::NextChapter => {
                let target = self
                    .transport_chapters()
                    .and_then(|starts| next_chapter_target(starts, self.position()));
                if let Some(target) = target {
                    self.seek_loaded(target).await;
                }
            }
            SessionCommand::PreviousChapter => {
                let target = self
                    .transport_chapters()
                    .and_then(|starts| previous_chapter_target(starts, self.position()));
                if let Some(target) = target {
                    self.seek_loaded(target).await;
                }
            }
        }
    }

    async fn begin_load(&mut self, id: NodeId) {
        self.load_token.cancel();
        self.load_token = CancellationToken::new();
        self.generation += 1;

        if self.state == PlaybackState::Playing {
            if let Err(e) = self.engine.pause().await {
                log::warn!("[Session] Failed to pause before load: {}", e);
            }
        }

        self.loaded = None;
        self.pending_seek = None;
        self.set_position(0);

        let Some(item_id) = id.item_id().map(str::to_string) else {
            log::warn!("[Session] {} is not playable", id);
            self.active_item_id = None;
            self.fail("not playable");
            return;
        };

        self.active_item_id = Some(item_id);
        self.intent_play = true;
        if self.arbiter.request() == FocusGrant::Denied {
            log::info!("[Session] Focus denied; {} will load paused", id);
        }
        self.transition(PlaybackState::Buffering);

        let generation = self.generation;
        let token = self.load_token.clone();
        let catalog = Arc::clone(&self.catalog);
        let engine = Arc::clone(&self.engine);
        let lock = Arc::clone(&self.load_lock);
        let tx = self.tx.clone();

        self.spawner.spawn(async move {
            let outcome = tokio::select! {
                _ = token.cancelled() => {
                    log::debug!("[Session] Load {} cancelled", id);
                    return;
                }
                outcome = load_item(&catalog, engine.as_ref(), &lock, &id) => outcome,
            };
            if let Some(tx) = tx.upgrade() {
                let _ = tx
                    .send(SessionMessage::LoadCompleted {
                        generation,
                        outcome,
                    })
                    .await;
            }
        });
    }

    async fn play(&mut self) {
        match self.state {
            PlaybackState::Buffering => {
                self.intent_play = true;
                if self.arbiter.request() == FocusGrant::Granted {
                    self.arbiter.clear_resume();
                }
            }
            PlaybackState::Paused => match self.arbiter.request() {
                FocusGrant::Granted => {
                    self.arbiter.clear_resume();
                    self.start_playback().await;
                }
                // A resume pending from a transient loss still applies on regain.
                FocusGrant::Denied => log::info!("[Session] Focus denied; staying paused"),
            },
            _ => {}
        }
    }

    async fn pause(&mut self) {
        match self.state {
            PlaybackState::Playing => {
                self.arbiter.clear_resume();
                self.pause_playback().await;
            }
            PlaybackState::Buffering => self.intent_play = false,
            PlaybackState::Paused => self.arbiter.clear_resume(),
            _ => {}
        }
    }

    async fn stop(&mut self) {
        if self.state == PlaybackState::Idle {
            return;
        }
        self.load_token.cancel();
        self.generation += 1;

        if self.loaded.is_some() {
            if let Err(e) = self.engine.pause().await {
                log::warn!("[Session] Failed to pause engine on stop: {}", e);
            }
        }
        self.arbiter.release();
        self.active_item_id = None;
        self.loaded = None;
        self.intent_play = false;
        self.pending_seek = None;
        self.set_position(0);
        self.transition(PlaybackState::Idle);
    }

    async fn set_speed(&mut self, speed: f32) {
        if !speed.is_finite() {
            log::debug!("[Session] Ignoring non-finite speed");
            return;
        }
        if !matches!(
            self.state,
            PlaybackState::Playing | PlaybackState::Paused | PlaybackState::Buffering
        ) {
            return;
        }
        let speed = speed.clamp(MIN_PLAYBACK_SPEED, MAX_PLAYBACK_SPEED);
        let position = self.position();
        self.speed = speed;
        self.set_position(position);
        if self.loaded.is_some() {
            if let Err(e) = self.engine.set_speed(speed).await {
                log::warn!("[Session] Failed to set speed: {}", e);
            }
        }
        self.publish_position();
    }

    async fn seek_loaded(&mut self, ms: u64) {
        let Some(duration_ms) = self.loaded.as_ref().map(|l| l.duration_ms) else {
            return;
        };
        let target = ms.min(duration_ms);
        if let Err(e) = self.engine.seek(target).await {
            log::warn!("[Session] Seek to {}ms failed: {}", target, e);
            return;
        }
        self.set_position(target);
        self.publish_position();
    }

    // ─────────────────────────────────────────────────────────────────────
    // Load completion, engine and focus events
    // ─────────────────────────────────────────────────────────────────────

    async fn on_load_completed(&mut self, outcome: LoadOutcome) {
        let loaded = match outcome {
            LoadOutcome::Ready(loaded) => loaded,
            LoadOutcome::NotFound => {
                log::warn!("[Session] Item not found: {:?}", self.active_item_id);
                self.active_item_id = None;
                self.fail("not found");
                return;
            }
            LoadOutcome::Failed(reason) => {
                self.fail(&reason);
                return;
            }
        };

        let start = match self.pending_seek.take() {
            Some(seek) => {
                let seek = seek.min(loaded.duration_ms);
                if let Err(e) = self.engine.seek(seek).await {
                    log::warn!("[Session] Deferred seek failed: {}", e);
                }
                seek
            }
            None => loaded.start_ms,
        };
        if let Err(e) = self.engine.set_speed(self.speed).await {
            log::warn!("[Session] Failed to apply speed: {}", e);
        }
        log::info!(
            "[Session] Loaded {} ({}) at {}ms, chapter {:?}",
            loaded.id,
            loaded.source_uri,
            start,
            loaded.chapter_index
        );
        self.loaded = Some(loaded);
        self.set_position(start);

        if self.intent_play && self.arbiter.is_held() {
            self.start_playback().await;
        } else {
            self.transition(PlaybackState::Paused);
        }
    }

    async fn on_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Progress {
                playing,
                position_ms,
            } => {
                let Some(duration_ms) = self.loaded.as_ref().map(|l| l.duration_ms) else {
                    return;
                };
                match self.state {
                    PlaybackState::Playing => {
                        self.set_position(position_ms.min(duration_ms));
                        if !playing {
                            log::info!("[Session] Engine stopped at {}ms", position_ms);
                            self.transition(PlaybackState::Paused);
                        } else {
                            self.pause_if_ended().await;
                        }
                    }
                    PlaybackState::Paused => self.set_position(position_ms.min(duration_ms)),
                    _ => {}
                }
            }
            EngineEvent::Failed { message } => {
                if self.is_transport_ready() {
                    self.fail(&message);
                }
            }
        }
    }

    async fn on_focus_change(&mut self, change: FocusChange) {
        let playing = self.state == PlaybackState::Playing
            || (self.state == PlaybackState::Buffering && self.intent_play);
        let outcome = self.arbiter.on_change(change, playing);

        if let Err(e) = self.engine.set_volume(outcome.volume).await {
            log::warn!("[Session] Failed to set volume: {}", e);
        }
        match (outcome.action, self.state) {
            (FocusAction::Pause, PlaybackState::Playing) => self.pause_playback().await,
            (FocusAction::Pause, PlaybackState::Buffering) => self.intent_play = false,
            (FocusAction::Resume, PlaybackState::Paused) if self.loaded.is_some() => {
                self.start_playback().await
            }
            (FocusAction::Resume, PlaybackState::Buffering) => self.intent_play = true,
            _ => {}
        }

        let focus = self.arbiter.state();
        self.emitter.emit_focus(FocusEvent::Changed {
            change,
            held: focus.held,
            volume: focus.ducked_volume_factor,
            timestamp: now_millis(),
        });
    }

    async fn on_tick(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }
        self.pause_if_ended().await;
        if self.state == PlaybackState::Playing {
            self.publish_position();
        }
    }

    /// Engines need not report the end of an item, so the session pauses
    /// itself once the playhead reaches the item's duration.
    async fn pause_if_ended(&mut self) {
        let Some(duration_ms) = self.loaded.as_ref().map(|l| l.duration_ms) else {
            return;
        };
        if self.state == PlaybackState::Playing && self.position() >= duration_ms {
            log::info!("[Session] Reached end of {:?}", self.active_item_id);
            self.pause_playback().await;
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────

    async fn start_playback(&mut self) {
        match self.engine.play().await {
            Ok(()) => {
                self.set_position(self.position_ms);
                self.transition(PlaybackState::Playing);
            }
            Err(e) => self.fail(&e.to_string()),
        }
    }

    async fn pause_playback(&mut self) {
        if let Err(e) = self.engine.pause().await {
            log::warn!("[Session] Engine pause failed: {}", e);
        }
        let position = self.position();
        self.set_position(position);
        self.transition(PlaybackState::Paused);
    }

    fn fail(&mut self, reason: &str) {
        log::error!("[Session] Playback error: {}", reason);
        self.intent_play = false;
        self.pending_seek = None;
        self.transition(PlaybackState::Error);
    }

    fn is_transport_ready(&self) -> bool {
        self.loaded.is_some()
            && matches!(self.state, PlaybackState::Playing | PlaybackState::Paused)
    }

    fn transport_chapters(&self) -> Option<&[u64]> {
        if !self.is_transport_ready() {
            return None;
        }
        self.loaded.as_ref().map(|l| l.chapter_starts.as_slice())
    }

    fn position(&self) -> u64 {
        let mut position = self.position_ms;
        if self.state == PlaybackState::Playing {
            let elapsed = self.position_anchor.elapsed().as_millis() as f64;
            position += (elapsed * f64::from(self.speed)) as u64;
        }
        match &self.loaded {
            Some(loaded) => position.min(loaded.duration_ms),
            None => position,
        }
    }

    fn set_position(&mut self, ms: u64) {
        self.position_ms = ms;
        self.position_anchor = Instant::now();
    }

    fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            state: self.state,
            active_item_id: self.active_item_id.clone(),
            position_ms: self.position(),
            speed: self.speed,
            timestamp: now_millis(),
        }
    }

    fn transition(&mut self, next: PlaybackState) {
        log::info!("[Session] {:?} -> {:?}", self.state, next);
        self.state = next;
        self.catalog.set_now_playing(self.active_item_id.clone());
        self.emitter
            .emit_playback(PlaybackEvent::StateChanged(self.snapshot()));
    }

    fn publish_position(&self) {
        self.emitter
            .emit_playback(PlaybackEvent::Position(self.snapshot()));
    }
}

/// Resolves and loads one item while holding the engine load lock.
async fn load_item(
    catalog: &ContentTreeBuilder,
    engine: &dyn PlaybackEngine,
    lock: &AsyncMutex<()>,
    id: &NodeId,
) -> LoadOutcome {
    let _guard = lock.lock().await;
    let target = match catalog.resolve_playable(id).await {
        Ok(Some(target)) => target,
        Ok(None) => return LoadOutcome::NotFound,
        Err(e) => return LoadOutcome::Failed(e.to_string()),
    };
    match engine
        .load(&target.item.source_uri, target.start_ms)
        .await
    {
        Ok(()) => LoadOutcome::Ready(target.into()),
        Err(e) => LoadOutcome::Failed(e.to_string()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Chapter Navigation
// ─────────────────────────────────────────────────────────────────────────────

/// Target of "previous chapter" from `position`.
///
/// Within the first few seconds of a chapter this goes to the previous
/// chapter's start; later it restarts the current chapter.
pub(crate) fn previous_chapter_target(starts: &[u64], position: u64) -> Option<u64> {
    let first = *starts.first()?;
    let Some(current) = starts.iter().rposition(|&s| s <= position) else {
        return Some(first);
    };
    let into_chapter = position - starts[current];
    if into_chapter < CHAPTER_RESTART_THRESHOLD_MS {
        Some(starts[current.saturating_sub(1)])
    } else {
        Some(starts[current])
    }
}

/// Start of the first chapter beginning meaningfully after `position`.
pub(crate) fn next_chapter_target(starts: &[u64], position: u64) -> Option<u64> {
    starts
        .iter()
        .copied()
        .find(|&s| s > position.saturating_add(NEXT_CHAPTER_LEAD_MS))
}
