//! Fixtures and test doubles shared by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};

use crate::engine::{EngineError, EngineEvent, EngineResult, PlaybackEngine};
use crate::library::{
    ChapterRecord, InMemoryLibrary, ItemFilter, ItemRecord, LibraryError, LibraryRepository,
    LibraryResult,
};
use crate::services::focus::{FocusBroker, FocusGrant};

// ─────────────────────────────────────────────────────────────────────────────
// Library Fixtures
// ─────────────────────────────────────────────────────────────────────────────

/// An unplayed one-hour item with no chapters.
pub fn item(id: &str, title: &str, author: &str) -> ItemRecord {
    ItemRecord {
        id: id.to_string(),
        title: title.to_string(),
        author: author.to_string(),
        series: None,
        duration_ms: 3_600_000,
        chapters: Vec::new(),
        artwork_ref: None,
        source_uri: format!("/library/{id}.m4b"),
        last_played_ms: 0,
        progress_ms: 0,
        finished: false,
    }
}

fn chapter(title: &str, start_ms: u64) -> ChapterRecord {
    ChapterRecord {
        title: title.to_string(),
        start_ms,
    }
}

/// Four books across three authors.
///
/// - `dune`: unplayed, three chapters (the second untitled)
/// - `wizard`: Earthsea, a quarter through, played at t=2000
/// - `tombs`: Earthsea, finished, played last (t=3000)
/// - `hobbit`: lowercase title, two chapters, played at t=1000
pub fn sample_library() -> InMemoryLibrary {
    let mut dune = item("dune", "Dune", "Frank Herbert");
    dune.duration_ms = 2_000_000;
    dune.chapters = vec![
        chapter("Arrakis", 0),
        chapter("", 600_000),
        chapter("Muad'Dib", 1_500_000),
    ];

    let mut wizard = item("wizard", "A Wizard of Earthsea", "Ursula K. Le Guin");
    wizard.series = Some("Earthsea".into());
    wizard.duration_ms = 4_000_000;
    wizard.progress_ms = 1_000_000;
    wizard.last_played_ms = 2_000;

    let mut tombs = item("tombs", "The Tombs of Atuan", "Ursula K. Le Guin");
    tombs.series = Some("Earthsea".into());
    tombs.last_played_ms = 3_000;
    tombs.progress_ms = 3_600_000;
    tombs.finished = true;

    let mut hobbit = item("hobbit", "the Hobbit", "J.R.R. Tolkien");
    hobbit.last_played_ms = 1_000;
    hobbit.chapters = vec![
        chapter("An Unexpected Party", 0),
        chapter("Roast Mutton", 1_800_000),
    ];

    InMemoryLibrary::from_records(vec![dune, wizard, tombs, hobbit])
}

/// Repository whose every call fails.
pub struct FailingLibrary;

fn unavailable<T>() -> LibraryResult<T> {
    Err(LibraryError::Unavailable("offline".into()))
}

#[async_trait]
impl LibraryRepository for FailingLibrary {
    async fn get_item_by_id(&self, _id: &str) -> LibraryResult<Option<ItemRecord>> {
        unavailable()
    }

    async fn list_all(&self, _filter: &ItemFilter) -> LibraryResult<Vec<ItemRecord>> {
        unavailable()
    }

    async fn most_recent_in_progress(&self) -> LibraryResult<Option<ItemRecord>> {
        unavailable()
    }

    async fn distinct_authors(&self) -> LibraryResult<Vec<String>> {
        unavailable()
    }

    async fn distinct_series(&self) -> LibraryResult<Vec<String>> {
        unavailable()
    }

    async fn search_by_title_author_series(
        &self,
        _query: &str,
    ) -> LibraryResult<Vec<ItemRecord>> {
        unavailable()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct MockEngineState {
    loads: Vec<(String, u64)>,
    current: Option<String>,
    seeks: Vec<u64>,
    playing: bool,
    speed: f32,
    volume: f32,
}

/// Engine double that records calls.
///
/// Loads of a held URI block until released; loads of a failing URI error.
pub struct MockEngine {
    state: Mutex<MockEngineState>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    failing: Mutex<HashSet<String>>,
    events: broadcast::Sender<EngineEvent>,
}

impl MockEngine {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            state: Mutex::new(MockEngineState {
                speed: 1.0,
                volume: 1.0,
                ..MockEngineState::default()
            }),
            gates: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            events,
        }
    }

    pub fn hold(&self, uri: &str) {
        self.gates
            .lock()
            .insert(uri.to_string(), Arc::new(Notify::new()));
    }

    pub fn release(&self, uri: &str) {
        if let Some(gate) = self.gates.lock().get(uri) {
            gate.notify_one();
        }
    }

    pub fn fail_on(&self, uri: &str) {
        self.failing.lock().insert(uri.to_string());
    }

    pub fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    /// Every URI a load was started for, in order.
    pub fn loads(&self) -> Vec<String> {
        self.state.lock().loads.iter().map(|(u, _)| u.clone()).collect()
    }

    pub fn last_load_start(&self) -> Option<u64> {
        self.state.lock().loads.last().map(|(_, start)| *start)
    }

    /// URI of the last load that completed.
    pub fn current(&self) -> Option<String> {
        self.state.lock().current.clone()
    }

    pub fn seeks(&self) -> Vec<u64> {
        self.state.lock().seeks.clone()
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    pub fn speed(&self) -> f32 {
        self.state.lock().speed
    }

    pub fn volume(&self) -> f32 {
        self.state.lock().volume
    }
}

#[async_trait]
impl PlaybackEngine for MockEngine {
    async fn load(&self, uri: &str, start_position_ms: u64) -> EngineResult<()> {
        self.state
            .lock()
            .loads
            .push((uri.to_string(), start_position_ms));
        if self.failing.lock().contains(uri) {
            return Err(EngineError::SourceMissing(uri.to_string()));
        }
        let gate = self.gates.lock().get(uri).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let mut state = self.state.lock();
        state.current = Some(uri.to_string());
        state.playing = false;
        Ok(())
    }

    async fn play(&self) -> EngineResult<()> {
        let mut state = self.state.lock();
        if state.current.is_none() {
            return Err(EngineError::NotLoaded);
        }
        state.playing = true;
        Ok(())
    }

    async fn pause(&self) -> EngineResult<()> {
        self.state.lock().playing = false;
        Ok(())
    }

    async fn seek(&self, position_ms: u64) -> EngineResult<()> {
        self.state.lock().seeks.push(position_ms);
        Ok(())
    }

    async fn set_speed(&self, speed: f32) -> EngineResult<()> {
        self.state.lock().speed = speed;
        Ok(())
    }

    async fn set_volume(&self, factor: f32) -> EngineResult<()> {
        self.state.lock().volume = factor;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Focus
// ─────────────────────────────────────────────────────────────────────────────

/// Broker whose answer is set by the test.
pub struct ScriptedBroker {
    grant: AtomicBool,
    requests: AtomicUsize,
    abandons: AtomicUsize,
}

impl ScriptedBroker {
    pub fn granting() -> Self {
        Self::with_grant(true)
    }

    pub fn denying() -> Self {
        Self::with_grant(false)
    }

    fn with_grant(grant: bool) -> Self {
        Self {
            grant: AtomicBool::new(grant),
            requests: AtomicUsize::new(0),
            abandons: AtomicUsize::new(0),
        }
    }

    pub fn set_grant(&self, grant: bool) {
        self.grant.store(grant, Ordering::SeqCst);
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn abandons(&self) -> usize {
        self.abandons.load(Ordering::SeqCst)
    }
}

impl FocusBroker for ScriptedBroker {
    fn request(&self) -> FocusGrant {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.grant.load(Ordering::SeqCst) {
            FocusGrant::Granted
        } else {
            FocusGrant::Denied
        }
    }

    fn abandon(&self) {
        self.abandons.fetch_add(1, Ordering::SeqCst);
    }
}
