//! Task spawning abstraction for runtime independence.
//!
//! Core services spawn their background work (the session actor, item loads,
//! the headless engine clock) through [`TaskSpawner`] so hosts can supply
//! their own runtime.

use std::future::Future;

/// Runs detached background work for the core services.
///
/// Spawned work outlives the spawner and is never joined. Long-running tasks
/// take a `CancellationToken` and stop when it fires.
pub trait TaskSpawner: Send + Sync {
    /// Detaches `future` onto the host runtime.
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Spawner backed by a Tokio runtime handle.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    /// Spawns onto `handle`, which may belong to a runtime other than the caller's.
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Spawns onto the runtime the caller is running on.
    ///
    /// # Panics
    ///
    /// Panics outside a Tokio runtime.
    #[must_use]
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }
}
