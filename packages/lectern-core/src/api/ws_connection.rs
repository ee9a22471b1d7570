//! Tracking of live controller WebSocket connections.
//!
//! - `WsConnectionManager`: every open socket, with the caller it handshook as
//! - `ConnectionGuard`: unregisters its socket on drop

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::auth::CallerIdentity;
use crate::utils::now_millis;

/// Per-socket bookkeeping.
struct ConnectionState {
    opened_at_ms: u64,
    /// Set once the handshake is accepted.
    caller: Option<CallerIdentity>,
}

/// Point-in-time view of one connection, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: String,
    pub opened_at_ms: u64,
    pub caller: Option<CallerIdentity>,
}

/// Registry of open controller sockets.
///
/// Each socket gets a child of one shared cancellation token, so
/// [`close_all`](Self::close_all) can stop every handler at once.
pub struct WsConnectionManager {
    connections: DashMap<String, ConnectionState>,
    next_id: AtomicU64,
    /// Replaced after `close_all()` so later sockets are not born cancelled.
    global_cancel: RwLock<CancellationToken>,
}

impl WsConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            global_cancel: RwLock::new(CancellationToken::new()),
        }
    }

    /// Registers a socket. It stays registered until the guard drops.
    pub fn register(self: &Arc<Self>) -> ConnectionGuard {
        let id = format!("ws-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel_token = self.global_cancel.read().child_token();

        self.connections.insert(
            id.clone(),
            ConnectionState {
                opened_at_ms: now_millis(),
                caller: None,
            },
        );
        log::info!(
            "[WS] Connection registered: {} (total: {})",
            id,
            self.connections.len()
        );

        ConnectionGuard {
            id,
            manager: Arc::clone(self),
            cancel_token,
        }
    }

    fn unregister(&self, id: &str) {
        if let Some((_, state)) = self.connections.remove(id) {
            log::info!(
                "[WS] Connection unregistered: {} caller={} (remaining: {})",
                id,
                state
                    .caller
                    .as_ref()
                    .map_or("<none>", CallerIdentity::as_str),
                self.connections.len()
            );
        }
    }

    fn set_caller(&self, id: &str, caller: CallerIdentity) {
        if let Some(mut state) = self.connections.get_mut(id) {
            state.caller = Some(caller);
        }
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Connections that completed a handshake.
    #[must_use]
    pub fn authorized_count(&self) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.caller.is_some())
            .count()
    }

    /// Snapshot of every open connection, oldest first.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<ConnectionInfo> = self
            .connections
            .iter()
            .map(|entry| ConnectionInfo {
                id: entry.key().clone(),
                opened_at_ms: entry.opened_at_ms,
                caller: entry.caller.clone(),
            })
            .collect();
        infos.sort_by(|a, b| a.opened_at_ms.cmp(&b.opened_at_ms).then(a.id.cmp(&b.id)));
        infos
    }

    /// Signals every open socket to close. Returns how many were signalled.
    pub fn close_all(&self) -> usize {
        let count = self.connections.len();
        if count == 0 {
            log::debug!("[WS] close_all: no open connections");
            return count;
        }
        log::info!("[WS] Force-closing {} connection(s)", count);
        let mut token = self.global_cancel.write();
        token.cancel();
        *token = CancellationToken::new();
        count
    }
}

impl Default for WsConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps a socket registered for as long as its handler runs.
pub struct ConnectionGuard {
    id: String,
    manager: Arc<WsConnectionManager>,
    cancel_token: CancellationToken,
}

impl ConnectionGuard {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Fires on `close_all()`; select on it in the handler loop.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// Records the caller this socket was accepted as.
    pub fn set_caller(&self, caller: CallerIdentity) {
        self.manager.set_caller(&self.id, caller);
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.manager.unregister(&self.id);
    }
}
