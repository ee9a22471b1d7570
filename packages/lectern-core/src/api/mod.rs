//! HTTP/WebSocket API layer.
//!
//! Thin handlers that delegate to services, plus router construction and
//! server startup.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::auth::CallerAllowList;
use crate::events::BroadcastEventBridge;
use crate::protocol_constants::{PORT_RANGE_END, PORT_RANGE_START};
use crate::services::{BrowseServer, CommandRouter, SessionHandle};
use crate::state::Config;

pub mod http;
pub mod ws;
pub mod ws_connection;

pub use ws_connection::WsConnectionManager;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),

    /// No available ports in the specified range.
    #[error("No available ports in range {start}-{end}")]
    NoAvailablePort { start: u16, end: u16 },
}

/// Shared state for the API layer. Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct AppState {
    /// Handshake and browse queries.
    pub browse: Arc<BrowseServer>,
    /// Remote command dispatch.
    pub router: Arc<CommandRouter>,
    /// Direct handle for snapshots and host focus reports.
    pub session: SessionHandle,
    /// Source of broadcast events for WebSocket and SSE clients.
    pub event_bridge: Arc<BroadcastEventBridge>,
    pub ws_manager: Arc<WsConnectionManager>,
    pub allow_list: Arc<CallerAllowList>,
    pub config: Arc<Config>,
}

/// Builder for constructing an `AppState`.
#[derive(Default)]
pub struct AppStateBuilder {
    browse: Option<Arc<BrowseServer>>,
    router: Option<Arc<CommandRouter>>,
    session: Option<SessionHandle>,
    event_bridge: Option<Arc<BroadcastEventBridge>>,
    ws_manager: Option<Arc<WsConnectionManager>>,
    allow_list: Option<Arc<CallerAllowList>>,
    config: Option<Arc<Config>>,
}

impl AppStateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn browse(mut self, browse: Arc<BrowseServer>) -> Self {
        self.browse = Some(browse);
        self
    }

    pub fn router(mut self, router: Arc<CommandRouter>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn session(mut self, session: SessionHandle) -> Self {
        self.session = Some(session);
        self
    }

    pub fn event_bridge(mut self, bridge: Arc<BroadcastEventBridge>) -> Self {
        self.event_bridge = Some(bridge);
        self
    }

    /// Defaults to a fresh manager when unset.
    pub fn ws_manager(mut self, manager: Arc<WsConnectionManager>) -> Self {
        self.ws_manager = Some(manager);
        self
    }

    pub fn allow_list(mut self, allow_list: Arc<CallerAllowList>) -> Self {
        self.allow_list = Some(allow_list);
        self
    }

    pub fn config(mut self, config: Arc<Config>) -> Self {
        self.config = Some(config);
        self
    }

    /// Builds the `AppState`, panicking if required fields are missing.
    pub fn build(self) -> AppState {
        AppState {
            browse: self.browse.expect("browse is required"),
            router: self.router.expect("router is required"),
            session: self.session.expect("session is required"),
            event_bridge: self.event_bridge.expect("event_bridge is required"),
            ws_manager: self.ws_manager.unwrap_or_default(),
            allow_list: self.allow_list.expect("allow_list is required"),
            config: self.config.expect("config is required"),
        }
    }
}

impl AppState {
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::new()
    }
}

async fn find_available_port(start: u16, end: u16) -> Result<(u16, TcpListener), ServerError> {
    for port in start..=end {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        if let Ok(listener) = TcpListener::bind(&addr).await {
            return Ok((port, listener));
        }
    }
    Err(ServerError::NoAvailablePort { start, end })
}

/// Binds the preferred port, or the first free port in the default range
/// when `preferred_port` is 0.
pub async fn bind(preferred_port: u16) -> Result<(u16, TcpListener), ServerError> {
    if preferred_port > 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], preferred_port));
        Ok((preferred_port, TcpListener::bind(&addr).await?))
    } else {
        find_available_port(PORT_RANGE_START, PORT_RANGE_END).await
    }
}

/// Serves the API on an already-bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = http::create_router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}

/// Starts the HTTP server on the configured or auto-discovered port.
pub async fn start_server<F>(state: AppState, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (port, listener) = bind(state.config.preferred_port).await?;
    log::info!("Server listening on http://0.0.0.0:{}", port);
    serve(listener, state, shutdown).await
}
