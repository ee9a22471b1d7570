//! Application bootstrap and dependency wiring.
//!
//! The composition root: every service is created and wired here, in
//! dependency order. Hosts supply the three collaborators the core does not
//! own (library, engine, focus broker).

use std::sync::Arc;

use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::api::{AppState, WsConnectionManager};
use crate::artwork::ArtworkTranscoder;
use crate::auth::CallerAllowList;
use crate::catalog::ContentTreeBuilder;
use crate::engine::PlaybackEngine;
use crate::error::{LecternError, LecternResult};
use crate::events::{BroadcastEventBridge, EventEmitter, LoggingEventEmitter};
use crate::library::LibraryRepository;
use crate::protocol_constants::EVENT_CHANNEL_CAPACITY;
use crate::runtime::TokioSpawner;
use crate::services::{
    BrowseServer, CommandRouter, FocusBroker, PlaybackSession, SessionCommand, SessionConfig,
    SessionDeps, SessionHandle,
};
use crate::state::Config;

/// Collaborators supplied by the host.
pub struct HostServices {
    pub library: Arc<dyn LibraryRepository>,
    pub engine: Arc<dyn PlaybackEngine>,
    pub broker: Arc<dyn FocusBroker>,
}

/// Container for all bootstrapped services.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// State handed to the API layer.
    pub state: AppState,
    pub session: SessionHandle,
    pub catalog: Arc<ContentTreeBuilder>,
    pub event_bridge: Arc<BroadcastEventBridge>,
    pub ws_manager: Arc<WsConnectionManager>,
    /// Shared HTTP client for remote artwork.
    http_client: Client,
    pub spawner: TokioSpawner,
    /// Parent of every background task's token.
    pub cancel_token: CancellationToken,
}

impl BootstrappedServices {
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// Stops playback, then background tasks, then every controller socket.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");

        if let Err(e) = self.session.send(SessionCommand::Stop).await {
            log::debug!("[Bootstrap] Session already closed: {}", e);
        }

        self.cancel_token.cancel();

        let closed = self.ws_manager.close_all();
        if closed > 0 {
            log::info!("[Bootstrap] Closed {} WebSocket connection(s)", closed);
        }

        log::info!("[Bootstrap] Shutdown complete");
    }
}

fn create_http_client(config: &Config) -> LecternResult<Client> {
    Client::builder()
        .timeout(config.artwork_fetch_timeout())
        .build()
        .map_err(|e| LecternError::Internal(format!("Failed to create HTTP client: {}", e)))
}

/// Bootstraps all services.
///
/// Wiring order:
///
/// 1. Shared infrastructure (HTTP client, event bridge, cancellation token)
/// 2. Catalog over the host library
/// 3. Playback session (catalog, engine, broker, event bridge)
/// 4. Browse server and command router (allow-list, catalog, session)
///
/// # Errors
///
/// Returns [`LecternError::Configuration`] when `config` fails validation.
///
/// # Panics
///
/// Must be called from within a Tokio runtime.
pub fn bootstrap_services(config: &Config, host: HostServices) -> LecternResult<BootstrappedServices> {
    config.validate().map_err(LecternError::Configuration)?;

    let spawner = TokioSpawner::current();
    let http_client = create_http_client(config)?;
    let cancel_token = CancellationToken::new();

    let event_bridge = Arc::new(BroadcastEventBridge::new(EVENT_CHANNEL_CAPACITY));
    event_bridge.set_external_emitter(Arc::new(LoggingEventEmitter));
    let ws_manager = Arc::new(WsConnectionManager::new());
    let allow_list: Arc<CallerAllowList> = Arc::new(config.allow_list());
    log::info!("[Bootstrap] {} caller identities allowed", allow_list.len());

    let catalog = Arc::new(
        ContentTreeBuilder::new(host.library).with_search_limit(config.search_result_limit),
    );

    let session = PlaybackSession::spawn(
        &spawner,
        SessionDeps {
            catalog: Arc::clone(&catalog),
            engine: host.engine,
            broker: host.broker,
            emitter: Arc::clone(&event_bridge) as Arc<dyn EventEmitter>,
        },
        SessionConfig {
            position_publish_interval: config.position_publish_interval(),
            duck_volume_factor: config.duck_volume_factor,
        },
        cancel_token.child_token(),
    );

    let transcoder = Arc::new(ArtworkTranscoder::new(http_client.clone()));
    let browse = Arc::new(
        BrowseServer::new(Arc::clone(&allow_list), Arc::clone(&catalog), transcoder)
            .with_max_artwork_dim(config.max_artwork_dim)
            .with_cache_capacity(config.artwork_cache_entries),
    );
    let router = Arc::new(
        CommandRouter::new(Arc::clone(&allow_list), Arc::clone(&catalog), session.clone())
            .with_skip_increments(config.skip_forward_secs, config.skip_back_secs),
    );

    let state = AppState::builder()
        .browse(browse)
        .router(router)
        .session(session.clone())
        .event_bridge(Arc::clone(&event_bridge))
        .ws_manager(Arc::clone(&ws_manager))
        .allow_list(allow_list)
        .config(Arc::new(config.clone()))
        .build();

    Ok(BootstrappedServices {
        state,
        session,
        catalog,
        event_bridge,
        ws_manager,
        http_client,
        spawner,
        cancel_token,
    })
}
