//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to services for business logic.
//! Callers identify themselves with the `X-Lectern-Caller` header.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::api::ws::ws_handler;
use crate::api::AppState;
use crate::auth::{AuthorizedCaller, CallerIdentity};
use crate::catalog::Page;
use crate::error::{LecternError, LecternResult};
use crate::protocol_constants::{APP_NAME, CALLER_HEADER, NODE_ROOT};
use crate::services::{Connection, FocusChange, RemoteCommand};

/// Interval between SSE keep-alive comments.
const SSE_KEEP_ALIVE_SECS: u64 = 15;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/browse/{node_id}", get(browse_node))
        .route("/api/browse/{node_id}/children", get(get_children))
        .route("/api/search", get(search))
        .route("/api/commands", post(post_command))
        .route("/api/session", get(get_session))
        .route("/api/events", get(event_stream))
        .route("/api/artwork/{node_id}", get(get_artwork))
        .route("/api/focus", post(post_focus))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Caller Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Identity from the caller header. A missing header is an empty identity,
/// which no allow-list admits.
fn caller_from(headers: &HeaderMap) -> CallerIdentity {
    let raw = headers
        .get(CALLER_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    CallerIdentity::new(raw.trim())
}

fn authorize(state: &AppState, headers: &HeaderMap) -> LecternResult<AuthorizedCaller> {
    state.allow_list.authorize(&caller_from(headers))
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Liveness check.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": APP_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.ws_manager.connection_count(),
    }))
}

/// `GET /api/browse/root` is the handshake; any other id is a GetItem.
async fn browse_node(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(node_id): Path<String>,
) -> LecternResult<Response> {
    if node_id == NODE_ROOT {
        return match state.browse.connect(&caller_from(&headers)) {
            Connection::Accepted { root, .. } => Ok(Json(root).into_response()),
            Connection::Rejected => Err(LecternError::Unauthorized),
        };
    }
    let caller = authorize(&state, &headers)?;
    match state.browse.get_item(&caller, &node_id).await? {
        Some(node) => Ok(Json(node).into_response()),
        None => Err(LecternError::NotFound(node_id)),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageParams {
    page: Option<usize>,
    page_size: Option<usize>,
}

async fn get_children(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(node_id): Path<String>,
    Query(params): Query<PageParams>,
) -> LecternResult<Response> {
    let caller = authorize(&state, &headers)?;
    let page = Page::from_params(params.page, params.page_size);
    let items = state.browse.get_children(&caller, &node_id, page).await?;
    Ok(Json(json!({ "nodeId": node_id, "items": items })).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
}

async fn search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> LecternResult<Response> {
    let caller = authorize(&state, &headers)?;
    let items = state.browse.search(&caller, &params.q).await;
    Ok(Json(json!({ "query": params.q, "items": items })).into_response())
}

/// Accepts a remote command. Always `202`: rejected and malformed commands
/// are dropped without telling the caller.
async fn post_command(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let caller = caller_from(&headers);
    match serde_json::from_slice::<RemoteCommand>(&body) {
        Ok(command) => {
            let outcome = state.router.dispatch(&caller, command).await;
            log::debug!("[HTTP] Command from {}: {:?}", caller, outcome);
        }
        Err(e) => log::debug!("[HTTP] Dropping malformed command from {}: {}", caller, e),
    }
    StatusCode::ACCEPTED
}

async fn get_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> LecternResult<Response> {
    authorize(&state, &headers)?;
    let snapshot = state.session.snapshot().await?;
    Ok(Json(snapshot).into_response())
}

/// Server-Sent Events feed of every broadcast event.
async fn event_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> LecternResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let caller = authorize(&state, &headers)?;
    log::info!("[SSE] {} subscribed", caller.identity());

    let events = BroadcastStream::new(state.event_bridge.subscribe());
    let stream = events.filter_map(|result| async move {
        match result {
            Ok(event) => match Event::default().event(event.name()).json_data(&event) {
                Ok(sse) => Some(Ok::<_, Infallible>(sse)),
                Err(e) => {
                    log::warn!("[SSE] Failed to serialize event: {}", e);
                    None
                }
            },
            Err(e) => {
                log::warn!("[SSE] Subscriber fell behind: {}", e);
                None
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(SSE_KEEP_ALIVE_SECS))
            .text("keep-alive"),
    ))
}

/// Bounded raster for a node, or 404 when it has none.
async fn get_artwork(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(node_id): Path<String>,
) -> LecternResult<Response> {
    let caller = authorize(&state, &headers)?;
    match state.browse.artwork(&caller, &node_id).await? {
        Some(raster) => {
            log::debug!(
                "[Artwork] Serving {} ({}x{}, {} bytes)",
                node_id,
                raster.width,
                raster.height,
                raster.bytes.len()
            );
            Ok(([(header::CONTENT_TYPE, raster.mime)], raster.bytes).into_response())
        }
        None => Err(LecternError::NotFound(node_id)),
    }
}

#[derive(Debug, Deserialize)]
struct FocusReport {
    change: FocusChange,
}

/// Host-reported audio focus change.
async fn post_focus(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(report): Json<FocusReport>,
) -> LecternResult<StatusCode> {
    authorize(&state, &headers)?;
    state.session.report_focus_change(report.change).await?;
    Ok(StatusCode::ACCEPTED)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::Value;
    use tokio::net::TcpListener;

    use crate::api::serve;
    use crate::bootstrap::{bootstrap_services, BootstrappedServices, HostServices};
    use crate::services::PlaybackState;
    use crate::state::Config;
    use crate::test_support::{sample_library, MockEngine, ScriptedBroker};

    use super::*;

    const GEARHEAD: &str = "com.google.android.projection.gearhead";

    struct TestServer {
        base: String,
        client: reqwest::Client,
        services: BootstrappedServices,
    }

    impl TestServer {
        async fn start() -> Self {
            let services = bootstrap_services(
                &Config::default(),
                HostServices {
                    library: Arc::new(sample_library()),
                    engine: Arc::new(MockEngine::new()),
                    broker: Arc::new(ScriptedBroker::granting()),
                },
            )
            .unwrap();
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let base = format!("http://{}", listener.local_addr().unwrap());
            let cancel = services.cancel_token.clone();
            tokio::spawn(serve(listener, services.state.clone(), async move {
                cancel.cancelled().await
            }));
            Self {
                base,
                client: reqwest::Client::new(),
                services,
            }
        }

        fn get(&self, path: &str, caller: Option<&str>) -> reqwest::RequestBuilder {
            let req = self.client.get(format!("{}{}", self.base, path));
            match caller {
                Some(c) => req.header(CALLER_HEADER, c),
                None => req,
            }
        }

        fn post(&self, path: &str, caller: &str, body: &str) -> reqwest::RequestBuilder {
            self.client
                .post(format!("{}{}", self.base, path))
                .header(CALLER_HEADER, caller)
                .header(header::CONTENT_TYPE.as_str(), "application/json")
                .body(body.to_string())
        }
    }

    #[tokio::test]
    async fn health_reports_service_identity() {
        let server = TestServer::start().await;
        let body: Value = server
            .get("/health", None)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], APP_NAME);
        assert_eq!(body["connections"], 0);
        server.services.shutdown().await;
    }

    #[tokio::test]
    async fn root_requires_an_allowed_caller() {
        let server = TestServer::start().await;

        let anonymous = server.get("/api/browse/root", None).send().await.unwrap();
        assert_eq!(anonymous.status().as_u16(), 403);
        let body: Value = anonymous.json().await.unwrap();
        assert_eq!(body["error"], "unauthorized");

        let stranger = server
            .get("/api/browse/root", Some("com.example.spy"))
            .send()
            .await
            .unwrap();
        assert_eq!(stranger.status().as_u16(), 403);

        let accepted: Value = server
            .get("/api/browse/root", Some(GEARHEAD))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(accepted["rootId"], "root");
        assert_eq!(accepted["hints"]["browsable"], "grid");
        server.services.shutdown().await;
    }

    #[tokio::test]
    async fn children_are_paged() {
        let server = TestServer::start().await;
        let body: Value = server
            .get("/api/browse/root/children?page=1&pageSize=2", Some(GEARHEAD))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let ids: Vec<&str> = body["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|n| n["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, ["library", "by-author"]);

        let denied = server
            .get("/api/browse/library/children", None)
            .send()
            .await
            .unwrap();
        assert_eq!(denied.status().as_u16(), 403);
        server.services.shutdown().await;
    }

    #[tokio::test]
    async fn item_lookup_distinguishes_missing_from_malformed() {
        let server = TestServer::start().await;

        let found: Value = server
            .get("/api/browse/item:dune", Some(GEARHEAD))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(found["title"], "Dune");
        assert_eq!(found["kind"], "playable");

        let missing = server
            .get("/api/browse/item:nope", Some(GEARHEAD))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status().as_u16(), 404);

        let malformed = server
            .get("/api/browse/bogus", Some(GEARHEAD))
            .send()
            .await
            .unwrap();
        assert_eq!(malformed.status().as_u16(), 400);
        server.services.shutdown().await;
    }

    #[tokio::test]
    async fn search_returns_ranked_items() {
        let server = TestServer::start().await;
        let body: Value = server
            .get("/api/search?q=dune", Some(GEARHEAD))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["items"][0]["id"], "item:dune");
        server.services.shutdown().await;
    }

    #[tokio::test]
    async fn commands_are_always_accepted() {
        let server = TestServer::start().await;

        let dropped = server
            .post("/api/commands", "com.example.spy", r#"{"command":"playById","id":"item:dune"}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(dropped.status().as_u16(), 202);

        let garbage = server
            .post("/api/commands", GEARHEAD, "not json")
            .send()
            .await
            .unwrap();
        assert_eq!(garbage.status().as_u16(), 202);

        let snapshot = server.services.session.snapshot().await.unwrap();
        assert_eq!(snapshot.state, PlaybackState::Idle);

        let accepted = server
            .post("/api/commands", GEARHEAD, r#"{"command":"playById","id":"item:dune"}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(accepted.status().as_u16(), 202);
        let snapshot: Value = server
            .get("/api/session", Some(GEARHEAD))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(snapshot["activeItemId"], "dune");

        let now_playing: Value = server
            .get("/api/browse/now-playing/children", Some(GEARHEAD))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(now_playing["items"][0]["id"], "chapter:dune:0");
        server.services.shutdown().await;
    }

    #[tokio::test]
    async fn artwork_is_404_without_a_source() {
        let server = TestServer::start().await;
        let response = server
            .get("/api/artwork/item:dune", Some(GEARHEAD))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 404);
        server.services.shutdown().await;
    }

    #[tokio::test]
    async fn focus_reports_reach_the_session() {
        let server = TestServer::start().await;
        let mut events = server.services.event_bridge.subscribe();

        let response = server
            .post("/api/focus", GEARHEAD, r#"{"change":"lostTransientCanDuck"}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 202);

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.name(), "focus.changed");
        server.services.shutdown().await;
    }
}
