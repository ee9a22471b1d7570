//! WebSocket protocol for remote controllers.
//!
//! A controller must complete a `HANDSHAKE` before it can browse, issue
//! commands or receive broadcast events. Rejected handshakes get a bare
//! `REJECTED` and the socket closes.

use std::time::{Duration, Instant};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;

use crate::api::ws_connection::ConnectionGuard;
use crate::api::AppState;
use crate::auth::{AuthorizedCaller, CallerIdentity};
use crate::catalog::Page;
use crate::protocol_constants::{WS_HEARTBEAT_CHECK_INTERVAL_SECS, WS_HEARTBEAT_TIMEOUT_SECS};
use crate::services::{BrowseNode, Connection, PlaybackSnapshot, RemoteCommand, RootHandle};

// ─────────────────────────────────────────────────────────────────────────────
// Message Types
// ─────────────────────────────────────────────────────────────────────────────

/// Messages received from controllers.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum WsIncoming {
    Handshake { payload: HandshakeRequest },
    Heartbeat,
    GetChildren { payload: GetChildrenRequest },
    GetItem { payload: GetItemRequest },
    Search { payload: SearchRequest },
    Command { payload: RemoteCommand },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HandshakeRequest {
    caller_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetChildrenRequest {
    node_id: String,
    page: Option<usize>,
    page_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetItemRequest {
    node_id: String,
}

#[derive(Debug, Deserialize)]
struct SearchRequest {
    query: String,
}

/// Messages sent to controllers.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum WsOutgoing {
    HandshakeAck { payload: HandshakeAckPayload },
    Rejected,
    HeartbeatAck,
    Children { payload: ChildrenPayload },
    Item { payload: ItemPayload },
    SearchResults { payload: SearchResultsPayload },
    Error { payload: ErrorPayload },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HandshakeAckPayload {
    root: RootHandle,
    #[serde(skip_serializing_if = "Option::is_none")]
    snapshot: Option<PlaybackSnapshot>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChildrenPayload {
    node_id: String,
    items: Vec<BrowseNode>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ItemPayload {
    node_id: String,
    item: Option<BrowseNode>,
}

#[derive(Debug, Serialize)]
struct SearchResultsPayload {
    query: String,
    items: Vec<BrowseNode>,
}

#[derive(Debug, Serialize)]
struct ErrorPayload {
    message: String,
}

impl WsOutgoing {
    fn error(message: impl Into<String>) -> Self {
        Self::Error {
            payload: ErrorPayload {
                message: message.into(),
            },
        }
    }

    /// Serializes the message to a WebSocket text message.
    fn to_message(&self) -> Option<Message> {
        serde_json::to_string(self)
            .ok()
            .map(|s| Message::Text(s.into()))
    }
}

/// What the connection loop does after handling one message.
#[derive(Debug)]
enum Reply {
    None,
    Send(WsOutgoing),
    /// Send, then close the socket.
    Close(WsOutgoing),
}

// ─────────────────────────────────────────────────────────────────────────────
// Message Handling
// ─────────────────────────────────────────────────────────────────────────────

/// Handles one parsed message. `caller` is set by an accepted handshake.
async fn handle_message(
    state: &AppState,
    conn: &ConnectionGuard,
    caller: &mut Option<AuthorizedCaller>,
    incoming: WsIncoming,
) -> Reply {
    match incoming {
        WsIncoming::Handshake { payload } => {
            let identity = CallerIdentity::new(payload.caller_id);
            match state.browse.connect(&identity) {
                Connection::Accepted { caller: accepted, root } => {
                    conn.set_caller(identity);
                    *caller = Some(accepted);
                    let snapshot = state.session.snapshot().await.ok();
                    Reply::Send(WsOutgoing::HandshakeAck {
                        payload: HandshakeAckPayload { root, snapshot },
                    })
                }
                Connection::Rejected => {
                    *caller = None;
                    Reply::Close(WsOutgoing::Rejected)
                }
            }
        }
        WsIncoming::Heartbeat => Reply::Send(WsOutgoing::HeartbeatAck),
        WsIncoming::Command { payload } => {
            match caller {
                Some(caller) => {
                    let outcome = state.router.dispatch(caller.identity(), payload).await;
                    log::debug!("[WS] {} command: {:?}", conn.id(), outcome);
                }
                None => log::debug!("[WS] {} dropped command before handshake", conn.id()),
            }
            Reply::None
        }
        WsIncoming::GetChildren { payload } => {
            let Some(caller) = caller else {
                return Reply::Send(WsOutgoing::error("handshake required"));
            };
            let page = Page::from_params(payload.page, payload.page_size);
            match state
                .browse
                .get_children(caller, &payload.node_id, page)
                .await
            {
                Ok(items) => Reply::Send(WsOutgoing::Children {
                    payload: ChildrenPayload {
                        node_id: payload.node_id,
                        items,
                    },
                }),
                Err(e) => Reply::Send(WsOutgoing::error(e.to_string())),
            }
        }
        WsIncoming::GetItem { payload } => {
            let Some(caller) = caller else {
                return Reply::Send(WsOutgoing::error("handshake required"));
            };
            match state.browse.get_item(caller, &payload.node_id).await {
                Ok(item) => Reply::Send(WsOutgoing::Item {
                    payload: ItemPayload {
                        node_id: payload.node_id,
                        item,
                    },
                }),
                Err(e) => Reply::Send(WsOutgoing::error(e.to_string())),
            }
        }
        WsIncoming::Search { payload } => {
            let Some(caller) = caller else {
                return Reply::Send(WsOutgoing::error("handshake required"));
            };
            let items = state.browse.search(caller, &payload.query).await;
            Reply::Send(WsOutgoing::SearchResults {
                payload: SearchResultsPayload {
                    query: payload.query,
                    items,
                },
            })
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection Loop
// ─────────────────────────────────────────────────────────────────────────────

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut broadcast_rx = state.event_bridge.subscribe();
    let mut caller: Option<AuthorizedCaller> = None;
    let mut last_activity = Instant::now();

    let conn_guard = state.ws_manager.register();
    let cancel_token = conn_guard.cancel_token().clone();

    let mut heartbeat_interval =
        tokio::time::interval(Duration::from_secs(WS_HEARTBEAT_CHECK_INTERVAL_SECS));
    heartbeat_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                log::info!("[WS] Connection force-closed: {}", conn_guard.id());
                break;
            }
            msg = receiver.next() => {
                last_activity = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match serde_json::from_str::<WsIncoming>(&text) {
                            Ok(incoming) => {
                                handle_message(&state, &conn_guard, &mut caller, incoming).await
                            }
                            Err(e) => {
                                log::debug!("[WS] {} sent an invalid message: {}", conn_guard.id(), e);
                                Reply::Send(WsOutgoing::error("invalid message"))
                            }
                        };
                        match reply {
                            Reply::None => {}
                            Reply::Send(out) => {
                                if let Some(msg) = out.to_message() {
                                    if sender.send(msg).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Reply::Close(out) => {
                                if let Some(msg) = out.to_message() {
                                    let _ = sender.send(msg).await;
                                }
                                let _ = sender.send(Message::Close(None)).await;
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
            // Broadcast events, forwarded only once the handshake is accepted
            result = broadcast_rx.recv() => {
                match result {
                    Ok(event) if caller.is_some() => {
                        if let Ok(json) = serde_json::to_string(&event) {
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => {
                        log::warn!("[WS] {} skipped {} event(s)", conn_guard.id(), n);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            _ = heartbeat_interval.tick() => {
                if last_activity.elapsed() > Duration::from_secs(WS_HEARTBEAT_TIMEOUT_SECS) {
                    log::warn!("[WS] Heartbeat timeout: {}", conn_guard.id());
                    break;
                }
            }
        }
    }

    // ConnectionGuard's Drop unregisters the socket
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{json, Value};

    use super::*;
    use crate::bootstrap::{bootstrap_services, BootstrappedServices, HostServices};
    use crate::services::PlaybackState;
    use crate::state::Config;
    use crate::test_support::{sample_library, MockEngine, ScriptedBroker};

    const BLUETOOTH: &str = "com.android.bluetooth";

    fn services() -> BootstrappedServices {
        bootstrap_services(
            &Config::default(),
            HostServices {
                library: Arc::new(sample_library()),
                engine: Arc::new(MockEngine::new()),
                broker: Arc::new(ScriptedBroker::granting()),
            },
        )
        .unwrap()
    }

    fn parse(value: Value) -> WsIncoming {
        serde_json::from_value(value).unwrap()
    }

    fn handshake(caller_id: &str) -> WsIncoming {
        parse(json!({"type": "HANDSHAKE", "payload": {"callerId": caller_id}}))
    }

    fn sent(reply: Reply) -> Value {
        match reply {
            Reply::Send(out) => serde_json::to_value(out).unwrap(),
            other => panic!("expected a reply, got {other:?}"),
        }
    }

    #[test]
    fn incoming_messages_parse() {
        assert!(matches!(
            parse(json!({"type": "HEARTBEAT"})),
            WsIncoming::Heartbeat
        ));
        match parse(json!({
            "type": "GET_CHILDREN",
            "payload": {"nodeId": "library", "page": 1, "pageSize": 20}
        })) {
            WsIncoming::GetChildren { payload } => {
                assert_eq!(payload.node_id, "library");
                assert_eq!(payload.page, Some(1));
                assert_eq!(payload.page_size, Some(20));
            }
            other => panic!("unexpected {other:?}"),
        }
        match parse(json!({"type": "COMMAND", "payload": {"command": "seekTo", "positionMs": 42}})) {
            WsIncoming::Command { payload } => {
                assert_eq!(payload, RemoteCommand::SeekTo { position_ms: 42 })
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(serde_json::from_str::<WsIncoming>(r#"{"type":"SHUTDOWN"}"#).is_err());
    }

    #[test]
    fn outgoing_messages_use_type_and_payload() {
        let ack = serde_json::to_value(WsOutgoing::HeartbeatAck).unwrap();
        assert_eq!(ack, json!({"type": "HEARTBEAT_ACK"}));

        let err = serde_json::to_value(WsOutgoing::error("handshake required")).unwrap();
        assert_eq!(
            err,
            json!({"type": "ERROR", "payload": {"message": "handshake required"}})
        );
    }

    #[tokio::test]
    async fn browsing_requires_a_handshake() {
        let services = services();
        let conn = services.ws_manager.register();
        let mut caller = None;

        let reply = handle_message(
            &services.state,
            &conn,
            &mut caller,
            parse(json!({"type": "GET_ITEM", "payload": {"nodeId": "item:dune"}})),
        )
        .await;
        assert_eq!(sent(reply)["payload"]["message"], "handshake required");

        let reply = handle_message(
            &services.state,
            &conn,
            &mut caller,
            parse(json!({"type": "COMMAND", "payload": {"command": "playById", "id": "item:dune"}})),
        )
        .await;
        assert!(matches!(reply, Reply::None));
        let snapshot = services.session.snapshot().await.unwrap();
        assert_eq!(snapshot.state, PlaybackState::Idle);
        services.shutdown().await;
    }

    #[tokio::test]
    async fn rejected_handshake_closes_without_detail() {
        let services = services();
        let conn = services.ws_manager.register();
        let mut caller = None;

        let reply = handle_message(
            &services.state,
            &conn,
            &mut caller,
            handshake("com.example.spy"),
        )
        .await;
        match reply {
            Reply::Close(out) => {
                assert_eq!(serde_json::to_value(out).unwrap(), json!({"type": "REJECTED"}))
            }
            other => panic!("expected close, got {other:?}"),
        }
        assert!(caller.is_none());
        assert_eq!(services.ws_manager.authorized_count(), 0);
        services.shutdown().await;
    }

    #[tokio::test]
    async fn accepted_handshake_unlocks_browsing() {
        let services = services();
        let conn = services.ws_manager.register();
        let mut caller = None;

        let ack = sent(handle_message(&services.state, &conn, &mut caller, handshake(BLUETOOTH)).await);
        assert_eq!(ack["type"], "HANDSHAKE_ACK");
        assert_eq!(ack["payload"]["root"]["rootId"], "root");
        assert_eq!(ack["payload"]["snapshot"]["state"], "idle");
        assert_eq!(services.ws_manager.authorized_count(), 1);

        let children = sent(
            handle_message(
                &services.state,
                &conn,
                &mut caller,
                parse(json!({"type": "GET_CHILDREN", "payload": {"nodeId": "by-series"}})),
            )
            .await,
        );
        assert_eq!(children["type"], "CHILDREN");
        assert_eq!(children["payload"]["items"][0]["id"], "series:Earthsea");

        let item = sent(
            handle_message(
                &services.state,
                &conn,
                &mut caller,
                parse(json!({"type": "GET_ITEM", "payload": {"nodeId": "item:missing"}})),
            )
            .await,
        );
        assert_eq!(item["type"], "ITEM");
        assert_eq!(item["payload"]["item"], Value::Null);

        let results = sent(
            handle_message(
                &services.state,
                &conn,
                &mut caller,
                parse(json!({"type": "SEARCH", "payload": {"query": "hobbit"}})),
            )
            .await,
        );
        assert_eq!(results["payload"]["items"][0]["id"], "item:hobbit");
        services.shutdown().await;
    }

    #[tokio::test]
    async fn malformed_node_ids_are_reported() {
        let services = services();
        let conn = services.ws_manager.register();
        let mut caller = None;
        handle_message(&services.state, &conn, &mut caller, handshake(BLUETOOTH)).await;

        let reply = sent(
            handle_message(
                &services.state,
                &conn,
                &mut caller,
                parse(json!({"type": "GET_CHILDREN", "payload": {"nodeId": "nonsense"}})),
            )
            .await,
        );
        assert_eq!(reply["type"], "ERROR");
        services.shutdown().await;
    }

    #[tokio::test]
    async fn commands_after_handshake_reach_the_session() {
        let services = services();
        let conn = services.ws_manager.register();
        let mut caller = None;
        handle_message(&services.state, &conn, &mut caller, handshake(BLUETOOTH)).await;

        let reply = handle_message(
            &services.state,
            &conn,
            &mut caller,
            parse(json!({"type": "COMMAND", "payload": {"command": "playById", "id": "item:hobbit"}})),
        )
        .await;
        assert!(matches!(reply, Reply::None));
        let snapshot = services.session.snapshot().await.unwrap();
        assert_eq!(snapshot.active_item_id.as_deref(), Some("hobbit"));
        services.shutdown().await;
    }
}
