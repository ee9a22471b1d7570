//! Protocol-facing browse front end.
//!
//! Owns the connection handshake and decorates catalog nodes with bounded
//! artwork. Every browse call takes an [`AuthorizedCaller`], so nothing here
//! is reachable without passing the allow-list first.

use std::sync::Arc;

use base64::Engine as _;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use uuid::Uuid;

use crate::artwork::{is_remote_ref, Artwork, ArtworkTranscoder, RasterImage};
use crate::auth::{AuthorizedCaller, CallerAllowList, CallerIdentity};
use crate::catalog::{CatalogNode, ContentTreeBuilder, NodeId, NodeKind, Page};
use crate::error::{LecternError, LecternResult};
use crate::protocol_constants::{ARTWORK_RESOLVE_CONCURRENCY, MAX_ARTWORK_DIM, NODE_ROOT};

/// Default number of resolved artwork entries kept in memory.
const DEFAULT_ARTWORK_CACHE_ENTRIES: usize = 128;

// ─────────────────────────────────────────────────────────────────────────────
// Wire Types
// ─────────────────────────────────────────────────────────────────────────────

/// Layout hints for the controller's renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentationHints {
    pub browsable: &'static str,
    pub playable: &'static str,
}

impl Default for PresentationHints {
    fn default() -> Self {
        Self {
            browsable: "grid",
            playable: "list",
        }
    }
}

/// Returned to an accepted controller.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RootHandle {
    pub root_id: String,
    pub connection_id: String,
    pub hints: PresentationHints,
}

/// Result of a connection handshake.
#[derive(Debug, Clone)]
pub enum Connection {
    Accepted {
        caller: AuthorizedCaller,
        root: RootHandle,
    },
    /// Carries nothing: rejected callers learn only that they were rejected.
    Rejected,
}

/// Inline artwork, base64-encoded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtworkPayload {
    pub width: u32,
    pub height: u32,
    pub mime: &'static str,
    pub data: String,
}

impl From<&RasterImage> for ArtworkPayload {
    fn from(raster: &RasterImage) -> Self {
        Self {
            width: raster.width,
            height: raster.height,
            mime: raster.mime,
            data: base64::engine::general_purpose::STANDARD.encode(&raster.bytes),
        }
    }
}

/// A catalog node as sent to controllers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowseNode {
    #[serde(flatten)]
    pub node: CatalogNode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artwork: Option<ArtworkPayload>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Server
// ─────────────────────────────────────────────────────────────────────────────

pub struct BrowseServer {
    allow_list: Arc<CallerAllowList>,
    catalog: Arc<ContentTreeBuilder>,
    transcoder: Arc<ArtworkTranscoder>,
    max_artwork_dim: u32,
    /// Resolved artwork by source reference, failures included.
    artwork_cache: DashMap<String, Artwork>,
    cache_capacity: usize,
}

impl BrowseServer {
    pub fn new(
        allow_list: Arc<CallerAllowList>,
        catalog: Arc<ContentTreeBuilder>,
        transcoder: Arc<ArtworkTranscoder>,
    ) -> Self {
        Self {
            allow_list,
            catalog,
            transcoder,
            max_artwork_dim: MAX_ARTWORK_DIM,
            artwork_cache: DashMap::new(),
            cache_capacity: DEFAULT_ARTWORK_CACHE_ENTRIES,
        }
    }

    pub fn with_max_artwork_dim(mut self, max_dim: u32) -> Self {
        self.max_artwork_dim = max_dim.max(1);
        self
    }

    /// Caps the artwork cache; 0 disables caching.
    pub fn with_cache_capacity(mut self, entries: usize) -> Self {
        self.cache_capacity = entries;
        self
    }

    /// Authorizes a connecting controller.
    pub fn connect(&self, caller: &CallerIdentity) -> Connection {
        match self.allow_list.authorize(caller) {
            Ok(caller) => {
                let root = RootHandle {
                    root_id: NODE_ROOT.to_string(),
                    connection_id: Uuid::new_v4().to_string(),
                    hints: PresentationHints::default(),
                };
                log::info!(
                    "[Browse] Accepted {} as {}",
                    caller.identity(),
                    root.connection_id
                );
                Connection::Accepted { caller, root }
            }
            Err(_) => {
                log::warn!("[Browse] Rejected connection from {}", caller);
                Connection::Rejected
            }
        }
    }

    pub async fn get_children(
        &self,
        _caller: &AuthorizedCaller,
        node_id: &str,
        page: Option<Page>,
    ) -> LecternResult<Vec<BrowseNode>> {
        let id = parse_node_id(node_id)?;
        let nodes = self.catalog.children(&id, page).await;
        Ok(self.attach_artwork(nodes).await)
    }

    /// `Ok(None)` when the id is well-formed but does not resolve.
    pub async fn get_item(
        &self,
        _caller: &AuthorizedCaller,
        node_id: &str,
    ) -> LecternResult<Option<BrowseNode>> {
        let id = parse_node_id(node_id)?;
        let Some(node) = self.catalog.item(&id).await else {
            return Ok(None);
        };
        Ok(self.attach_artwork(vec![node]).await.pop())
    }

    pub async fn search(&self, _caller: &AuthorizedCaller, query: &str) -> Vec<BrowseNode> {
        let nodes = self.catalog.search(query).await;
        self.attach_artwork(nodes).await
    }

    /// Bounded raster for a node's artwork, if it has any.
    pub async fn artwork(
        &self,
        _caller: &AuthorizedCaller,
        node_id: &str,
    ) -> LecternResult<Option<RasterImage>> {
        let id = parse_node_id(node_id)?;
        let source_ref = self
            .catalog
            .item(&id)
            .await
            .and_then(|node| node.artwork_ref);
        let Some(source_ref) = source_ref else {
            return Ok(None);
        };
        Ok(self.resolve_cached(&source_ref).await.raster().cloned())
    }

    /// Resolves artwork for playable nodes, a few at a time, keeping order.
    async fn attach_artwork(&self, nodes: Vec<CatalogNode>) -> Vec<BrowseNode> {
        stream::iter(nodes)
            .map(|node| async move {
                let artwork = match (&node.kind, &node.artwork_ref) {
                    (NodeKind::Playable, Some(source_ref)) => self
                        .resolve_cached(source_ref)
                        .await
                        .raster()
                        .map(ArtworkPayload::from),
                    _ => None,
                };
                BrowseNode { node, artwork }
            })
            .buffered(ARTWORK_RESOLVE_CONCURRENCY)
            .collect()
            .await
    }

    async fn resolve_cached(&self, source_ref: &str) -> Artwork {
        if let Some(hit) = self.artwork_cache.get(source_ref) {
            return hit.value().clone();
        }

        let artwork = self
            .transcoder
            .resolve(source_ref, self.max_artwork_dim)
            .await;

        // Remote failures may be transient; only local ones are remembered.
        if artwork == Artwork::Unavailable && is_remote_ref(source_ref) {
            return artwork;
        }

        if self.cache_capacity > 0 {
            if self.artwork_cache.len() >= self.cache_capacity {
                let victim = self
                    .artwork_cache
                    .iter()
                    .next()
                    .map(|entry| entry.key().clone());
                if let Some(victim) = victim {
                    self.artwork_cache.remove(&victim);
                }
            }
            self.artwork_cache
                .insert(source_ref.to_string(), artwork.clone());
        }
        artwork
    }

    /// Number of cached artwork entries.
    pub fn cached_artwork(&self) -> usize {
        self.artwork_cache.len()
    }
}

fn parse_node_id(raw: &str) -> LecternResult<NodeId> {
    NodeId::parse(raw)
        .ok_or_else(|| LecternError::InvalidRequest(format!("malformed node id: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::InMemoryLibrary;
    use crate::protocol_constants::SELF_IDENTITY;
    use crate::test_support::{item, sample_library};
    use image::{Rgb, RgbImage};

    fn server_with(library: InMemoryLibrary) -> BrowseServer {
        BrowseServer::new(
            Arc::new(CallerAllowList::with_defaults()),
            Arc::new(ContentTreeBuilder::new(Arc::new(library))),
            Arc::new(ArtworkTranscoder::new(reqwest::Client::new())),
        )
    }

    fn accepted(server: &BrowseServer) -> AuthorizedCaller {
        match server.connect(&CallerIdentity::new(SELF_IDENTITY)) {
            Connection::Accepted { caller, .. } => caller,
            Connection::Rejected => panic!("self identity rejected"),
        }
    }

    #[test]
    fn unauthorized_connect_is_rejected() {
        let server = server_with(sample_library());
        let outcome = server.connect(&CallerIdentity::new("com.example.spy"));
        assert!(matches!(outcome, Connection::Rejected));
    }

    #[test]
    fn accepted_connect_returns_root_handle_with_hints() {
        let server = server_with(sample_library());
        let caller = CallerIdentity::new("com.google.android.projection.gearhead");
        let Connection::Accepted { root, .. } = server.connect(&caller) else {
            panic!("expected acceptance");
        };
        assert_eq!(root.root_id, "root");
        assert!(Uuid::parse_str(&root.connection_id).is_ok());
        assert_eq!(root.hints.browsable, "grid");
        assert_eq!(root.hints.playable, "list");
    }

    #[tokio::test]
    async fn playable_nodes_carry_bounded_inline_artwork() {
        let dir = tempfile::tempdir().unwrap();
        let cover = dir.path().join("cover.jpg");
        RgbImage::from_pixel(2048, 1024, Rgb([200, 40, 40]))
            .save(&cover)
            .unwrap();

        let mut record = item("b1", "Cover Story", "Anon");
        record.artwork_ref = Some(cover.to_string_lossy().into_owned());
        let server = server_with(InMemoryLibrary::from_records(vec![record]));
        let caller = accepted(&server);

        let nodes = server.get_children(&caller, "library", None).await.unwrap();
        let node = nodes[0].node.clone();
        let payload = nodes[0].artwork.as_ref().unwrap();
        assert_eq!((payload.width, payload.height), (512, 256));
        assert_eq!(payload.mime, "image/jpeg");
        assert!(!payload.data.is_empty());
        assert_eq!(server.cached_artwork(), 1);

        let json = serde_json::to_value(&nodes[0]).unwrap();
        assert_eq!(json["id"], node.id);
        assert!(json["artwork"]["data"].is_string());
        assert!(json.get("artworkRef").is_none());
    }

    #[tokio::test]
    async fn missing_artwork_is_omitted_and_browsable_nodes_skip_it() {
        let mut record = item("b1", "Lost Cover", "Anon");
        record.artwork_ref = Some("/no/such/cover.jpg".into());
        let server = server_with(InMemoryLibrary::from_records(vec![record]));
        let caller = accepted(&server);

        let nodes = server.get_children(&caller, "library", None).await.unwrap();
        assert!(nodes[0].artwork.is_none());

        let root = server.get_children(&caller, "root", None).await.unwrap();
        assert!(root.iter().all(|n| n.artwork.is_none()));
        assert_eq!(server.cached_artwork(), 1);
    }

    #[tokio::test]
    async fn unreachable_remote_artwork_is_not_cached() {
        let mut remote = item("r", "Remote Cover", "Anon");
        remote.artwork_ref = Some("http://127.0.0.1:9/cover.jpg".into());
        let mut local = item("l", "Local Cover", "Anon");
        local.artwork_ref = Some("/no/such/cover.jpg".into());
        let server = server_with(InMemoryLibrary::from_records(vec![remote, local]));
        let caller = accepted(&server);

        let nodes = server.get_children(&caller, "library", None).await.unwrap();
        assert!(nodes.iter().all(|n| n.artwork.is_none()));
        // Only the missing file is remembered; the remote is retried next time.
        assert_eq!(server.cached_artwork(), 1);
        assert!(server
            .artwork(&caller, "item:r")
            .await
            .unwrap()
            .is_none());
        assert_eq!(server.cached_artwork(), 1);
    }

    #[tokio::test]
    async fn cache_stays_within_capacity() {
        let records = (0..5)
            .map(|i| {
                let mut r = item(&format!("b{i}"), &format!("Book {i}"), "Anon");
                r.artwork_ref = Some(format!("/missing/{i}.jpg"));
                r
            })
            .collect();
        let server =
            server_with(InMemoryLibrary::from_records(records)).with_cache_capacity(2);
        let caller = accepted(&server);
        server.get_children(&caller, "library", None).await.unwrap();
        assert!(server.cached_artwork() <= 2);
    }

    #[tokio::test]
    async fn malformed_ids_are_invalid_and_unknown_ids_absent() {
        let server = server_with(sample_library());
        let caller = accepted(&server);

        let err = server.get_item(&caller, "podcasts").await.unwrap_err();
        assert!(matches!(err, LecternError::InvalidRequest(_)));
        assert!(server
            .get_item(&caller, "item:missing")
            .await
            .unwrap()
            .is_none());

        let dune = server.get_item(&caller, "item:dune").await.unwrap().unwrap();
        assert_eq!(dune.node.title, "Dune");
    }

    #[tokio::test]
    async fn search_delegates_to_catalog() {
        let server = server_with(sample_library());
        let caller = accepted(&server);
        let results = server.search(&caller, "hobbit").await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].node.id, "item:hobbit");
    }
}
