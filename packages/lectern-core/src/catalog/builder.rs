//! Shapes library records into browse-tree nodes.
//!
//! Every public operation here is infallible from the caller's point of view:
//! repository failures degrade to an empty-placeholder node so the remote
//! renderer always has something to draw.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;

use super::node::{CatalogNode, NodeId, NodeKind};
use crate::library::{ItemFilter, ItemRecord, LibraryRepository, LibraryResult};
use crate::protocol_constants::{RECENT_ITEM_LIMIT, SEARCH_RESULT_LIMIT};
use crate::utils::{format_duration, format_remaining, progress_percent};

const SEARCH_CONTEXT: &str = "search";
const UNAVAILABLE_CONTEXT: &str = "unavailable";

/// A zero-based page of children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub index: usize,
    pub size: usize,
}

impl Page {
    /// Builds a page from optional wire parameters.
    ///
    /// A missing or zero page size means "everything".
    pub fn from_params(index: Option<usize>, size: Option<usize>) -> Option<Self> {
        match size {
            Some(size) if size > 0 => Some(Self {
                index: index.unwrap_or(0),
                size,
            }),
            _ => None,
        }
    }

    fn apply(self, nodes: Vec<CatalogNode>) -> Vec<CatalogNode> {
        nodes
            .into_iter()
            .skip(self.index.saturating_mul(self.size))
            .take(self.size)
            .collect()
    }
}

/// What the playback session needs to start an item.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayableTarget {
    pub item: ItemRecord,
    /// Where playback begins within the item.
    pub start_ms: u64,
    /// Set when the target is a chapter.
    pub chapter_index: Option<usize>,
}

/// Answers children / item / search queries against the library.
pub struct ContentTreeBuilder {
    library: Arc<dyn LibraryRepository>,
    search_limit: usize,
    /// Item id of the session's active item, written by the session.
    now_playing: watch::Sender<Option<String>>,
}

impl ContentTreeBuilder {
    pub fn new(library: Arc<dyn LibraryRepository>) -> Self {
        let (now_playing, _) = watch::channel(None);
        Self {
            library,
            search_limit: SEARCH_RESULT_LIMIT,
            now_playing,
        }
    }

    /// Overrides the search result cap.
    pub fn with_search_limit(mut self, limit: usize) -> Self {
        self.search_limit = limit.max(1);
        self
    }

    /// Records the item the session is on; `None` hides "Now Playing".
    pub fn set_now_playing(&self, item_id: Option<String>) {
        self.now_playing.send_if_modified(|current| {
            if *current == item_id {
                return false;
            }
            *current = item_id;
            true
        });
    }

    pub fn now_playing(&self) -> Option<String> {
        self.now_playing.borrow().clone()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Public Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Children of `id`, sorted and paged.
    ///
    /// An empty set yields a single placeholder rather than nothing. A page
    /// past the end of a non-empty set is empty.
    pub async fn children(&self, id: &NodeId, page: Option<Page>) -> Vec<CatalogNode> {
        let nodes = match self.try_children(id).await {
            Ok(nodes) if nodes.is_empty() => return vec![placeholder_for(&id.to_string())],
            Ok(nodes) => nodes,
            Err(e) => {
                log::warn!("[Catalog] children({}) failed: {}", id, e);
                return vec![placeholder_for(UNAVAILABLE_CONTEXT)];
            }
        };
        match page {
            Some(page) => page.apply(nodes),
            None => nodes,
        }
    }

    /// Single node lookup. `None` means the id does not resolve.
    pub async fn item(&self, id: &NodeId) -> Option<CatalogNode> {
        match self.try_item(id).await {
            Ok(node) => node,
            Err(e) => {
                log::warn!("[Catalog] item({}) failed: {}", id, e);
                Some(placeholder_for(UNAVAILABLE_CONTEXT))
            }
        }
    }

    /// Case-insensitive search ranked exact title, then title prefix, then
    /// any other substring match.
    pub async fn search(&self, query: &str) -> Vec<CatalogNode> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return vec![placeholder_for(SEARCH_CONTEXT)];
        }

        let items = match self.library.search_by_title_author_series(&needle).await {
            Ok(items) => items,
            Err(e) => {
                log::warn!("[Catalog] search({:?}) failed: {}", query, e);
                return vec![placeholder_for(UNAVAILABLE_CONTEXT)];
            }
        };

        let mut ranked: Vec<(u8, String, ItemRecord)> = items
            .into_iter()
            .map(|item| {
                let title = item.title.to_lowercase();
                (match_rank(&title, &needle), title, item)
            })
            .collect();
        ranked.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        ranked.truncate(self.search_limit);

        if ranked.is_empty() {
            return vec![placeholder_for(SEARCH_CONTEXT)];
        }
        ranked.iter().map(|(_, _, item)| item_node(item)).collect()
    }

    /// Resolves a playable id to its item and start offset.
    ///
    /// Items resume from their saved position unless finished; chapters
    /// start at the chapter boundary.
    pub async fn resolve_playable(&self, id: &NodeId) -> LibraryResult<Option<PlayableTarget>> {
        let Some(item_id) = id.item_id() else {
            return Ok(None);
        };
        let Some(item) = self.library.get_item_by_id(item_id).await? else {
            return Ok(None);
        };

        let (start_ms, chapter_index) = match id {
            NodeId::Chapter { index, .. } => match chapter_span(&item, *index) {
                Some((start, _)) => (start, Some(*index)),
                None => return Ok(None),
            },
            _ if item.finished => (0, None),
            _ => (item.progress_ms.min(item.duration_ms), None),
        };
        Ok(Some(PlayableTarget {
            item,
            start_ms,
            chapter_index,
        }))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Resolution
    // ─────────────────────────────────────────────────────────────────────────

    async fn try_children(&self, id: &NodeId) -> LibraryResult<Vec<CatalogNode>> {
        let nodes = match id {
            NodeId::Root => {
                let mut nodes = Vec::with_capacity(6);
                nodes.extend(self.now_playing_entry().await);
                nodes.extend(root_entries());
                nodes
            }
            NodeId::NowPlaying => match self.now_playing_item().await? {
                Some(item) if item.chapters.is_empty() => vec![item_node(&item)],
                Some(item) => (0..item.chapters.len())
                    .filter_map(|k| chapter_node(&item, k))
                    .collect(),
                None => Vec::new(),
            },
            NodeId::Continue => self
                .library
                .most_recent_in_progress()
                .await?
                .iter()
                .map(item_node)
                .collect(),
            NodeId::Recent => {
                let mut items = self.library.list_all(&ItemFilter::played()).await?;
                items.sort_by(|a, b| b.last_played_ms.cmp(&a.last_played_ms));
                items.truncate(RECENT_ITEM_LIMIT);
                items.iter().map(item_node).collect()
            }
            NodeId::Library => self.items_by_title(&ItemFilter::default()).await?,
            NodeId::ByAuthor => {
                let names = self.library.distinct_authors().await?;
                self.groupings(names, NodeId::Author, |i| Some(i.author.as_str()))
                    .await?
            }
            NodeId::BySeries => {
                let names = self.library.distinct_series().await?;
                self.groupings(names, NodeId::Series, |i| i.series.as_deref())
                    .await?
            }
            NodeId::Author(name) => self.items_by_title(&ItemFilter::by_author(name)).await?,
            NodeId::Series(name) => self.items_by_title(&ItemFilter::by_series(name)).await?,
            NodeId::Item(item_id) => match self.library.get_item_by_id(item_id).await? {
                Some(item) => (0..item.chapters.len())
                    .filter_map(|k| chapter_node(&item, k))
                    .collect(),
                None => Vec::new(),
            },
            NodeId::Chapter { .. } | NodeId::Empty(_) => Vec::new(),
        };
        Ok(nodes)
    }

    async fn try_item(&self, id: &NodeId) -> LibraryResult<Option<CatalogNode>> {
        let node = match id {
            NodeId::Root => Some(CatalogNode::browsable(id, "Lectern")),
            NodeId::NowPlaying => self
                .now_playing_item()
                .await?
                .map(|item| now_playing_node(&item)),
            NodeId::Continue
            | NodeId::Recent
            | NodeId::Library
            | NodeId::ByAuthor
            | NodeId::BySeries => root_entries().into_iter().find(|n| n.id == id.to_string()),
            NodeId::Author(name) => {
                let items = self.library.list_all(&ItemFilter::by_author(name)).await?;
                grouping_node(id, name, items.len())
            }
            NodeId::Series(name) => {
                let items = self.library.list_all(&ItemFilter::by_series(name)).await?;
                grouping_node(id, name, items.len())
            }
            NodeId::Item(item_id) => self
                .library
                .get_item_by_id(item_id)
                .await?
                .map(|item| item_node(&item)),
            NodeId::Chapter { item_id, index } => self
                .library
                .get_item_by_id(item_id)
                .await?
                .and_then(|item| chapter_node(&item, *index)),
            NodeId::Empty(context) => Some(placeholder_for(context)),
        };
        Ok(node)
    }

    async fn now_playing_item(&self) -> LibraryResult<Option<ItemRecord>> {
        match self.now_playing() {
            Some(item_id) => self.library.get_item_by_id(&item_id).await,
            None => Ok(None),
        }
    }

    /// The "Now Playing" root entry. Omitted, not failed, when the library
    /// cannot resolve the active item.
    async fn now_playing_entry(&self) -> Option<CatalogNode> {
        match self.now_playing_item().await {
            Ok(item) => item.map(|item| now_playing_node(&item)),
            Err(e) => {
                log::warn!("[Catalog] Now playing lookup failed: {}", e);
                None
            }
        }
    }

    async fn items_by_title(&self, filter: &ItemFilter) -> LibraryResult<Vec<CatalogNode>> {
        let mut items = self.library.list_all(filter).await?;
        items.sort_by_cached_key(|i| i.title.to_lowercase());
        Ok(items.iter().map(item_node).collect())
    }

    /// One browsable node per name, annotated with its item count.
    async fn groupings<F, K>(
        &self,
        mut names: Vec<String>,
        make_id: K,
        name_of: F,
    ) -> LibraryResult<Vec<CatalogNode>>
    where
        F: Fn(&ItemRecord) -> Option<&str>,
        K: Fn(String) -> NodeId,
    {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for item in self.library.list_all(&ItemFilter::default()).await? {
            if let Some(name) = name_of(&item) {
                *counts.entry(name.trim().to_lowercase()).or_default() += 1;
            }
        }

        names.sort_by_cached_key(|n| n.to_lowercase());
        Ok(names
            .into_iter()
            .filter_map(|name| {
                let count = counts.get(&name.to_lowercase()).copied().unwrap_or(0);
                let id = make_id(name.clone());
                grouping_node(&id, &name, count)
            })
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Node Shaping
// ─────────────────────────────────────────────────────────────────────────────

fn match_rank(title: &str, needle: &str) -> u8 {
    if title == needle {
        0
    } else if title.starts_with(needle) {
        1
    } else if title.contains(needle) {
        2
    } else {
        3
    }
}

fn root_entries() -> Vec<CatalogNode> {
    [
        (NodeId::Continue, "Continue Listening"),
        (NodeId::Recent, "Recently Played"),
        (NodeId::Library, "All Books"),
        (NodeId::ByAuthor, "Authors"),
        (NodeId::BySeries, "Series"),
    ]
    .iter()
    .map(|(id, title)| CatalogNode::browsable(id, *title))
    .collect()
}

fn now_playing_node(item: &ItemRecord) -> CatalogNode {
    CatalogNode::browsable(&NodeId::NowPlaying, "Now Playing").with_subtitle(item.title.clone())
}

fn grouping_node(id: &NodeId, name: &str, count: usize) -> Option<CatalogNode> {
    if count == 0 {
        return None;
    }
    let noun = if count == 1 { "book" } else { "books" };
    Some(CatalogNode::browsable(id, name).with_subtitle(format!("{} {}", count, noun)))
}

fn item_subtitle(item: &ItemRecord) -> Option<String> {
    let author = item.author.trim();
    let status = if item.finished {
        Some("Finished".to_string())
    } else if item.progress_ms > 0 {
        Some(format!(
            "{}% • {} left",
            progress_percent(item.progress_ms, item.duration_ms),
            format_remaining(item.remaining_ms())
        ))
    } else {
        None
    };
    match (author.is_empty(), status) {
        (true, None) => None,
        (true, Some(status)) => Some(status),
        (false, None) => Some(author.to_string()),
        (false, Some(status)) => Some(format!("{} • {}", author, status)),
    }
}

pub(crate) fn item_node(item: &ItemRecord) -> CatalogNode {
    CatalogNode {
        id: NodeId::Item(item.id.clone()).to_string(),
        title: item.title.clone(),
        subtitle: item_subtitle(item),
        kind: NodeKind::Playable,
        artwork_ref: item.artwork_ref.clone(),
        duration_ms: Some(item.duration_ms),
    }
}

/// Start offset and length of chapter `index`, both clamped to the item.
pub(crate) fn chapter_span(item: &ItemRecord, index: usize) -> Option<(u64, u64)> {
    let chapter = item.chapters.get(index)?;
    let start = chapter.start_ms.min(item.duration_ms);
    let end = item
        .chapters
        .get(index + 1)
        .map_or(item.duration_ms, |next| next.start_ms)
        .min(item.duration_ms);
    Some((start, end.saturating_sub(start)))
}

fn chapter_node(item: &ItemRecord, index: usize) -> Option<CatalogNode> {
    let (_, duration) = chapter_span(item, index)?;
    let title = item.chapters[index].title.trim();
    let title = if title.is_empty() {
        format!("Chapter {}", index + 1)
    } else {
        title.to_string()
    };
    Some(CatalogNode {
        id: NodeId::Chapter {
            item_id: item.id.clone(),
            index,
        }
        .to_string(),
        title,
        subtitle: Some(format_duration(duration)),
        kind: NodeKind::Playable,
        artwork_ref: item.artwork_ref.clone(),
        duration_ms: Some(duration),
    })
}

/// Placeholder shown in place of an empty result for `context`.
///
/// Deterministic in `context` so `item()` on a placeholder id returns the
/// same node the listing showed.
fn placeholder_for(context: &str) -> CatalogNode {
    let (title, subtitle) = match context {
        SEARCH_CONTEXT => ("No results", Some("Try a different title or author")),
        UNAVAILABLE_CONTEXT => ("Library unavailable", Some("Try again in a moment")),
        _ => match NodeId::parse(context) {
            Some(NodeId::NowPlaying) => ("Nothing playing", None),
            Some(NodeId::Continue) => ("Nothing in progress", Some("Start a book to see it here")),
            Some(NodeId::Recent) => ("No recent books", Some("Books you play will show up here")),
            Some(NodeId::Library) => ("Library is empty", Some("Add books to get started")),
            Some(NodeId::ByAuthor) => ("No authors", None),
            Some(NodeId::BySeries) => ("No series", None),
            Some(NodeId::Author(_)) | Some(NodeId::Series(_)) => ("No books", None),
            Some(NodeId::Item(_)) => ("No chapters", Some("This book has no chapter markers")),
            _ => ("Nothing here", None),
        },
    };
    CatalogNode::placeholder(context, title, subtitle)
}
