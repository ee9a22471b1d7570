//! Catalog node types and the prefix-typed node id namespace.

use std::fmt;

use serde::Serialize;

use crate::protocol_constants::{
    NODE_BY_AUTHOR, NODE_BY_SERIES, NODE_CONTINUE, NODE_LIBRARY, NODE_NOW_PLAYING, NODE_RECENT,
    NODE_ROOT, PREFIX_AUTHOR, PREFIX_CHAPTER, PREFIX_EMPTY, PREFIX_ITEM, PREFIX_SERIES,
};

/// A parsed browse-tree node id.
///
/// Every id carries enough to resolve its children or playable source
/// directly; no intermediate nodes are ever walked.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeId {
    Root,
    NowPlaying,
    Continue,
    Recent,
    Library,
    ByAuthor,
    BySeries,
    Author(String),
    Series(String),
    Item(String),
    Chapter { item_id: String, index: usize },
    /// Placeholder standing in for an empty result; carries its context.
    Empty(String),
}

impl NodeId {
    /// Parses a wire id. Returns `None` for anything outside the namespace.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            NODE_ROOT => return Some(Self::Root),
            NODE_NOW_PLAYING => return Some(Self::NowPlaying),
            NODE_CONTINUE => return Some(Self::Continue),
            NODE_RECENT => return Some(Self::Recent),
            NODE_LIBRARY => return Some(Self::Library),
            NODE_BY_AUTHOR => return Some(Self::ByAuthor),
            NODE_BY_SERIES => return Some(Self::BySeries),
            _ => {}
        }

        if let Some(rest) = raw.strip_prefix(PREFIX_CHAPTER) {
            // Item ids may contain ':' themselves; the index is always last.
            let (item_id, index) = rest.rsplit_once(':')?;
            if item_id.is_empty() {
                return None;
            }
            let index = index.parse().ok()?;
            return Some(Self::Chapter {
                item_id: item_id.to_string(),
                index,
            });
        }

        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        if let Some(rest) = raw.strip_prefix(PREFIX_ITEM) {
            return non_empty(rest).map(Self::Item);
        }
        if let Some(rest) = raw.strip_prefix(PREFIX_AUTHOR) {
            return non_empty(rest).map(Self::Author);
        }
        if let Some(rest) = raw.strip_prefix(PREFIX_SERIES) {
            return non_empty(rest).map(Self::Series);
        }
        if let Some(rest) = raw.strip_prefix(PREFIX_EMPTY) {
            return Some(Self::Empty(rest.to_string()));
        }
        None
    }

    /// Ids that can be handed to the playback session.
    pub fn is_playable(&self) -> bool {
        matches!(self, Self::Item(_) | Self::Chapter { .. })
    }

    /// Raw item id for item and chapter ids.
    pub fn item_id(&self) -> Option<&str> {
        match self {
            Self::Item(id) | Self::Chapter { item_id: id, .. } => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => f.write_str(NODE_ROOT),
            Self::NowPlaying => f.write_str(NODE_NOW_PLAYING),
            Self::Continue => f.write_str(NODE_CONTINUE),
            Self::Recent => f.write_str(NODE_RECENT),
            Self::Library => f.write_str(NODE_LIBRARY),
            Self::ByAuthor => f.write_str(NODE_BY_AUTHOR),
            Self::BySeries => f.write_str(NODE_BY_SERIES),
            Self::Author(name) => write!(f, "{PREFIX_AUTHOR}{name}"),
            Self::Series(name) => write!(f, "{PREFIX_SERIES}{name}"),
            Self::Item(id) => write!(f, "{PREFIX_ITEM}{id}"),
            Self::Chapter { item_id, index } => write!(f, "{PREFIX_CHAPTER}{item_id}:{index}"),
            Self::Empty(context) => write!(f, "{PREFIX_EMPTY}{context}"),
        }
    }
}

/// How a controller may use a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    /// Has children; never played directly.
    Browsable,
    /// Can be loaded into the playback session.
    Playable,
    /// Stand-in for an empty result set.
    Empty,
}

/// One entry of the browse tree, built per request and never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogNode {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    pub kind: NodeKind,
    /// Opaque reference for the artwork transcoder. Not sent to controllers.
    #[serde(skip_serializing)]
    pub artwork_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl CatalogNode {
    pub fn browsable(id: &NodeId, title: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            title: title.into(),
            subtitle: None,
            kind: NodeKind::Browsable,
            artwork_ref: None,
            duration_ms: None,
        }
    }

    pub fn placeholder(context: &str, title: &str, subtitle: Option<&str>) -> Self {
        Self {
            id: NodeId::Empty(context.to_string()).to_string(),
            title: title.to_string(),
            subtitle: subtitle.map(str::to_string),
            kind: NodeKind::Empty,
            artwork_ref: None,
            duration_ms: None,
        }
    }

    pub fn with_subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = Some(subtitle.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_ids_round_trip() {
        let fixed = [
            "root",
            "now-playing",
            "continue",
            "recent",
            "library",
            "by-author",
            "by-series",
        ];
        for raw in fixed {
            let id = NodeId::parse(raw).unwrap();
            assert_eq!(id.to_string(), raw);
        }
    }

    #[test]
    fn chapter_id_keeps_colons_in_item_id() {
        let id = NodeId::parse("chapter:urn:book:7:12").unwrap();
        assert_eq!(
            id,
            NodeId::Chapter {
                item_id: "urn:book:7".into(),
                index: 12
            }
        );
        assert_eq!(id.to_string(), "chapter:urn:book:7:12");
    }

    #[test]
    fn malformed_ids_are_rejected() {
        assert_eq!(NodeId::parse("chapter:abc"), None);
        assert_eq!(NodeId::parse("chapter::3"), None);
        assert_eq!(NodeId::parse("chapter:abc:x"), None);
        assert_eq!(NodeId::parse("item:"), None);
        assert_eq!(NodeId::parse("podcasts"), None);
    }

    #[test]
    fn names_with_spaces_survive() {
        let id = NodeId::parse("author:Ursula K. Le Guin").unwrap();
        assert_eq!(id, NodeId::Author("Ursula K. Le Guin".into()));
    }

    #[test]
    fn only_items_and_chapters_are_playable() {
        assert!(NodeId::Item("a".into()).is_playable());
        assert!(NodeId::parse("chapter:a:0").unwrap().is_playable());
        assert!(!NodeId::Library.is_playable());
        assert!(!NodeId::Empty("library".into()).is_playable());
    }

    #[test]
    fn artwork_ref_is_not_serialized() {
        let mut node = CatalogNode::browsable(&NodeId::Library, "All Books");
        node.artwork_ref = Some("/secret/cover.jpg".into());
        let json = serde_json::to_value(&node).unwrap();
        assert!(json.get("artworkRef").is_none());
        assert_eq!(json["kind"], "browsable");
    }
}
