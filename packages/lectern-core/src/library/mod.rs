//! Read-only access to the media library.
//!
//! The browse tree and the playback session never touch storage directly;
//! they go through [`LibraryRepository`]. The standalone server backs it with
//! [`InMemoryLibrary`] loaded from a JSON catalog file.

mod memory;

pub use memory::InMemoryLibrary;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by a library repository.
#[derive(Debug, Error)]
pub enum LibraryError {
    /// Backing store cannot be reached.
    #[error("Library unavailable: {0}")]
    Unavailable(String),

    /// Reading the catalog failed.
    #[error("Library I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Catalog contents could not be parsed.
    #[error("Library catalog malformed: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result alias for repository operations.
pub type LibraryResult<T> = Result<T, LibraryError>;

/// A chapter marker within an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterRecord {
    /// Chapter title; may be blank.
    #[serde(default)]
    pub title: String,
    /// Offset of the chapter start from the item start.
    pub start_ms: u64,
}

/// One library item as stored by the repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub series: Option<String>,
    pub duration_ms: u64,
    /// Chapters in stored order.
    #[serde(default)]
    pub chapters: Vec<ChapterRecord>,
    #[serde(default)]
    pub artwork_ref: Option<String>,
    /// What the playback engine loads.
    pub source_uri: String,
    /// Unix ms of the last play; 0 when never played.
    #[serde(default)]
    pub last_played_ms: u64,
    /// Saved playback position.
    #[serde(default)]
    pub progress_ms: u64,
    #[serde(default)]
    pub finished: bool,
}

impl ItemRecord {
    /// Played at least once and not completed.
    pub fn is_in_progress(&self) -> bool {
        self.last_played_ms > 0 && !self.finished
    }

    /// Remaining time from the saved position.
    pub fn remaining_ms(&self) -> u64 {
        self.duration_ms.saturating_sub(self.progress_ms)
    }
}

/// Filter for [`LibraryRepository::list_all`].
///
/// Name matches are case-insensitive and exact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemFilter {
    pub author: Option<String>,
    pub series: Option<String>,
    /// Only items with `last_played_ms > 0`.
    pub played_only: bool,
}

impl ItemFilter {
    pub fn by_author(name: impl Into<String>) -> Self {
        Self {
            author: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn by_series(name: impl Into<String>) -> Self {
        Self {
            series: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn played() -> Self {
        Self {
            played_only: true,
            ..Default::default()
        }
    }

    /// Returns whether `item` passes this filter.
    pub fn matches(&self, item: &ItemRecord) -> bool {
        if let Some(ref author) = self.author {
            if !same_name(&item.author, author) {
                return false;
            }
        }
        if let Some(ref series) = self.series {
            match item.series {
                Some(ref s) if same_name(s, series) => {}
                _ => return false,
            }
        }
        !self.played_only || item.last_played_ms > 0
    }
}

fn same_name(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

/// Read-only library store.
///
/// Implementations provide their own consistency; callers take no locks.
#[async_trait]
pub trait LibraryRepository: Send + Sync {
    /// Looks up one item by its raw id.
    async fn get_item_by_id(&self, id: &str) -> LibraryResult<Option<ItemRecord>>;

    /// Lists every item passing `filter`, in storage order.
    async fn list_all(&self, filter: &ItemFilter) -> LibraryResult<Vec<ItemRecord>>;

    /// The unfinished item with the most recent play timestamp.
    async fn most_recent_in_progress(&self) -> LibraryResult<Option<ItemRecord>>;

    /// Distinct non-empty author names.
    async fn distinct_authors(&self) -> LibraryResult<Vec<String>>;

    /// Distinct non-empty series names.
    async fn distinct_series(&self) -> LibraryResult<Vec<String>>;

    /// Items whose title, author or series contains `query`, case-insensitively.
    async fn search_by_title_author_series(&self, query: &str)
        -> LibraryResult<Vec<ItemRecord>>;
}
