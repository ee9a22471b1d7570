//! In-memory library backed by a JSON catalog file.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use super::{ItemFilter, ItemRecord, LibraryRepository, LibraryResult};

/// On-disk catalog layout: `{ "items": [ ... ] }`.
#[derive(Deserialize)]
struct CatalogFile {
    items: Vec<ItemRecord>,
}

/// Library held entirely in memory. Immutable once built; queries clone
/// out the records they return.
#[derive(Default)]
pub struct InMemoryLibrary {
    items: Vec<ItemRecord>,
}

impl InMemoryLibrary {
    /// Creates a library from records in storage order.
    pub fn from_records(items: Vec<ItemRecord>) -> Self {
        Self { items }
    }

    /// Loads a library from a JSON catalog file.
    pub async fn load(path: &Path) -> LibraryResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let catalog: CatalogFile = serde_json::from_str(&content)?;
        log::info!(
            "[Library] Loaded {} item(s) from {}",
            catalog.items.len(),
            path.display()
        );
        Ok(Self::from_records(catalog.items))
    }

    /// Returns the number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns whether the library holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Collects distinct non-blank names, deduplicated case-insensitively.
    ///
    /// The first spelling seen wins.
    fn distinct<F>(&self, name_of: F) -> Vec<String>
    where
        F: Fn(&ItemRecord) -> Option<&str>,
    {
        let mut seen = BTreeMap::new();
        for item in self.items.iter() {
            if let Some(name) = name_of(item).map(str::trim).filter(|n| !n.is_empty()) {
                seen.entry(name.to_lowercase())
                    .or_insert_with(|| name.to_string());
            }
        }
        seen.into_values().collect()
    }
}

#[async_trait]
impl LibraryRepository for InMemoryLibrary {
    async fn get_item_by_id(&self, id: &str) -> LibraryResult<Option<ItemRecord>> {
        Ok(self.items.iter().find(|i| i.id == id).cloned())
    }

    async fn list_all(&self, filter: &ItemFilter) -> LibraryResult<Vec<ItemRecord>> {
        Ok(self
            .items
            .iter()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect())
    }

    async fn most_recent_in_progress(&self) -> LibraryResult<Option<ItemRecord>> {
        Ok(self
            .items
            .iter()
            .filter(|i| i.is_in_progress())
            .max_by_key(|i| i.last_played_ms)
            .cloned())
    }

    async fn distinct_authors(&self) -> LibraryResult<Vec<String>> {
        Ok(self.distinct(|i| Some(i.author.as_str())))
    }

    async fn distinct_series(&self) -> LibraryResult<Vec<String>> {
        Ok(self.distinct(|i| i.series.as_deref()))
    }

    async fn search_by_title_author_series(
        &self,
        query: &str,
    ) -> LibraryResult<Vec<ItemRecord>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .items
            .iter()
            .filter(|i| {
                i.title.to_lowercase().contains(&needle)
                    || i.author.to_lowercase().contains(&needle)
                    || i.series
                        .as_deref()
                        .is_some_and(|s| s.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{item, sample_library};
    use std::io::Write;

    #[tokio::test]
    async fn most_recent_in_progress_skips_finished_items() {
        let mut newest = item("a", "Newest", "X");
        newest.last_played_ms = 300;
        newest.finished = true;
        let mut middle = item("b", "Middle", "X");
        middle.last_played_ms = 200;
        let mut oldest = item("c", "Oldest", "X");
        oldest.last_played_ms = 100;
        let library = InMemoryLibrary::from_records(vec![oldest, newest, middle]);

        let found = library.most_recent_in_progress().await.unwrap();
        assert_eq!(found.map(|i| i.id), Some("b".to_string()));
    }

    #[tokio::test]
    async fn distinct_authors_dedupes_case_insensitively() {
        let library = InMemoryLibrary::from_records(vec![
            item("1", "A", "Ursula K. Le Guin"),
            item("2", "B", "ursula k. le guin"),
            item("3", "C", "  "),
            item("4", "D", "Frank Herbert"),
        ]);
        let authors = library.distinct_authors().await.unwrap();
        assert_eq!(authors, vec!["Frank Herbert", "Ursula K. Le Guin"]);
    }

    #[tokio::test]
    async fn search_matches_title_author_or_series() {
        let library = sample_library();
        let by_title = library.search_by_title_author_series("DUNE").await.unwrap();
        assert_eq!(by_title.len(), 1);

        let by_author = library
            .search_by_title_author_series("le guin")
            .await
            .unwrap();
        assert_eq!(by_author.len(), 2);

        let by_series = library
            .search_by_title_author_series("earthsea")
            .await
            .unwrap();
        assert!(by_series.iter().all(|i| i.author == "Ursula K. Le Guin"));

        assert!(library
            .search_by_title_author_series("   ")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn load_reads_catalog_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"items": [{{"id": "x", "title": "T", "durationMs": 5, "sourceUri": "/x.m4b"}}]}}"#
        )
        .unwrap();

        let library = InMemoryLibrary::load(file.path()).await.unwrap();
        assert_eq!(library.len(), 1);
        assert!(library.get_item_by_id("x").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn load_rejects_malformed_catalog() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(InMemoryLibrary::load(file.path()).await.is_err());
    }
}
