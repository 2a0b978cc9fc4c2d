use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use catalog_core::{EntityId, EntityKind, InvalidationConfig};

/// Category name to public category page path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryTable {
    pages: BTreeMap<String, String>,
}

impl CategoryTable {
    pub fn new(pages: BTreeMap<String, String>) -> Self {
        Self { pages }
    }

    pub fn from_settings(config: &InvalidationConfig) -> Self {
        Self::new(config.categories.clone())
    }

    pub fn page_for(&self, category: &str) -> Option<&str> {
        self.pages.get(category).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

pub fn detail_path(kind: EntityKind, id: &EntityId) -> String {
    format!("/{}/{}", kind.collection(), id)
}

pub fn list_path(kind: EntityKind) -> String {
    format!("/{}", kind.collection())
}

/// Pages touched by one committed edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AffectedPages {
    pub kind: EntityKind,
    pub id: EntityId,
    /// The entity's category after the edit.
    pub category: Option<String>,
    /// Other entity documents written by the same batch.
    pub dependents: Vec<(EntityKind, EntityId)>,
}

impl AffectedPages {
    /// Detail page, list page, the new category's page when the table knows
    /// it, then each dependent's detail page. Duplicates keep their first
    /// position.
    pub fn page_paths(&self, categories: &CategoryTable) -> Vec<String> {
        let mut paths = vec![detail_path(self.kind, &self.id), list_path(self.kind)];
        if let Some(page) = self
            .category
            .as_deref()
            .and_then(|category| categories.page_for(category))
        {
            paths.push(page.to_string());
        }
        paths.extend(
            self.dependents
                .iter()
                .map(|(kind, id)| detail_path(*kind, id)),
        );

        let mut seen = HashSet::with_capacity(paths.len());
        paths.retain(|path| seen.insert(path.clone()));
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> CategoryTable {
        CategoryTable::from_settings(&InvalidationConfig::default())
    }

    #[test]
    fn new_category_page_is_requested() {
        let pages = AffectedPages {
            kind: EntityKind::Game,
            id: "g".into(),
            category: Some("Gagharv Trilogy".into()),
            dependents: vec![
                (EntityKind::Character, "a".into()),
                (EntityKind::Character, "b".into()),
            ],
        };
        assert_eq!(
            pages.page_paths(&table()),
            vec![
                "/games/g",
                "/games",
                "/gagharv-trilogy",
                "/characters/a",
                "/characters/b"
            ]
        );
    }

    #[test]
    fn unknown_category_and_duplicates_are_skipped() {
        let pages = AffectedPages {
            kind: EntityKind::MusicTrack,
            id: "m".into(),
            category: Some("Unlisted".into()),
            dependents: vec![
                (EntityKind::MusicTrack, "m".into()),
                (EntityKind::Game, "g".into()),
            ],
        };
        assert_eq!(pages.page_paths(&table()), vec!["/music/m", "/music", "/games/g"]);
    }
}
