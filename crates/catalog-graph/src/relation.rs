//! Static table of the catalog's relation edges.
//!
//! An edge names the id list and cache map each endpoint keeps. The planner and
//! the rebuild procedure only ever look at edges through a [`RelationSide`], so
//! an edit from either endpoint drives the same declaration.

use catalog_core::{fields, EntityKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationEdge {
    pub from: EntityKind,
    pub to: EntityKind,
    /// Id list on the `from` document.
    pub ids_field: &'static str,
    /// Id list on the `to` document, when the edge is bidirectional.
    pub reverse_ids_field: Option<&'static str>,
    /// Map of `to` summaries kept on the `from` document.
    pub cache_field: Option<&'static str>,
    /// Map of `from` summaries kept on the `to` document.
    pub reverse_cache_field: Option<&'static str>,
}

pub const RELATION_GRAPH: &[RelationEdge] = &[
    RelationEdge {
        from: EntityKind::Game,
        to: EntityKind::Character,
        ids_field: fields::CHARACTER_IDS,
        reverse_ids_field: Some(fields::GAME_IDS),
        cache_field: Some(fields::CACHED_CHARACTERS),
        reverse_cache_field: Some(fields::CACHED_GAMES),
    },
    RelationEdge {
        from: EntityKind::Game,
        to: EntityKind::MusicTrack,
        ids_field: fields::SOUNDTRACK_IDS,
        reverse_ids_field: Some(fields::DEPENDENT_GAME_IDS),
        cache_field: Some(fields::CACHED_SOUNDTRACK),
        reverse_cache_field: None,
    },
    // Tracks keep no list of the staff crediting them, so a track edit cannot
    // reach `cachedMusic`; the rebuild procedure repairs that drift.
    RelationEdge {
        from: EntityKind::StaffMember,
        to: EntityKind::MusicTrack,
        ids_field: fields::MUSIC_IDS,
        reverse_ids_field: None,
        cache_field: Some(fields::CACHED_MUSIC),
        reverse_cache_field: None,
    },
    RelationEdge {
        from: EntityKind::MusicAlbum,
        to: EntityKind::MusicTrack,
        ids_field: fields::TRACK_IDS,
        reverse_ids_field: Some(fields::ALBUM_IDS),
        cache_field: None,
        reverse_cache_field: None,
    },
];

/// One endpoint's view of an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationSide {
    pub edge: &'static RelationEdge,
    pub kind: EntityKind,
    pub partner: EntityKind,
    pub ids_field: &'static str,
    pub cache_field: Option<&'static str>,
    pub partner_ids_field: Option<&'static str>,
    pub partner_cache_field: Option<&'static str>,
}

impl RelationSide {
    /// Whether a partner document stores anything about this side's entity.
    pub fn partner_tracks_us(&self) -> bool {
        self.partner_ids_field.is_some() || self.partner_cache_field.is_some()
    }
}

impl RelationEdge {
    /// The edge seen from `kind`, if `kind` owns an editable id list on it.
    pub fn side_for(&'static self, kind: EntityKind) -> Option<RelationSide> {
        if self.from == kind {
            Some(RelationSide {
                edge: self,
                kind,
                partner: self.to,
                ids_field: self.ids_field,
                cache_field: self.cache_field,
                partner_ids_field: self.reverse_ids_field,
                partner_cache_field: self.reverse_cache_field,
            })
        } else if self.to == kind {
            let ids_field = self.reverse_ids_field?;
            Some(RelationSide {
                edge: self,
                kind,
                partner: self.from,
                ids_field,
                cache_field: self.reverse_cache_field,
                partner_ids_field: Some(self.ids_field),
                partner_cache_field: self.cache_field,
            })
        } else {
            None
        }
    }
}

/// Every editable side for `kind`, in table order.
pub fn sides_for(kind: EntityKind) -> Vec<RelationSide> {
    RELATION_GRAPH
        .iter()
        .filter_map(|edge| edge.side_for(kind))
        .collect()
}

pub fn side_by_field(kind: EntityKind, ids_field: &str) -> Option<RelationSide> {
    sides_for(kind)
        .into_iter()
        .find(|side| side.ids_field == ids_field)
}

/// Fields an edit payload may not set directly: id lists and cache maps are
/// owned by the relation engine.
pub fn managed_fields(kind: EntityKind) -> Vec<&'static str> {
    let mut managed = vec![fields::UPDATED_AT];
    for edge in RELATION_GRAPH {
        if edge.from == kind {
            managed.push(edge.ids_field);
            managed.extend(edge.cache_field);
        }
        if edge.to == kind {
            managed.extend(edge.reverse_ids_field);
            managed.extend(edge.reverse_cache_field);
        }
    }
    managed
}
