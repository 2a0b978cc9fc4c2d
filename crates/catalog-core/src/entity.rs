use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Field names used in stored entity documents.
pub mod fields {
    pub const UPDATED_AT: &str = "updatedAt";

    pub const NAME: &str = "name";
    pub const CATEGORY: &str = "category";
    pub const RELEASE_DATE: &str = "releaseDate";
    pub const HAS_COVER_IMAGE: &str = "hasCoverImage";
    pub const HAS_AVATAR_IMAGE: &str = "hasAvatarImage";
    pub const DURATION_SECONDS: &str = "durationSeconds";

    pub const CHARACTER_IDS: &str = "characterIds";
    pub const SOUNDTRACK_IDS: &str = "soundtrackIds";
    pub const GAME_IDS: &str = "gameIds";
    pub const TRACK_IDS: &str = "trackIds";
    pub const ALBUM_IDS: &str = "albumIds";
    pub const DEPENDENT_GAME_IDS: &str = "dependentGameIds";
    pub const MUSIC_IDS: &str = "musicIds";

    pub const CACHED_CHARACTERS: &str = "cachedCharacters";
    pub const CACHED_SOUNDTRACK: &str = "cachedSoundtrack";
    pub const CACHED_GAMES: &str = "cachedGames";
    pub const CACHED_MUSIC: &str = "cachedMusic";
}

/// The five entity types held in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Game,
    Character,
    MusicAlbum,
    MusicTrack,
    StaffMember,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Game,
        EntityKind::Character,
        EntityKind::MusicAlbum,
        EntityKind::MusicTrack,
        EntityKind::StaffMember,
    ];

    /// Collection name in the document store; also the public page prefix.
    pub fn collection(self) -> &'static str {
        match self {
            EntityKind::Game => "games",
            EntityKind::Character => "characters",
            EntityKind::MusicAlbum => "albums",
            EntityKind::MusicTrack => "music",
            EntityKind::StaffMember => "staff",
        }
    }

    /// Fields projected into the summary record embedded by other entities.
    pub fn summary_fields(self) -> &'static [&'static str] {
        use fields::*;
        match self {
            EntityKind::Game => &[NAME, CATEGORY, RELEASE_DATE, HAS_COVER_IMAGE],
            EntityKind::Character => &[NAME, CATEGORY, HAS_AVATAR_IMAGE],
            EntityKind::MusicAlbum => &[NAME, CATEGORY, RELEASE_DATE, HAS_COVER_IMAGE],
            EntityKind::MusicTrack => &[NAME, CATEGORY, DURATION_SECONDS],
            EntityKind::StaffMember => &[NAME, CATEGORY, HAS_AVATAR_IMAGE],
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityKind::Game => "game",
            EntityKind::Character => "character",
            EntityKind::MusicAlbum => "album",
            EntityKind::MusicTrack => "track",
            EntityKind::StaffMember => "staff",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "game" | "games" => Ok(EntityKind::Game),
            "character" | "characters" => Ok(EntityKind::Character),
            "album" | "albums" | "music_album" => Ok(EntityKind::MusicAlbum),
            "track" | "music" | "music_track" => Ok(EntityKind::MusicTrack),
            "staff" | "staff_member" => Ok(EntityKind::StaffMember),
            other => Err(format!("unknown entity kind: {}", other)),
        }
    }
}

/// Stable document identifier, unique within one entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Projection of an entity's display fields. Ordered so serialized copies are
/// byte-identical wherever they are embedded.
pub type Summary = BTreeMap<String, Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_from_collection_and_display_names() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.collection().parse::<EntityKind>().unwrap(), kind);
            assert_eq!(kind.to_string().parse::<EntityKind>().unwrap(), kind);
        }
        assert!("soundtrack".parse::<EntityKind>().is_err());
    }

    #[test]
    fn every_summary_starts_with_name_and_category() {
        for kind in EntityKind::ALL {
            let fields = kind.summary_fields();
            assert_eq!(&fields[..2], &[fields::NAME, fields::CATEGORY]);
        }
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(EntityId::generate(), EntityId::generate());
    }
}
