//! Core types for the story loom.

use crate::error::{LoomError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                $name(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier of a project (one story).
    ProjectId
);
string_id!(
    /// Identifier of a chapter.
    ChapterId
);
string_id!(
    /// Identifier of a snapshot, assigned by the backend.
    SnapshotId
);

/// Per-chapter index of successive synchronization snapshots.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct SyncNumber(pub u64);

impl SyncNumber {
    pub fn next(self) -> Self {
        SyncNumber(self.0 + 1)
    }

    pub fn prev(self) -> Option<Self> {
        if self.0 > 0 {
            Some(SyncNumber(self.0 - 1))
        } else {
            None
        }
    }
}

impl fmt::Debug for SyncNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sync({})", self.0)
    }
}

impl fmt::Display for SyncNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time. A clock set before the epoch reads as zero.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        Timestamp(micros)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Lightweight chapter index entry used for navigation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterRef {
    pub id: ChapterId,
    pub number: u32,
    pub title: String,
}

impl ChapterRef {
    pub fn new(id: impl Into<String>, number: u32, title: impl Into<String>) -> Self {
        Self {
            id: ChapterId::new(id),
            number,
            title: title.into(),
        }
    }
}

// --- Snapshot payload entities ---

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CharacterEntry {
    pub id: String,
    pub name: String,
    pub role: Option<String>,
    pub description: String,
    pub traits: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoreEntry {
    pub id: String,
    pub title: String,
    pub category: Option<String>,
    pub content: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutlineBeat {
    pub id: String,
    pub title: String,
    pub description: String,
    pub chapter_number: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Outline {
    pub summary: String,
    pub beats: Vec<OutlineBeat>,
}

impl Outline {
    pub fn is_empty(&self) -> bool {
        self.summary.is_empty() && self.beats.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoryNode {
    pub id: String,
    pub label: String,
    pub node_type: String,
    pub x: f64,
    pub y: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoryEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub label: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoryMap {
    pub nodes: Vec<StoryNode>,
    pub edges: Vec<StoryEdge>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotStats {
    pub character_count: u64,
    pub lore_count: u64,
    pub node_count: u64,
    pub edge_count: u64,
    pub word_count: u64,
}

/// Structured view of a snapshot payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotData {
    pub characters: Vec<CharacterEntry>,
    pub lore: Vec<LoreEntry>,
    pub outline: Outline,
    pub story_map: StoryMap,
    pub stats: SnapshotStats,
}

impl SnapshotData {
    /// Counts of every entity collection plus the given word count.
    pub fn compute_stats(&self, word_count: u64) -> SnapshotStats {
        SnapshotStats {
            character_count: self.characters.len() as u64,
            lore_count: self.lore.len() as u64,
            node_count: self.story_map.nodes.len() as u64,
            edge_count: self.story_map.edges.len() as u64,
            word_count,
        }
    }

    /// Flatten into tagged records, one per entity.
    pub fn entities(&self) -> Vec<SnapshotEntity> {
        let mut out = Vec::with_capacity(
            self.characters.len()
                + self.lore.len()
                + self.story_map.nodes.len()
                + self.story_map.edges.len()
                + 2,
        );
        out.extend(self.characters.iter().cloned().map(SnapshotEntity::Character));
        out.extend(self.lore.iter().cloned().map(SnapshotEntity::Lore));
        if !self.outline.is_empty() {
            out.push(SnapshotEntity::Outline(self.outline.clone()));
        }
        out.extend(self.story_map.nodes.iter().cloned().map(SnapshotEntity::StoryNode));
        out.extend(self.story_map.edges.iter().cloned().map(SnapshotEntity::StoryEdge));
        out.push(SnapshotEntity::Stats(self.stats));
        out
    }
}

/// One entity of a snapshot payload, tagged by kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SnapshotEntity {
    Character(CharacterEntry),
    Lore(LoreEntry),
    Outline(Outline),
    StoryNode(StoryNode),
    StoryEdge(StoryEdge),
    Stats(SnapshotStats),
}

impl SnapshotEntity {
    /// Kind and id for entities tracked on the element timeline.
    pub fn element_key(&self) -> Option<(ElementKind, &str)> {
        match self {
            SnapshotEntity::Character(c) => Some((ElementKind::Character, c.id.as_str())),
            SnapshotEntity::Lore(l) => Some((ElementKind::Lore, l.id.as_str())),
            SnapshotEntity::StoryNode(n) => Some((ElementKind::StoryNode, n.id.as_str())),
            SnapshotEntity::StoryEdge(e) => Some((ElementKind::StoryEdge, e.id.as_str())),
            SnapshotEntity::Outline(_) | SnapshotEntity::Stats(_) => None,
        }
    }

    /// Human-readable name of the entity.
    pub fn display_name(&self) -> String {
        match self {
            SnapshotEntity::Character(c) => c.name.clone(),
            SnapshotEntity::Lore(l) => l.title.clone(),
            SnapshotEntity::StoryNode(n) => n.label.clone(),
            SnapshotEntity::StoryEdge(e) => match &e.label {
                Some(label) => label.clone(),
                None => format!("{} -> {}", e.source, e.target),
            },
            SnapshotEntity::Outline(_) => "outline".to_string(),
            SnapshotEntity::Stats(_) => "stats".to_string(),
        }
    }
}

/// Snapshot payload as stored: an opaque JSON value, decoded on read.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotPayload(pub serde_json::Value);

impl SnapshotPayload {
    pub fn from_data(data: &SnapshotData) -> Result<Self> {
        Ok(SnapshotPayload(serde_json::to_value(data)?))
    }

    /// Decode into the structured view. Missing fields decode as empty.
    pub fn decode(&self) -> Result<SnapshotData> {
        if self.0.is_null() {
            return Ok(SnapshotData::default());
        }
        SnapshotData::deserialize(&self.0).map_err(|e| LoomError::Deserialization(e.to_string()))
    }

    pub fn raw(&self) -> &serde_json::Value {
        &self.0
    }
}

impl Default for SnapshotPayload {
    fn default() -> Self {
        SnapshotPayload(serde_json::Value::Object(serde_json::Map::new()))
    }
}

/// One recorded state of a project's canonical entities at a sync point.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: SnapshotId,
    pub project_id: ProjectId,
    pub chapter_id: Option<ChapterId>,
    pub chapter_number: Option<u32>,
    pub sync_number: SyncNumber,
    pub snapshot_data: SnapshotPayload,
    pub created_at: Timestamp,
}

impl Snapshot {
    pub fn belongs_to(&self, chapter_id: &ChapterId) -> bool {
        self.chapter_id.as_ref() == Some(chapter_id)
    }

    pub fn data(&self) -> Result<SnapshotData> {
        self.snapshot_data.decode()
    }
}

/// Input for creating a snapshot (before id and timestamp are assigned).
#[derive(Clone, Debug)]
pub struct NewSnapshot {
    pub project_id: ProjectId,
    pub chapter_id: Option<ChapterId>,
    pub chapter_number: Option<u32>,
    pub sync_number: SyncNumber,
    pub snapshot_data: SnapshotPayload,
}

// --- Canon ---

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CharacterCanon {
    pub id: String,
    pub name: String,
    pub role: Option<String>,
    pub summary: String,
    pub traits: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorldFact {
    pub id: String,
    pub title: String,
    pub category: Option<String>,
    pub summary: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldCanon {
    pub facts: Vec<WorldFact>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlotCanon {
    pub summary: String,
    pub beats: Vec<String>,
    pub last_chapter: Option<u32>,
}

/// The single authoritative, versioned summary of a project's facts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonState {
    pub id: String,
    pub project_id: ProjectId,
    #[serde(default)]
    pub characters_canon: Vec<CharacterCanon>,
    #[serde(default)]
    pub world_canon: WorldCanon,
    #[serde(default)]
    pub plot_canon: PlotCanon,
    #[serde(default)]
    pub themes_canon: Vec<String>,
    pub version: u64,
    pub updated_at: Timestamp,
}

impl CanonState {
    /// Empty canon at version 0.
    pub fn new(project_id: ProjectId) -> Self {
        Self {
            id: format!("canon-{}", project_id),
            project_id,
            characters_canon: Vec::new(),
            world_canon: WorldCanon::default(),
            plot_canon: PlotCanon::default(),
            themes_canon: Vec::new(),
            version: 0,
            updated_at: Timestamp::now(),
        }
    }

    /// Fold a synced snapshot into canon and bump the version.
    ///
    /// Characters and world facts present in the snapshot replace their
    /// canon counterparts (matched by id); entries missing from the snapshot
    /// are kept. Themes are never touched by a sync.
    pub fn absorb(&mut self, data: &SnapshotData, chapter_number: Option<u32>) {
        for character in &data.characters {
            let canon = CharacterCanon {
                id: character.id.clone(),
                name: character.name.clone(),
                role: character.role.clone(),
                summary: character.description.clone(),
                traits: character.traits.clone(),
            };
            match self.characters_canon.iter_mut().find(|c| c.id == character.id) {
                Some(existing) => *existing = canon,
                None => self.characters_canon.push(canon),
            }
        }

        for lore in &data.lore {
            let fact = WorldFact {
                id: lore.id.clone(),
                title: lore.title.clone(),
                category: lore.category.clone(),
                summary: lore.content.clone(),
            };
            match self.world_canon.facts.iter_mut().find(|f| f.id == lore.id) {
                Some(existing) => *existing = fact,
                None => self.world_canon.facts.push(fact),
            }
        }

        if !data.outline.summary.is_empty() {
            self.plot_canon.summary = data.outline.summary.clone();
        }
        if !data.outline.beats.is_empty() {
            self.plot_canon.beats = data.outline.beats.iter().map(|b| b.title.clone()).collect();
        }
        if let Some(number) = chapter_number {
            self.plot_canon.last_chapter =
                Some(self.plot_canon.last_chapter.map_or(number, |n| n.max(number)));
        }

        self.version += 1;
        self.updated_at = Timestamp::now();
    }
}

// --- Element timeline ---

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ElementKind {
    Character,
    Lore,
    StoryNode,
    StoryEdge,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ElementChange {
    Created,
    Updated,
    Removed,
}

/// One entry of the append-only element timeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementEvent {
    pub project_id: ProjectId,
    pub chapter_id: Option<ChapterId>,
    pub sync_number: SyncNumber,
    pub kind: ElementKind,
    pub element_id: String,
    pub change: ElementChange,
    pub name: String,
    pub recorded_at: Timestamp,
}
