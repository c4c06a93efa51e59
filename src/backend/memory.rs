//! In-memory project backend.

use super::{ElementLog, ProjectBackend, SyncCommit};
use crate::error::{LoomError, Result};
use crate::sync::SyncOutcome;
use crate::types::{
    CanonState, ChapterId, ChapterRef, ElementEvent, NewSnapshot, ProjectId, Snapshot,
    SnapshotData, SnapshotId, Timestamp,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// A chapter row: index entry plus prose.
#[derive(Clone, Debug)]
pub struct ChapterRecord {
    pub chapter: ChapterRef,
    pub content: String,
}

#[derive(Default)]
struct ProjectTables {
    chapters: Vec<ChapterRecord>,
    entities: SnapshotData,
    snapshots: Vec<Snapshot>,
    canon: Option<CanonState>,
    element_events: Vec<ElementEvent>,
}

/// Thread-safe backend keeping every table in memory.
///
/// Element events can additionally be mirrored to an [`ElementLog`] so the
/// element timeline survives restarts.
pub struct MemoryBackend {
    projects: RwLock<HashMap<ProjectId, ProjectTables>>,
    next_snapshot_id: AtomicU64,
    /// Last assigned `created_at`, kept strictly increasing.
    last_created: RwLock<Timestamp>,
    element_log: Option<ElementLog>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            projects: RwLock::new(HashMap::new()),
            next_snapshot_id: AtomicU64::new(1),
            last_created: RwLock::new(Timestamp(0)),
            element_log: None,
        }
    }

    /// Mirror element events to `log`.
    pub fn with_element_log(mut self, log: ElementLog) -> Self {
        self.element_log = Some(log);
        self
    }

    pub fn element_log(&self) -> Option<&ElementLog> {
        self.element_log.as_ref()
    }

    /// Create an empty project. Existing projects are left untouched.
    pub fn add_project(&self, project: ProjectId) {
        self.projects.write().entry(project).or_default();
    }

    /// Insert or replace a chapter (matched by id), keeping chapter order.
    pub fn upsert_chapter(
        &self,
        project: &ProjectId,
        chapter: ChapterRef,
        content: impl Into<String>,
    ) -> Result<()> {
        let mut projects = self.projects.write();
        let tables = projects
            .get_mut(project)
            .ok_or_else(|| project_not_found(project))?;

        let record = ChapterRecord {
            chapter,
            content: content.into(),
        };
        match tables
            .chapters
            .iter_mut()
            .find(|c| c.chapter.id == record.chapter.id)
        {
            Some(existing) => *existing = record,
            None => tables.chapters.push(record),
        }
        tables.chapters.sort_by_key(|c| c.chapter.number);
        Ok(())
    }

    /// Replace the current entity set of a project.
    pub fn set_entities(&self, project: &ProjectId, entities: SnapshotData) -> Result<()> {
        let mut projects = self.projects.write();
        let tables = projects
            .get_mut(project)
            .ok_or_else(|| project_not_found(project))?;
        tables.entities = entities;
        Ok(())
    }

    fn with_project<T>(
        &self,
        project: &ProjectId,
        f: impl FnOnce(&ProjectTables) -> T,
    ) -> Result<T> {
        let projects = self.projects.read();
        projects
            .get(project)
            .map(f)
            .ok_or_else(|| project_not_found(project))
    }

    fn stamp(&self, input: NewSnapshot, created_at: Timestamp) -> Snapshot {
        let id = self.next_snapshot_id.fetch_add(1, Ordering::SeqCst);
        Snapshot {
            id: SnapshotId::new(format!("snap-{id}")),
            project_id: input.project_id,
            chapter_id: input.chapter_id,
            chapter_number: input.chapter_number,
            sync_number: input.sync_number,
            snapshot_data: input.snapshot_data,
            created_at,
        }
    }

    fn next_created_at(&self) -> Timestamp {
        let mut last = self.last_created.write();
        let now = Timestamp::now();
        let assigned = if now > *last { now } else { Timestamp(last.0 + 1) };
        *last = assigned;
        assigned
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectBackend for MemoryBackend {
    fn list_chapters(&self, project: &ProjectId) -> Result<Vec<ChapterRef>> {
        self.with_project(project, |t| {
            t.chapters.iter().map(|c| c.chapter.clone()).collect()
        })
    }

    fn list_snapshots(&self, project: &ProjectId) -> Result<Vec<Snapshot>> {
        self.with_project(project, |t| t.snapshots.clone())
    }

    fn get_canon_state(&self, project: &ProjectId) -> Result<Option<CanonState>> {
        self.with_project(project, |t| t.canon.clone())
    }

    fn load_entities(&self, project: &ProjectId) -> Result<SnapshotData> {
        self.with_project(project, |t| t.entities.clone())
    }

    fn chapter_text(&self, project: &ProjectId, chapter: &ChapterId) -> Result<Option<String>> {
        self.with_project(project, |t| {
            t.chapters
                .iter()
                .find(|c| &c.chapter.id == chapter)
                .map(|c| c.content.clone())
        })
    }

    fn insert_snapshot(&self, input: NewSnapshot) -> Result<Snapshot> {
        let created_at = self.next_created_at();
        let mut projects = self.projects.write();
        let tables = projects
            .get_mut(&input.project_id)
            .ok_or_else(|| project_not_found(&input.project_id))?;

        tables.ensure_sync_free(&input)?;
        let snapshot = self.stamp(input, created_at);
        tables.snapshots.push(snapshot.clone());
        Ok(snapshot)
    }

    fn upsert_canon_state(&self, canon: CanonState) -> Result<CanonState> {
        let mut projects = self.projects.write();
        let tables = projects
            .get_mut(&canon.project_id)
            .ok_or_else(|| project_not_found(&canon.project_id))?;

        tables.ensure_newer_canon(&canon)?;
        tables.canon = Some(canon.clone());
        Ok(canon)
    }

    fn append_element_events(&self, events: &[ElementEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut projects = self.projects.write();
        for event in events {
            if !projects.contains_key(&event.project_id) {
                return Err(project_not_found(&event.project_id));
            }
        }

        if let Some(log) = &self.element_log {
            log.append_all(events)?;
        }

        for event in events {
            if let Some(tables) = projects.get_mut(&event.project_id) {
                tables.element_events.push(event.clone());
            }
        }
        Ok(())
    }

    fn list_element_events(&self, project: &ProjectId) -> Result<Vec<ElementEvent>> {
        self.with_project(project, |t| t.element_events.clone())
    }

    /// Checks and writes snapshot, events and canon under one lock; nothing
    /// is kept in memory when any check or the element log fails.
    fn commit_sync(&self, commit: SyncCommit) -> Result<SyncOutcome> {
        let SyncCommit {
            snapshot,
            mut events,
            canon,
        } = commit;

        let created_at = self.next_created_at();
        let mut projects = self.projects.write();
        let tables = projects
            .get_mut(&snapshot.project_id)
            .ok_or_else(|| project_not_found(&snapshot.project_id))?;

        tables.ensure_sync_free(&snapshot)?;
        tables.ensure_newer_canon(&canon)?;

        for event in &mut events {
            event.recorded_at = created_at;
        }
        if let Some(log) = &self.element_log {
            log.append_all(&events)?;
        }

        let snapshot = self.stamp(snapshot, created_at);
        tables.snapshots.push(snapshot.clone());
        tables.element_events.extend(events.iter().cloned());
        tables.canon = Some(canon.clone());

        Ok(SyncOutcome {
            snapshot,
            canon,
            changes: events,
        })
    }
}

impl ProjectTables {
    fn ensure_sync_free(&self, input: &NewSnapshot) -> Result<()> {
        let Some(chapter) = &input.chapter_id else {
            return Ok(());
        };
        let taken = self
            .snapshots
            .iter()
            .any(|s| s.sync_number == input.sync_number && s.belongs_to(chapter));
        if taken {
            return Err(LoomError::SyncConflict {
                chapter: chapter.to_string(),
                sync_number: input.sync_number.0,
            });
        }
        Ok(())
    }

    fn ensure_newer_canon(&self, canon: &CanonState) -> Result<()> {
        match &self.canon {
            Some(existing) if canon.version <= existing.version => Err(LoomError::StaleCanon {
                current: existing.version,
                attempted: canon.version,
            }),
            _ => Ok(()),
        }
    }
}

fn project_not_found(project: &ProjectId) -> LoomError {
    LoomError::NotFound {
        kind: "project",
        id: project.to_string(),
    }
}
