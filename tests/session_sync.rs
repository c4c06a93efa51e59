//! End-to-end tests: sessions, chapter sync and the element timeline.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use story_loom::{
    CanonState, ChapterId, ChapterRef, ChapterSync, CharacterEntry, ElementChange, ElementEvent,
    ElementKind, ElementLog, LoomError, LoreEntry, MemoryBackend, NewSnapshot, ProjectBackend,
    ProjectId, Result, Session, Snapshot, SnapshotData, SubscriptionConfig, SyncCommit,
    SyncNumber, SyncOutcome, TimelineConfig, TimelineEvent,
};
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn character(id: &str, name: &str) -> CharacterEntry {
    CharacterEntry {
        id: id.into(),
        name: name.into(),
        ..Default::default()
    }
}

fn lore(id: &str, title: &str) -> LoreEntry {
    LoreEntry {
        id: id.into(),
        title: title.into(),
        ..Default::default()
    }
}

fn seeded_backend() -> (Arc<MemoryBackend>, ProjectId) {
    let backend = MemoryBackend::new();
    let project = ProjectId::new("p1");
    backend.add_project(project.clone());
    backend
        .upsert_chapter(&project, ChapterRef::new("ch1", 1, "Low Tide"), "The sea pulled back.")
        .unwrap();
    backend
        .upsert_chapter(&project, ChapterRef::new("ch2", 2, "Flood"), "It came back in.")
        .unwrap();
    backend
        .set_entities(
            &project,
            SnapshotData {
                characters: vec![character("c1", "Mira")],
                lore: vec![lore("l1", "The Drowned Bell")],
                ..Default::default()
            },
        )
        .unwrap();
    (Arc::new(backend), project)
}

/// Delegates to a [`MemoryBackend`] but can be told to fail every call, or
/// only element-event appends. Keeps the default, step-by-step
/// `commit_sync`.
struct FlakyBackend {
    inner: Arc<MemoryBackend>,
    failing: AtomicBool,
    failing_events: AtomicBool,
}

impl FlakyBackend {
    fn new(inner: Arc<MemoryBackend>) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
            failing_events: AtomicBool::new(false),
        }
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn set_failing_events(&self, failing: bool) {
        self.failing_events.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(LoomError::Backend("connection reset".into()))
        } else {
            Ok(())
        }
    }
}

impl ProjectBackend for FlakyBackend {
    fn list_chapters(&self, project: &ProjectId) -> Result<Vec<ChapterRef>> {
        self.check()?;
        self.inner.list_chapters(project)
    }

    fn list_snapshots(&self, project: &ProjectId) -> Result<Vec<Snapshot>> {
        self.check()?;
        self.inner.list_snapshots(project)
    }

    fn get_canon_state(&self, project: &ProjectId) -> Result<Option<CanonState>> {
        self.check()?;
        self.inner.get_canon_state(project)
    }

    fn load_entities(&self, project: &ProjectId) -> Result<SnapshotData> {
        self.check()?;
        self.inner.load_entities(project)
    }

    fn chapter_text(&self, project: &ProjectId, chapter: &ChapterId) -> Result<Option<String>> {
        self.check()?;
        self.inner.chapter_text(project, chapter)
    }

    fn insert_snapshot(&self, input: NewSnapshot) -> Result<Snapshot> {
        self.check()?;
        self.inner.insert_snapshot(input)
    }

    fn upsert_canon_state(&self, canon: CanonState) -> Result<CanonState> {
        self.check()?;
        self.inner.upsert_canon_state(canon)
    }

    fn append_element_events(&self, events: &[ElementEvent]) -> Result<()> {
        self.check()?;
        if self.failing_events.load(Ordering::SeqCst) {
            return Err(LoomError::Backend("write timed out".into()));
        }
        self.inner.append_element_events(events)
    }

    fn list_element_events(&self, project: &ProjectId) -> Result<Vec<ElementEvent>> {
        self.check()?;
        self.inner.list_element_events(project)
    }
}

/// Holds the first two `list_snapshots` callers at a barrier so both compute
/// their sync from the same snapshot list.
struct RacingBackend {
    inner: Arc<MemoryBackend>,
    barrier: Barrier,
    gated: AtomicUsize,
}

impl RacingBackend {
    fn new(inner: Arc<MemoryBackend>) -> Self {
        Self {
            inner,
            barrier: Barrier::new(2),
            gated: AtomicUsize::new(0),
        }
    }
}

impl ProjectBackend for RacingBackend {
    fn list_chapters(&self, project: &ProjectId) -> Result<Vec<ChapterRef>> {
        self.inner.list_chapters(project)
    }

    fn list_snapshots(&self, project: &ProjectId) -> Result<Vec<Snapshot>> {
        let snapshots = self.inner.list_snapshots(project)?;
        if self.gated.fetch_add(1, Ordering::SeqCst) < 2 {
            self.barrier.wait();
        }
        Ok(snapshots)
    }

    fn get_canon_state(&self, project: &ProjectId) -> Result<Option<CanonState>> {
        self.inner.get_canon_state(project)
    }

    fn load_entities(&self, project: &ProjectId) -> Result<SnapshotData> {
        self.inner.load_entities(project)
    }

    fn chapter_text(&self, project: &ProjectId, chapter: &ChapterId) -> Result<Option<String>> {
        self.inner.chapter_text(project, chapter)
    }

    fn insert_snapshot(&self, input: NewSnapshot) -> Result<Snapshot> {
        self.inner.insert_snapshot(input)
    }

    fn upsert_canon_state(&self, canon: CanonState) -> Result<CanonState> {
        self.inner.upsert_canon_state(canon)
    }

    fn append_element_events(&self, events: &[ElementEvent]) -> Result<()> {
        self.inner.append_element_events(events)
    }

    fn list_element_events(&self, project: &ProjectId) -> Result<Vec<ElementEvent>> {
        self.inner.list_element_events(project)
    }

    fn commit_sync(&self, commit: SyncCommit) -> Result<SyncOutcome> {
        self.inner.commit_sync(commit)
    }
}

// --- Loading ---

#[test]
fn test_load_populates_store() {
    let (backend, project) = seeded_backend();
    let session = Session::open(project, backend, TimelineConfig::default());

    assert!(session.load().unwrap());

    let store = session.store();
    assert_eq!(store.chapters().len(), 2);
    assert!(store.snapshots().is_empty());
    assert!(store.canon_state().is_none());
    assert!(!store.is_loading());
}

#[test]
fn test_unknown_project_fails_load() {
    let backend = Arc::new(MemoryBackend::new());
    let session = Session::open(ProjectId::new("ghost"), backend, TimelineConfig::default());

    let err = session.load().unwrap_err();
    assert!(matches!(err, LoomError::NotFound { kind: "project", .. }));
    assert!(!session.store().is_loading());
}

// --- Sync workflow ---

#[test]
fn test_sync_numbers_and_canon_versions_advance() {
    let (backend, project) = seeded_backend();
    let session = Session::open(project, backend, TimelineConfig::default());
    session.load().unwrap();

    let ch1 = ChapterId::new("ch1");
    let first = session.sync_chapter(&ch1).unwrap();
    let second = session.sync_chapter(&ch1).unwrap();
    let other = session.sync_chapter(&ChapterId::new("ch2")).unwrap();

    assert_eq!(first.snapshot.sync_number, SyncNumber(1));
    assert_eq!(second.snapshot.sync_number, SyncNumber(2));
    assert_eq!(other.snapshot.sync_number, SyncNumber(1));

    assert_eq!(first.canon.version, 1);
    assert_eq!(second.canon.version, 2);
    assert_eq!(other.canon.version, 3);
    assert_eq!(other.canon.plot_canon.last_chapter, Some(2));

    let store = session.store();
    assert_eq!(store.snapshots().len(), 3);
    assert_eq!(store.canon_state().unwrap().version, 3);
    assert_eq!(store.snapshots_for_chapter(&ch1).len(), 2);
    assert!(!store.is_syncing());
}

#[test]
fn test_sync_records_stats_and_canon() {
    let (backend, project) = seeded_backend();
    let session = Session::open(project, backend, TimelineConfig::default());

    let outcome = session.sync_chapter(&ChapterId::new("ch1")).unwrap();
    let data = outcome.snapshot.data().unwrap();

    assert_eq!(data.stats.character_count, 1);
    assert_eq!(data.stats.lore_count, 1);
    assert_eq!(data.stats.word_count, 4);
    assert_eq!(outcome.canon.characters_canon[0].name, "Mira");
    assert_eq!(outcome.canon.world_canon.facts[0].title, "The Drowned Bell");
}

#[test]
fn test_sync_unknown_chapter() {
    let (backend, project) = seeded_backend();
    let session = Session::open(project, backend, TimelineConfig::default());

    let err = session.sync_chapter(&ChapterId::new("ch9")).unwrap_err();
    assert!(matches!(err, LoomError::NotFound { kind: "chapter", .. }));
    assert!(!session.store().is_syncing());
}

#[test]
fn test_element_history_tracks_changes() {
    init_tracing();
    let (backend, project) = seeded_backend();
    let session = Session::open(project.clone(), backend.clone(), TimelineConfig::default());
    let ch1 = ChapterId::new("ch1");

    let first = session.sync_chapter(&ch1).unwrap();
    assert_eq!(first.changes.len(), 2);
    assert!(first.changes.iter().all(|e| e.change == ElementChange::Created));

    backend
        .set_entities(
            &project,
            SnapshotData {
                characters: vec![character("c1", "Mira Vell"), character("c2", "Oren")],
                ..Default::default()
            },
        )
        .unwrap();
    let second = session.sync_chapter(&ch1).unwrap();

    let summary: Vec<_> = second
        .changes
        .iter()
        .map(|e| (e.kind, e.element_id.as_str(), e.change))
        .collect();
    assert_eq!(
        summary,
        vec![
            (ElementKind::Character, "c1", ElementChange::Updated),
            (ElementKind::Character, "c2", ElementChange::Created),
            (ElementKind::Lore, "l1", ElementChange::Removed),
        ]
    );
    assert!(second.changes.iter().all(|e| e.sync_number == SyncNumber(2)));

    let history = session.element_history().unwrap();
    assert_eq!(history.len(), 5);

    // Removed lore stays in canon
    assert_eq!(second.canon.world_canon.facts.len(), 1);
}

#[test]
fn test_time_travel_after_sync() {
    let (backend, project) = seeded_backend();
    let session = Session::open(project.clone(), backend.clone(), TimelineConfig::default());
    let ch1 = ChapterId::new("ch1");

    session.sync_chapter(&ch1).unwrap();
    backend
        .set_entities(
            &project,
            SnapshotData {
                characters: vec![character("c1", "Mira"), character("c2", "Oren")],
                ..Default::default()
            },
        )
        .unwrap();
    session.sync_chapter(&ch1).unwrap();

    session.select_chapter(Some(ch1.clone()));
    let store = session.store();
    assert_eq!(store.current_sync_number(), Some(SyncNumber(2)));
    assert!(!store.is_viewing_snapshot());

    session.select_sync(Some(SyncNumber(1)));
    let active = store.active_snapshot().unwrap();
    assert_eq!(active.sync_number, SyncNumber(1));
    assert_eq!(active.data().unwrap().characters.len(), 1);

    session.select_sync(None);
    assert!(!store.is_viewing_snapshot());
    assert_eq!(store.current_sync_number(), Some(SyncNumber(2)));
}

// --- Failures ---

#[test]
fn test_failed_reload_keeps_previous_state() {
    init_tracing();
    let (memory, project) = seeded_backend();
    let backend = Arc::new(FlakyBackend::new(memory));
    let session = Session::open(project, backend.clone(), TimelineConfig::default());

    session.sync_chapter(&ChapterId::new("ch1")).unwrap();
    let before = session.store().view();

    backend.set_failing(true);
    let err = session.load().unwrap_err();
    assert!(err.is_transport());
    assert_eq!(err.user_message(), "Could not reach the server. Please try again.");

    assert_eq!(session.store().view(), before);
    assert!(!session.store().is_loading());
}

#[test]
fn test_failed_sync_clears_syncing() {
    init_tracing();
    let (memory, project) = seeded_backend();
    let backend = Arc::new(FlakyBackend::new(memory));
    let session = Session::open(project, backend.clone(), TimelineConfig::default());
    session.load().unwrap();

    backend.set_failing(true);
    assert!(session.sync_chapter(&ChapterId::new("ch1")).is_err());
    assert!(!session.store().is_syncing());
    assert!(session.store().snapshots().is_empty());

    backend.set_failing(false);
    let outcome = session.sync_chapter(&ChapterId::new("ch1")).unwrap();
    assert_eq!(outcome.snapshot.sync_number, SyncNumber(1));
}

#[test]
fn test_failed_event_append_does_not_lose_history() {
    init_tracing();
    let (memory, project) = seeded_backend();
    let backend = Arc::new(FlakyBackend::new(memory.clone()));
    let session = Session::open(project.clone(), backend.clone(), TimelineConfig::default());
    let ch1 = ChapterId::new("ch1");

    backend.set_failing_events(true);
    assert!(session.sync_chapter(&ch1).is_err());
    assert!(memory.list_snapshots(&project).unwrap().is_empty());
    assert!(memory.get_canon_state(&project).unwrap().is_none());

    backend.set_failing_events(false);
    let outcome = session.sync_chapter(&ch1).unwrap();
    assert_eq!(outcome.snapshot.sync_number, SyncNumber(1));
    assert_eq!(outcome.changes.len(), 2);
    assert_eq!(session.element_history().unwrap().len(), 2);
}

// --- Concurrent syncs ---

#[test]
fn test_concurrent_syncs_get_distinct_sync_numbers() {
    init_tracing();
    let (memory, project) = seeded_backend();
    let backend = Arc::new(RacingBackend::new(memory.clone()));

    let workers: Vec<_> = (0..2)
        .map(|_| {
            let backend = Arc::clone(&backend);
            let project = project.clone();
            thread::spawn(move || {
                ChapterSync::new(backend.as_ref())
                    .run(&project, &ChapterId::new("ch1"))
                    .map(|outcome| outcome.snapshot.sync_number)
            })
        })
        .collect();

    let mut numbers: Vec<_> = workers
        .into_iter()
        .map(|w| w.join().unwrap().unwrap())
        .collect();
    numbers.sort();
    assert_eq!(numbers, vec![SyncNumber(1), SyncNumber(2)]);

    let mut stored: Vec<_> = memory
        .list_snapshots(&project)
        .unwrap()
        .iter()
        .map(|s| s.sync_number)
        .collect();
    stored.sort();
    assert_eq!(stored, vec![SyncNumber(1), SyncNumber(2)]);
    assert_eq!(memory.get_canon_state(&project).unwrap().unwrap().version, 2);
}

// --- Subscriptions ---

#[test]
fn test_subscriber_sees_sync_flags() {
    let (backend, project) = seeded_backend();
    let session = Session::open(project, backend, TimelineConfig::default());
    let handle = session
        .store()
        .subscribe(SubscriptionConfig::default())
        .unwrap();

    session.sync_chapter(&ChapterId::new("ch1")).unwrap();

    let mut events = Vec::new();
    while let Ok(event) = handle.recv_timeout(Duration::from_millis(50)) {
        events.push(event);
    }

    assert!(matches!(events.first(), Some(TimelineEvent::CaughtUp)));
    assert!(events
        .iter()
        .any(|e| matches!(e, TimelineEvent::SyncingChanged { is_syncing: true })));
    assert!(matches!(
        events.last(),
        Some(TimelineEvent::SyncingChanged { is_syncing: false })
    ));
}

#[test]
fn test_close_drops_subscribers() {
    let (backend, project) = seeded_backend();
    let session = Session::open(project, backend, TimelineConfig::default());
    let store = session.store().clone();
    let handle = store.subscribe(SubscriptionConfig::default()).unwrap();

    session.close();

    assert_eq!(store.subscription_count(), 0);
    let events = handle.drain();
    assert!(events
        .iter()
        .any(|e| matches!(e, TimelineEvent::Dropped { .. })));
}

// --- Element log ---

#[test]
fn test_element_log_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("elements.log");
    let project = ProjectId::new("p1");

    {
        let backend = MemoryBackend::new().with_element_log(ElementLog::open(&path).unwrap());
        backend.add_project(project.clone());
        backend
            .upsert_chapter(&project, ChapterRef::new("ch1", 1, "One"), "Words here.")
            .unwrap();
        backend
            .set_entities(
                &project,
                SnapshotData {
                    characters: vec![character("c1", "Mira"), character("c2", "Oren")],
                    ..Default::default()
                },
            )
            .unwrap();

        let session = Session::open(project.clone(), Arc::new(backend), TimelineConfig::default());
        session.sync_chapter(&ChapterId::new("ch1")).unwrap();
    }

    let log = ElementLog::open(&path).unwrap();
    let events = log.read_all().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].1.element_id, "c1");
    assert_eq!(events[1].1.element_id, "c2");
    assert!(events.iter().all(|(_, e)| e.project_id == project));
}
