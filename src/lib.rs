//! # Story Loom
//!
//! Timeline and canon state for a story-writing assistant.
//!
//! ## Core Concepts
//!
//! - **Snapshots**: the project's characters, lore, outline and story map as
//!   recorded at one sync point of a chapter
//! - **Canon**: the single, versioned summary of what the story has
//!   established
//! - **Timeline store**: shared view state for moving between a chapter's
//!   live state and its historical snapshots
//! - **Sessions**: one store per open project, fed from a backend
//!
//! ## Example
//!
//! ```ignore
//! use story_loom::{MemoryBackend, ProjectId, Session, TimelineConfig};
//!
//! let backend = Arc::new(MemoryBackend::new());
//! let session = Session::open(ProjectId::new("p1"), backend, TimelineConfig::default());
//!
//! session.load()?;
//! session.select_chapter(Some("ch1".into()));
//!
//! // Sync the chapter, then look at the previous sync point
//! let outcome = session.sync_chapter(&"ch1".into())?;
//! session.select_sync(outcome.snapshot.sync_number.prev());
//! ```

pub mod ai;
pub mod backend;
pub mod error;
pub mod session;
pub mod settings;
pub mod subscriptions;
pub mod sync;
pub mod timeline;
pub mod types;

// Re-exports
pub use backend::{ChapterRecord, ElementLog, MemoryBackend, ProjectBackend, SyncCommit};
pub use error::{LoomError, Result};
pub use session::Session;
pub use settings::Settings;
pub use subscriptions::{
    DropReason, EventClass, SubscriptionConfig, SubscriptionFilter, SubscriptionHandle,
    SubscriptionId, SubscriptionManager, TimelineEvent,
};
pub use sync::{diff_entities, ChapterSync, ElementDiff, SyncOutcome};
pub use timeline::{LoadTicket, LoadedTimeline, TimelineConfig, TimelineStore, TimelineView};
pub use types::*;
