//! Subscription system for timeline store changes.
//!
//! Every store mutation is published as a [`TimelineEvent`] to in-process
//! subscribers:
//! - Data replacement (chapters, snapshots, canon, loads, reset)
//! - Selection changes (chapter, sync position)
//! - Loading/syncing flags
//!
//! Subscriptions support:
//! - Filtering by event class
//! - An optional initial view of the current state
//! - Bounded buffers with slow-subscriber dropping
//!
//! # Example
//!
//! ```ignore
//! let handle = store.subscribe(SubscriptionConfig {
//!     filter: SubscriptionFilter::selection(),
//!     send_initial_view: true,
//!     ..Default::default()
//! })?;
//!
//! loop {
//!     match handle.recv() {
//!         Ok(TimelineEvent::View { view }) => render(&view),
//!         Ok(TimelineEvent::ChapterSelected { chapter_id, .. }) => focus(chapter_id),
//!         Ok(TimelineEvent::Dropped { .. }) | Err(_) => break,
//!         Ok(_) => {}
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{
    DropReason, EventClass, SubscriptionConfig, SubscriptionFilter, SubscriptionHandle,
    SubscriptionId, TimelineEvent,
};
