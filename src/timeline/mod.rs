//! Timeline state: chapter selection, sync snapshots and canon.
//!
//! [`TimelineStore`] is the shared container the presentation layer reads
//! from and writes to. It does no I/O; loads go through a [`LoadTicket`] so
//! that a slow response for an old request cannot overwrite a newer one.

mod queries;
mod store;
mod view;

pub use queries::{find_snapshot, latest_snapshot, latest_sync_for_chapter, snapshots_for_chapter};
pub use store::{LoadTicket, LoadedTimeline, TimelineConfig, TimelineStore};
pub use view::TimelineView;
