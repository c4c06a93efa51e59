//! Derived lookups over a snapshot list.
//!
//! All functions are pure; a miss is `None` or an empty result.

use crate::types::{ChapterId, Snapshot, SyncNumber};

/// Snapshots of one chapter, ascending by sync number.
///
/// The sort is stable, so duplicate sync numbers keep their list order.
pub fn snapshots_for_chapter(snapshots: &[Snapshot], chapter_id: &ChapterId) -> Vec<Snapshot> {
    let mut matching: Vec<Snapshot> = snapshots
        .iter()
        .filter(|s| s.belongs_to(chapter_id))
        .cloned()
        .collect();
    matching.sort_by_key(|s| s.sync_number);
    matching
}

/// Highest sync number recorded for a chapter.
pub fn latest_sync_for_chapter(snapshots: &[Snapshot], chapter_id: &ChapterId) -> Option<SyncNumber> {
    snapshots
        .iter()
        .filter(|s| s.belongs_to(chapter_id))
        .map(|s| s.sync_number)
        .max()
}

/// Snapshot with the greatest `created_at` across the whole project.
///
/// Ties go to the element encountered last.
pub fn latest_snapshot(snapshots: &[Snapshot]) -> Option<&Snapshot> {
    snapshots.iter().max_by_key(|s| s.created_at)
}

/// Snapshot recorded for `(chapter_id, sync_number)`.
pub fn find_snapshot<'a>(
    snapshots: &'a [Snapshot],
    chapter_id: Option<&ChapterId>,
    sync_number: SyncNumber,
) -> Option<&'a Snapshot> {
    let chapter_id = chapter_id?;
    snapshots
        .iter()
        .find(|s| s.sync_number == sync_number && s.belongs_to(chapter_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProjectId, SnapshotId, SnapshotPayload, Timestamp};

    fn snap(id: &str, chapter: Option<&str>, sync: u64, created: i64) -> Snapshot {
        Snapshot {
            id: SnapshotId::new(id),
            project_id: ProjectId::new("p1"),
            chapter_id: chapter.map(ChapterId::new),
            chapter_number: None,
            sync_number: SyncNumber(sync),
            snapshot_data: SnapshotPayload::default(),
            created_at: Timestamp(created),
        }
    }

    #[test]
    fn test_snapshots_for_chapter_sorted_and_filtered() {
        let list = vec![
            snap("a", Some("ch1"), 3, 1),
            snap("b", Some("ch2"), 1, 2),
            snap("c", Some("ch1"), 1, 3),
            snap("d", None, 2, 4),
            snap("e", Some("ch1"), 2, 5),
        ];

        let ids: Vec<_> = snapshots_for_chapter(&list, &ChapterId::new("ch1"))
            .into_iter()
            .map(|s| s.id.0)
            .collect();
        assert_eq!(ids, vec!["c", "e", "a"]);

        assert!(snapshots_for_chapter(&list, &ChapterId::new("missing")).is_empty());
    }

    #[test]
    fn test_latest_sync_for_chapter() {
        let list = vec![
            snap("a", Some("ch1"), 1, 1),
            snap("b", Some("ch1"), 3, 2),
            snap("c", Some("ch1"), 2, 3),
        ];
        assert_eq!(
            latest_sync_for_chapter(&list, &ChapterId::new("ch1")),
            Some(SyncNumber(3))
        );
        assert_eq!(latest_sync_for_chapter(&list, &ChapterId::new("ch2")), None);
    }

    #[test]
    fn test_latest_snapshot_ties_go_to_last() {
        assert!(latest_snapshot(&[]).is_none());

        let list = vec![
            snap("a", Some("ch1"), 1, 10),
            snap("b", Some("ch2"), 1, 30),
            snap("c", Some("ch1"), 2, 30),
            snap("d", Some("ch1"), 3, 20),
        ];
        assert_eq!(latest_snapshot(&list).unwrap().id.as_str(), "c");
    }

    #[test]
    fn test_find_snapshot_requires_chapter() {
        let list = vec![snap("a", Some("ch1"), 1, 1)];
        let ch1 = ChapterId::new("ch1");

        assert!(find_snapshot(&list, None, SyncNumber(1)).is_none());
        assert!(find_snapshot(&list, Some(&ch1), SyncNumber(2)).is_none());
        assert_eq!(
            find_snapshot(&list, Some(&ch1), SyncNumber(1)).unwrap().id.as_str(),
            "a"
        );
    }
}
