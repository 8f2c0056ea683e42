use std::error::Error;

use crate::model::{Bookmark, BookmarkId};
use crate::unpack_error;

/// A row-level change delivered by the change stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Insert(Bookmark),
    Update(Bookmark),
    Delete(BookmarkId),
}

impl ChangeEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::Insert(_) => "insert",
            ChangeEvent::Update(_) => "update",
            ChangeEvent::Delete(_) => "delete",
        }
    }

    pub fn id(&self) -> &BookmarkId {
        match self {
            ChangeEvent::Insert(b) | ChangeEvent::Update(b) => &b.id,
            ChangeEvent::Delete(id) => id,
        }
    }
}

/// Outcome of merging one change into the local list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncResult {
    Created,
    Updated,
    Deleted,
    Unchanged,
}

impl SyncResult {
    pub fn record(self, stats: &mut SyncStats) -> bool {
        match self {
            SyncResult::Created => stats.created += 1,
            SyncResult::Updated => stats.updated += 1,
            SyncResult::Deleted => stats.deleted += 1,
            SyncResult::Unchanged => stats.unchanged += 1,
        }
        self.changed()
    }

    pub fn changed(self) -> bool {
        !matches!(self, SyncResult::Unchanged)
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SyncStats {
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
    pub unchanged: u64,
}

pub fn log_fetch_error(user_id: &str, e: &dyn Error) {
    tracing::error!("Failed to fetch bookmarks for {}: {}", user_id, unpack_error(e));
}

pub fn log_create_error(title: &str, e: &dyn Error) {
    tracing::error!("Failed to create bookmark {:?}: {}", title, unpack_error(e));
}

pub fn log_delete_error(id: &BookmarkId, e: &dyn Error) {
    tracing::error!("Failed to delete bookmark {}: {}", id, unpack_error(e));
}

pub fn log_applied(event: &ChangeEvent, result: SyncResult) {
    tracing::debug!(kind = event.kind(), id = %event.id(), ?result, "applied change event");
}
