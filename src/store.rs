//! Bookmark List Store
//!
//! The in-memory, per-user list of bookmarks. It is filled by a bulk fetch and
//! then kept current by change events and confirmed local mutations, in any
//! interleaving. Every merge is keyed by bookmark id, so duplicate or
//! out-of-order delivery never produces duplicates:
//!
//! - the list holds at most one record per id
//! - every record belongs to the store owner
//! - records are ordered newest-first by `created_at`
//! - a locally deleted id is remembered, so a late insert echo is ignored

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{RwLock, watch};

use crate::backend::BookmarkTable;
use crate::error::FetchError;
use crate::model::{Bookmark, BookmarkId, Session, UserId};
use crate::sync::{self, ChangeEvent, SyncResult, SyncStats};

#[derive(Debug, Default)]
pub struct BookmarkStore {
    owner: Option<UserId>,
    items: Vec<Bookmark>,
    removed: HashSet<BookmarkId>,
}

impl BookmarkStore {
    pub fn new(owner: UserId) -> Self {
        BookmarkStore {
            owner: Some(owner),
            items: Vec::new(),
            removed: HashSet::new(),
        }
    }

    pub fn owner(&self) -> Option<&UserId> {
        self.owner.as_ref()
    }

    pub fn items(&self) -> &[Bookmark] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: &BookmarkId) -> bool {
        self.position(id).is_some()
    }

    /// Drops everything and starts over for `owner`.
    pub fn reset(&mut self, owner: UserId) {
        self.owner = Some(owner);
        self.items.clear();
        self.removed.clear();
    }

    /// Replaces the whole collection with a fetch result. Foreign records and
    /// ids deleted since the fetch started are dropped; repeated ids keep
    /// their first occurrence.
    pub fn replace(&mut self, owner: &UserId, records: Vec<Bookmark>) {
        self.owner = Some(owner.clone());

        let mut seen = HashSet::new();
        let mut items: Vec<Bookmark> = records
            .into_iter()
            .filter(|b| &b.user_id == owner)
            .filter(|b| !self.removed.contains(&b.id))
            .filter(|b| seen.insert(b.id.clone()))
            .collect();
        // stable: equal timestamps keep server order
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        self.items = items;
    }

    pub fn apply_insert(&mut self, record: Bookmark) -> SyncResult {
        if !self.owns(&record) || self.removed.contains(&record.id) || self.contains(&record.id) {
            return SyncResult::Unchanged;
        }
        self.insert_sorted(record);
        SyncResult::Created
    }

    pub fn apply_update(&mut self, record: Bookmark) -> SyncResult {
        let Some(idx) = self.position(&record.id) else {
            return SyncResult::Unchanged;
        };

        if !self.owns(&record) {
            // ownership moved away, the record is no longer ours to show
            self.items.remove(idx);
            return SyncResult::Deleted;
        }

        if self.items[idx] == record {
            return SyncResult::Unchanged;
        }

        if self.items[idx].created_at == record.created_at {
            self.items[idx] = record;
        } else {
            self.items.remove(idx);
            self.insert_sorted(record);
        }
        SyncResult::Updated
    }

    pub fn apply_delete(&mut self, id: &BookmarkId) -> SyncResult {
        self.removed.insert(id.clone());
        match self.position(id) {
            Some(idx) => {
                self.items.remove(idx);
                SyncResult::Deleted
            }
            None => SyncResult::Unchanged,
        }
    }

    pub fn apply(&mut self, event: ChangeEvent) -> SyncResult {
        match event {
            ChangeEvent::Insert(record) => self.apply_insert(record),
            ChangeEvent::Update(record) => self.apply_update(record),
            ChangeEvent::Delete(id) => self.apply_delete(&id),
        }
    }

    fn owns(&self, record: &Bookmark) -> bool {
        self.owner.as_ref() == Some(&record.user_id)
    }

    fn position(&self, id: &BookmarkId) -> Option<usize> {
        self.items.iter().position(|b| &b.id == id)
    }

    // Ties go in front of existing equal timestamps, so the newest arrival is
    // a prepend.
    fn insert_sorted(&mut self, record: Bookmark) {
        let idx = self.items.partition_point(|b| b.created_at > record.created_at);
        self.items.insert(idx, record);
    }
}

/// The store as shared between the change stream task, the gateway and the
/// web handlers. Each operation runs to completion under the write lock and
/// bumps a revision that observers can wait on.
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<RwLock<StoreState>>,
    revision: Arc<watch::Sender<u64>>,
}

struct StoreState {
    store: BookmarkStore,
    stats: SyncStats,
}

impl SharedStore {
    pub fn new(owner: UserId) -> Self {
        let (tx, _) = watch::channel(0);
        SharedStore {
            inner: Arc::new(RwLock::new(StoreState {
                store: BookmarkStore::new(owner),
                stats: SyncStats::default(),
            })),
            revision: Arc::new(tx),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub async fn snapshot(&self) -> Vec<Bookmark> {
        self.inner.read().await.store.items().to_vec()
    }

    pub async fn owner(&self) -> Option<UserId> {
        self.inner.read().await.store.owner().cloned()
    }

    pub async fn stats(&self) -> SyncStats {
        self.inner.read().await.stats.clone()
    }

    pub async fn reset(&self, owner: UserId) {
        self.inner.write().await.store.reset(owner);
        self.bump();
    }

    /// Fetches the owner's bookmarks and replaces the local list. On failure
    /// the previous list stays as it was.
    pub async fn load(&self, table: &dyn BookmarkTable, session: &Session) -> Result<usize, FetchError> {
        let user_id = session.user_id();
        let records = match table.select_by_owner(session).await {
            Ok(records) => records,
            Err(e) => {
                sync::log_fetch_error(user_id.as_str(), &e);
                return Err(e);
            }
        };

        let count = {
            let mut state = self.inner.write().await;
            state.store.replace(user_id, records);
            state.store.len()
        };
        tracing::info!(user_id = %user_id, count, "loaded bookmarks");
        self.bump();
        Ok(count)
    }

    pub async fn apply(&self, event: ChangeEvent) -> SyncResult {
        let result = {
            let mut state = self.inner.write().await;
            let result = state.store.apply(event.clone());
            result.record(&mut state.stats);
            result
        };
        sync::log_applied(&event, result);
        if result.changed() {
            self.bump();
        }
        result
    }

    pub async fn apply_insert(&self, record: Bookmark) -> SyncResult {
        self.apply(ChangeEvent::Insert(record)).await
    }

    pub async fn apply_update(&self, record: Bookmark) -> SyncResult {
        self.apply(ChangeEvent::Update(record)).await
    }

    pub async fn apply_delete(&self, id: &BookmarkId) -> SyncResult {
        self.apply(ChangeEvent::Delete(id.clone())).await
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}
