use std::sync::Arc;

use crate::backend::BookmarkTable;
use crate::error::MutationError;
use crate::model::{BookmarkForm, BookmarkId, NewBookmark, Session};
use crate::store::SharedStore;
use crate::sync;

/// User-initiated writes. Local state only changes after the backend
/// confirms, so a failed request leaves the list as the server last had it.
#[derive(Clone)]
pub struct MutationGateway {
    table: Arc<dyn BookmarkTable>,
    store: SharedStore,
    optimistic_insert: bool,
}

impl MutationGateway {
    pub fn new(table: Arc<dyn BookmarkTable>, store: SharedStore, optimistic_insert: bool) -> Self {
        MutationGateway {
            table,
            store,
            optimistic_insert,
        }
    }

    /// Sends the form as a new bookmark and clears it once the insert is
    /// confirmed. Blank fields are rejected before any request goes out.
    pub async fn create(&self, session: &Session, form: &mut BookmarkForm) -> Result<(), MutationError> {
        let title = form.title.trim();
        let url = form.url.trim();
        if title.is_empty() {
            return Err(MutationError::EmptyField("title"));
        }
        if url.is_empty() {
            return Err(MutationError::EmptyField("url"));
        }

        let record = NewBookmark {
            title: title.to_string(),
            url: url.to_string(),
            user_id: session.user_id().clone(),
        };

        let created = match self.table.insert(session, &record).await {
            Ok(created) => created,
            Err(e) => {
                sync::log_create_error(&record.title, &e);
                return Err(e);
            }
        };
        form.clear();

        match created {
            Some(row) if self.optimistic_insert => {
                tracing::debug!(id = %row.id, "optimistic insert");
                self.store.apply_insert(row).await;
            }
            Some(row) => tracing::debug!(id = %row.id, "bookmark created, waiting for change event"),
            None => tracing::debug!("bookmark created"),
        }
        Ok(())
    }

    /// Deletes remotely, then removes locally without waiting for the echo.
    pub async fn delete(&self, session: &Session, id: &BookmarkId) -> Result<(), MutationError> {
        if let Err(e) = self.table.delete_by_id(session, id).await {
            sync::log_delete_error(id, &e);
            return Err(e);
        }
        self.store.apply_delete(id).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{ChangeEvent, SyncResult};
    use crate::testing::{FakeTable, bookmark, session};
    use std::sync::atomic::Ordering;

    fn setup(optimistic: bool) -> (Arc<FakeTable>, SharedStore, MutationGateway) {
        let table = Arc::new(FakeTable::default());
        let store = SharedStore::new(session("u1").user_id().clone());
        let gateway = MutationGateway::new(table.clone(), store.clone(), optimistic);
        (table, store, gateway)
    }

    #[tokio::test]
    async fn test_blank_fields_send_nothing() {
        let (table, _, gateway) = setup(false);
        let s = session("u1");

        for (title, url) in [("", "https://a.io"), ("A", ""), ("   ", "https://a.io"), ("A", " \t ")] {
            let mut form = BookmarkForm::new(title, url);
            assert!(matches!(
                gateway.create(&s, &mut form).await,
                Err(MutationError::EmptyField(_))
            ));
            assert_eq!(form, BookmarkForm::new(title, url));
        }
        assert_eq!(table.inserts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_create_clears_form_and_waits_for_stream() {
        let (table, store, gateway) = setup(false);
        table.return_representation(true);
        let s = session("u1");

        let mut form = BookmarkForm::new("  Rust ", "https://rust-lang.org");
        gateway.create(&s, &mut form).await.unwrap();

        assert_eq!(form, BookmarkForm::default());
        assert_eq!(table.rows()[0].title, "Rust");
        assert!(store.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_create_keeps_form() {
        let (table, _, gateway) = setup(false);
        table.fail_mutations(true);
        let mut form = BookmarkForm::new("Rust", "https://rust-lang.org");
        assert!(gateway.create(&session("u1"), &mut form).await.is_err());
        assert_eq!(form.title, "Rust");
    }

    #[tokio::test]
    async fn test_optimistic_insert_absorbs_echo() {
        let (table, store, gateway) = setup(true);
        table.return_representation(true);
        let s = session("u1");

        let mut form = BookmarkForm::new("Rust", "https://rust-lang.org");
        gateway.create(&s, &mut form).await.unwrap();
        assert_eq!(store.snapshot().await.len(), 1);

        let echo = table.rows()[0].clone();
        assert_eq!(store.apply(ChangeEvent::Insert(echo)).await, SyncResult::Unchanged);
        assert_eq!(store.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_locally_and_tolerates_echo() {
        let (table, store, gateway) = setup(false);
        let s = session("u1");
        table.seed(vec![bookmark("1", "u1", 1)]);
        store.apply_insert(bookmark("1", "u1", 1)).await;

        gateway.delete(&s, &BookmarkId::new("1")).await.unwrap();
        assert!(store.snapshot().await.is_empty());

        assert_eq!(store.apply_delete(&BookmarkId::new("1")).await, SyncResult::Unchanged);
        assert_eq!(
            store.apply_insert(bookmark("1", "u1", 1)).await,
            SyncResult::Unchanged
        );
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_record() {
        let (table, store, gateway) = setup(false);
        table.fail_mutations(true);
        store.apply_insert(bookmark("1", "u1", 1)).await;

        assert!(gateway.delete(&session("u1"), &BookmarkId::new("1")).await.is_err());
        assert_eq!(store.snapshot().await.len(), 1);
    }
}
