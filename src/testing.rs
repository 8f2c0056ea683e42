//! In-memory stand-ins for the hosted backend, shared by unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::backend::{AuthProvider, BookmarkTable, ChangeFeed, ChangeStream};
use crate::error::{FetchError, MutationError, SessionError, SubscriptionError};
use crate::model::{Bookmark, BookmarkId, NewBookmark, Session, UserId, UserIdentity};
use crate::sync::ChangeEvent;

pub fn bookmark(id: &str, user: &str, ts: i64) -> Bookmark {
    Bookmark {
        id: BookmarkId::new(id),
        title: format!("title {}", id),
        url: format!("https://example.com/{}", id),
        user_id: UserId::new(user),
        created_at: Utc.timestamp_opt(1_700_000_000 + ts, 0).unwrap(),
    }
}

pub fn session(user: &str) -> Session {
    Session {
        access_token: format!("token-{}", user),
        user: UserIdentity {
            id: UserId::new(user),
            email: Some(format!("{}@example.com", user)),
        },
    }
}

#[derive(Default)]
pub struct FakeTable {
    rows: Mutex<Vec<Bookmark>>,
    next_id: AtomicUsize,
    fail_select: AtomicBool,
    fail_mutation: AtomicBool,
    return_rows: AtomicBool,
    pub selects: AtomicUsize,
    pub inserts: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl FakeTable {
    pub fn seed(&self, rows: Vec<Bookmark>) {
        *self.rows.lock().unwrap() = rows;
    }

    pub fn rows(&self) -> Vec<Bookmark> {
        self.rows.lock().unwrap().clone()
    }

    pub fn fail_next_select(&self) {
        self.fail_select.store(true, Ordering::SeqCst);
    }

    pub fn fail_mutations(&self, fail: bool) {
        self.fail_mutation.store(fail, Ordering::SeqCst);
    }

    pub fn return_representation(&self, yes: bool) {
        self.return_rows.store(yes, Ordering::SeqCst);
    }
}

#[async_trait]
impl BookmarkTable for FakeTable {
    async fn select_by_owner(&self, session: &Session) -> Result<Vec<Bookmark>, FetchError> {
        self.selects.fetch_add(1, Ordering::SeqCst);
        if self.fail_select.swap(false, Ordering::SeqCst) {
            return Err(FetchError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        let mut rows: Vec<Bookmark> = self
            .rows()
            .into_iter()
            .filter(|b| &b.user_id == session.user_id())
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn insert(&self, session: &Session, record: &NewBookmark) -> Result<Option<Bookmark>, MutationError> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        if self.fail_mutation.load(Ordering::SeqCst) {
            return Err(MutationError::Status {
                status: 500,
                body: "boom".to_string(),
            });
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 100;
        let mut row = bookmark(&n.to_string(), session.user_id().as_str(), n as i64);
        row.title = record.title.clone();
        row.url = record.url.clone();
        self.rows.lock().unwrap().push(row.clone());
        Ok(self.return_rows.load(Ordering::SeqCst).then_some(row))
    }

    async fn delete_by_id(&self, _session: &Session, id: &BookmarkId) -> Result<(), MutationError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_mutation.load(Ordering::SeqCst) {
            return Err(MutationError::Status {
                status: 500,
                body: "boom".to_string(),
            });
        }
        self.rows.lock().unwrap().retain(|b| &b.id != id);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeAuth {
    users: Mutex<HashMap<String, UserIdentity>>,
    pub sign_outs: AtomicUsize,
    fail_sign_out: AtomicBool,
}

impl FakeAuth {
    pub fn with_session(session: &Session) -> Self {
        let auth = FakeAuth::default();
        auth.users
            .lock()
            .unwrap()
            .insert(session.access_token.clone(), session.user.clone());
        auth
    }

    pub fn fail_sign_out(&self) {
        self.fail_sign_out.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuthProvider for FakeAuth {
    async fn get_user(&self, access_token: &str) -> Result<UserIdentity, SessionError> {
        self.users
            .lock()
            .unwrap()
            .get(access_token)
            .cloned()
            .ok_or_else(|| SessionError::Rejected("unknown token".to_string()))
    }

    fn authorize_url(&self, provider: &str, redirect_to: &str) -> String {
        format!("https://auth.test/authorize?provider={}&redirect_to={}", provider, redirect_to)
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), SessionError> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(SessionError::Rejected("logout failed".to_string()));
        }
        self.users.lock().unwrap().remove(access_token);
        Ok(())
    }
}

/// Each `open` hands out a fresh channel; tests push events through the
/// sender recorded for that open.
#[derive(Default)]
pub struct FakeFeed {
    opened: Mutex<Vec<(UserId, mpsc::Sender<Result<ChangeEvent, SubscriptionError>>, CancellationToken)>>,
    fail_opens: AtomicUsize,
}

impl FakeFeed {
    pub fn opens(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    pub fn fail_next_opens(&self, n: usize) {
        self.fail_opens.store(n, Ordering::SeqCst);
    }

    pub fn sender(&self, nth: usize) -> mpsc::Sender<Result<ChangeEvent, SubscriptionError>> {
        self.opened.lock().unwrap()[nth].1.clone()
    }

    pub fn user(&self, nth: usize) -> UserId {
        self.opened.lock().unwrap()[nth].0.clone()
    }

    pub fn is_cancelled(&self, nth: usize) -> bool {
        self.opened.lock().unwrap()[nth].2.is_cancelled()
    }
}

#[async_trait]
impl ChangeFeed for FakeFeed {
    async fn open(&self, session: &Session) -> Result<ChangeStream, SubscriptionError> {
        let pending = self.fail_opens.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_opens.store(pending - 1, Ordering::SeqCst);
            return Err(SubscriptionError::Connect("refused".to_string()));
        }
        let (tx, rx) = mpsc::channel(16);
        let token = CancellationToken::new();
        self.opened
            .lock()
            .unwrap()
            .push((session.user_id().clone(), tx, token.clone()));
        Ok(ChangeStream::new(rx, token))
    }
}
