//! Hosted backend clients
//!
//! Authentication, the `bookmarks` table and the realtime change feed all live
//! in a hosted backend. Each concern sits behind a trait so the reconciliation
//! code can run against the real HTTP/WebSocket clients or an in-memory fake.

mod auth;
mod realtime;
mod rest;

pub use auth::HttpAuth;
pub use realtime::RealtimeFeed;
pub use rest::RestTable;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::config::Config;
use crate::error::{FetchError, MutationError, SessionError, SubscriptionError};
use crate::model::{Bookmark, BookmarkId, NewBookmark, Session, UserIdentity};
use crate::sync::ChangeEvent;

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Resolves an access token to the user it was issued for.
    async fn get_user(&self, access_token: &str) -> Result<UserIdentity, SessionError>;

    /// URL that starts the OAuth flow and sends the browser back to `redirect_to`.
    fn authorize_url(&self, provider: &str, redirect_to: &str) -> String;

    async fn sign_out(&self, access_token: &str) -> Result<(), SessionError>;
}

#[async_trait]
pub trait BookmarkTable: Send + Sync {
    /// All bookmarks owned by the session user, newest first.
    async fn select_by_owner(&self, session: &Session) -> Result<Vec<Bookmark>, FetchError>;

    /// Returns the created row when the backend hands one back.
    async fn insert(&self, session: &Session, record: &NewBookmark) -> Result<Option<Bookmark>, MutationError>;

    async fn delete_by_id(&self, session: &Session, id: &BookmarkId) -> Result<(), MutationError>;
}

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Opens a change stream scoped to the session user. The stream yields
    /// events until it fails or is dropped.
    async fn open(&self, session: &Session) -> Result<ChangeStream, SubscriptionError>;
}

/// Receiving end of an open change feed. Dropping it cancels the producer.
pub struct ChangeStream {
    rx: mpsc::Receiver<Result<ChangeEvent, SubscriptionError>>,
    _guard: DropGuard,
}

impl ChangeStream {
    pub fn new(rx: mpsc::Receiver<Result<ChangeEvent, SubscriptionError>>, token: CancellationToken) -> Self {
        ChangeStream {
            rx,
            _guard: token.drop_guard(),
        }
    }

    /// `None` means the producer went away without reporting an error.
    pub async fn next(&mut self) -> Option<Result<ChangeEvent, SubscriptionError>> {
        self.rx.recv().await
    }
}

pub fn topic_for(user: &UserIdentity) -> String {
    format!("realtime:user-bookmarks-{}", user.id)
}

/// The three backend collaborators, shared by every workspace.
#[derive(Clone)]
pub struct Backends {
    pub auth: Arc<dyn AuthProvider>,
    pub table: Arc<dyn BookmarkTable>,
    pub feed: Arc<dyn ChangeFeed>,
}

impl Backends {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("smartmark/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Backends {
            auth: Arc::new(HttpAuth::new(client.clone(), &cfg.backend)),
            table: Arc::new(RestTable::new(client, &cfg.backend)),
            feed: Arc::new(RealtimeFeed::new(cfg)),
        })
    }
}
