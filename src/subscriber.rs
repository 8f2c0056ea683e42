//! Change Stream Subscriber
//!
//! Holds at most one live change subscription, scoped to a single user, and
//! feeds its events into the [`SharedStore`]. The subscription is an owned
//! handle: `detach` cancels the pump task and waits for it, so once it
//! returns no event from the old scope can reach the store. Dropping the
//! subscriber cancels it as well.
//!
//! When the feed fails the pump reconnects with capped exponential backoff
//! and reloads the list, since events sent while disconnected are lost.
//! With reconnect disabled a failed feed just goes quiet.

use std::mem;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::{BookmarkTable, ChangeFeed, ChangeStream};
use crate::config::Realtime;
use crate::error::SubscriptionError;
use crate::model::{Session, UserId};
use crate::store::SharedStore;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub initial: Duration,
    pub max: Duration,
}

impl ReconnectPolicy {
    pub fn from_config(cfg: &Realtime) -> Self {
        ReconnectPolicy {
            enabled: cfg.reconnect,
            initial: Duration::from_millis(cfg.reconnect_initial_ms),
            max: Duration::from_millis(cfg.reconnect_max_ms),
        }
    }

    pub fn disabled() -> Self {
        ReconnectPolicy {
            enabled: false,
            initial: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.initial.saturating_mul(1u32 << attempt.min(16)).min(self.max)
    }
}

pub struct Subscription {
    user_id: UserId,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

enum SubscriberState {
    Detached,
    Attached(Subscription),
}

pub struct ChangeStreamSubscriber {
    feed: Arc<dyn ChangeFeed>,
    table: Arc<dyn BookmarkTable>,
    store: SharedStore,
    policy: ReconnectPolicy,
    state: SubscriberState,
}

impl ChangeStreamSubscriber {
    pub fn new(
        feed: Arc<dyn ChangeFeed>,
        table: Arc<dyn BookmarkTable>,
        store: SharedStore,
        policy: ReconnectPolicy,
    ) -> Self {
        ChangeStreamSubscriber {
            feed,
            table,
            store,
            policy,
            state: SubscriberState::Detached,
        }
    }

    pub fn is_attached(&self) -> bool {
        matches!(self.state, SubscriberState::Attached(_))
    }

    pub fn attached_user(&self) -> Option<&UserId> {
        match &self.state {
            SubscriberState::Attached(sub) => Some(&sub.user_id),
            SubscriberState::Detached => None,
        }
    }

    /// Subscribes to `session`'s changes, replacing any earlier subscription.
    ///
    /// If the first open fails and reconnect is enabled the subscriber still
    /// attaches and keeps retrying in the background; otherwise the error is
    /// returned and the subscriber stays detached.
    pub async fn attach(&mut self, session: &Session) -> Result<(), SubscriptionError> {
        self.detach().await;

        let first = match self.feed.open(session).await {
            Ok(stream) => Some(stream),
            Err(e) if self.policy.enabled => {
                tracing::warn!(user_id = %session.user_id(), error = %e, "change stream unavailable, retrying");
                None
            }
            Err(e) => {
                tracing::error!(user_id = %session.user_id(), error = %e, "failed to attach change stream");
                return Err(e);
            }
        };

        let token = CancellationToken::new();
        let pump = Pump {
            feed: self.feed.clone(),
            table: self.table.clone(),
            store: self.store.clone(),
            policy: self.policy,
            session: session.clone(),
            token: token.clone(),
        };
        let task = tokio::spawn(pump.run(first));

        tracing::info!(user_id = %session.user_id(), "change stream attached");
        self.state = SubscriberState::Attached(Subscription {
            user_id: session.user_id().clone(),
            token,
            task,
        });
        Ok(())
    }

    pub async fn detach(&mut self) {
        if let SubscriberState::Attached(mut sub) = mem::replace(&mut self.state, SubscriberState::Detached) {
            sub.token.cancel();
            if let Err(e) = (&mut sub.task).await {
                tracing::warn!(error = %e, "change stream task ended abnormally");
            }
            tracing::info!(user_id = %sub.user_id, "change stream detached");
        }
    }
}

struct Pump {
    feed: Arc<dyn ChangeFeed>,
    table: Arc<dyn BookmarkTable>,
    store: SharedStore,
    policy: ReconnectPolicy,
    session: Session,
    token: CancellationToken,
}

impl Pump {
    async fn run(self, mut stream: Option<ChangeStream>) {
        let mut attempt: u32 = 0;

        loop {
            if let Some(mut current) = stream.take() {
                let Some(failure) = self.drain(&mut current).await else {
                    return;
                };
                tracing::warn!(user_id = %self.session.user_id(), error = %failure, "change stream failed");
            }

            if !self.policy.enabled {
                return;
            }

            let delay = self.policy.delay(attempt);
            attempt = attempt.saturating_add(1);
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let opened = tokio::select! {
                biased;
                _ = self.token.cancelled() => return,
                opened = self.feed.open(&self.session) => opened,
            };
            match opened {
                Ok(reopened) => {
                    tracing::info!(user_id = %self.session.user_id(), attempt, "change stream reconnected");
                    attempt = 0;
                    tokio::select! {
                        biased;
                        _ = self.token.cancelled() => return,
                        _ = self.store.load(self.table.as_ref(), &self.session) => {}
                    }
                    stream = Some(reopened);
                }
                Err(e) => {
                    tracing::warn!(user_id = %self.session.user_id(), attempt, error = %e, "change stream reconnect failed");
                }
            }
        }
    }

    /// Applies events until the stream fails (`Some`) or the subscription is
    /// cancelled (`None`).
    async fn drain(&self, stream: &mut ChangeStream) -> Option<SubscriptionError> {
        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return None,
                item = stream.next() => match item {
                    Some(Ok(event)) => {
                        self.store.apply(event).await;
                    }
                    Some(Err(e)) => return Some(e),
                    None => return Some(SubscriptionError::Closed("change stream ended".to_string())),
                }
            }
        }
    }
}
