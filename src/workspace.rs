use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, OnceCell, RwLock};

use crate::backend::Backends;
use crate::gateway::MutationGateway;
use crate::model::{Session, UserId};
use crate::store::SharedStore;
use crate::subscriber::{ChangeStreamSubscriber, ReconnectPolicy};

#[derive(Debug, Clone, Copy)]
pub struct WorkspaceSettings {
    pub optimistic_insert: bool,
    pub reconnect: ReconnectPolicy,
    /// Grace period between the last view going away and the workspace closing.
    pub idle_grace: Duration,
}

/// Everything one signed-in user needs: their list, the gateway that writes
/// to it and the subscription that keeps it live.
pub struct Workspace {
    backends: Backends,
    store: SharedStore,
    gateway: MutationGateway,
    subscriber: Mutex<ChangeStreamSubscriber>,
    session: RwLock<Session>,
    opened: OnceCell<()>,
    views: AtomicUsize,
    acquired: AtomicU64,
}

impl Workspace {
    pub fn new(backends: &Backends, session: &Session, settings: WorkspaceSettings) -> Self {
        let store = SharedStore::new(session.user_id().clone());
        let gateway = MutationGateway::new(backends.table.clone(), store.clone(), settings.optimistic_insert);
        let subscriber = ChangeStreamSubscriber::new(
            backends.feed.clone(),
            backends.table.clone(),
            store.clone(),
            settings.reconnect,
        );

        Workspace {
            backends: backends.clone(),
            store,
            gateway,
            subscriber: Mutex::new(subscriber),
            session: RwLock::new(session.clone()),
            opened: OnceCell::new(),
            views: AtomicUsize::new(0),
            acquired: AtomicU64::new(0),
        }
    }

    /// Initial fetch, then attach. Runs once; later calls wait for the first.
    pub async fn open(&self) {
        self.opened
            .get_or_init(|| async {
                let session = self.session.read().await.clone();
                let mut subscriber = self.subscriber.lock().await;
                self.reload(&session).await;
                if let Err(e) = subscriber.attach(&session).await {
                    tracing::error!(user_id = %session.user_id(), error = %e, "workspace opened without live updates");
                }
            })
            .await;
    }

    /// Moves the subscription to `session`. A different user starts from an
    /// empty list. Either way the list is fetched again once the new
    /// subscription is up, so nothing written in between is missed.
    pub async fn reattach(&self, session: &Session) {
        let mut subscriber = self.subscriber.lock().await;
        subscriber.detach().await;

        let previous = self.session.read().await.user_id().clone();
        *self.session.write().await = session.clone();

        if &previous != session.user_id() {
            tracing::info!(from = %previous, to = %session.user_id(), "switching user");
            self.store.reset(session.user_id().clone()).await;
        }

        if let Err(e) = subscriber.attach(session).await {
            tracing::error!(user_id = %session.user_id(), error = %e, "re-attach failed");
        }
        self.reload(session).await;
    }

    async fn reload(&self, session: &Session) {
        if let Err(e) = self.store.load(self.backends.table.as_ref(), session).await {
            tracing::warn!(user_id = %session.user_id(), error = %e, "workspace keeps its previous list");
        }
    }

    pub async fn close(&self) {
        self.subscriber.lock().await.detach().await;
    }

    pub async fn is_attached(&self) -> bool {
        self.subscriber.lock().await.is_attached()
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn gateway(&self) -> &MutationGateway {
        &self.gateway
    }

    pub async fn session(&self) -> Session {
        self.session.read().await.clone()
    }

    pub fn views(&self) -> usize {
        self.views.load(Ordering::SeqCst)
    }
}

/// A view's hold on a workspace. When the last lease goes away the workspace
/// is closed after the idle grace period, unless a new view shows up first.
pub struct WorkspaceLease {
    registry: Arc<Workspaces>,
    key: String,
    workspace: Arc<Workspace>,
}

impl Deref for WorkspaceLease {
    type Target = Workspace;

    fn deref(&self) -> &Workspace {
        &self.workspace
    }
}

impl Drop for WorkspaceLease {
    fn drop(&mut self) {
        if self.workspace.views.fetch_sub(1, Ordering::SeqCst) != 1 {
            return;
        }

        let acquired = self.workspace.acquired.load(Ordering::SeqCst);
        let registry = self.registry.clone();
        let key = self.key.clone();
        let workspace = self.workspace.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { registry.release(&key, workspace, acquired).await });
            }
            Err(_) => tracing::warn!("no runtime left to close idle workspace"),
        }
    }
}

/// Live workspaces keyed by access token, so each signed-in device keeps its
/// own subscription.
pub struct Workspaces {
    backends: Backends,
    settings: WorkspaceSettings,
    open: Mutex<HashMap<String, Arc<Workspace>>>,
}

impl Workspaces {
    pub fn new(backends: Backends, settings: WorkspaceSettings) -> Self {
        Workspaces {
            backends,
            settings,
            open: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_or_open(self: &Arc<Self>, session: &Session) -> WorkspaceLease {
        let key = session.access_token.clone();
        let workspace = {
            let mut open = self.open.lock().await;
            let workspace = open
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Workspace::new(&self.backends, session, self.settings)))
                .clone();
            workspace.views.fetch_add(1, Ordering::SeqCst);
            workspace.acquired.fetch_add(1, Ordering::SeqCst);
            workspace
        };

        let lease = WorkspaceLease {
            registry: self.clone(),
            key,
            workspace,
        };
        lease.open().await;
        lease
    }

    /// Closes `workspace` if it stayed unused for the grace period.
    async fn release(&self, key: &str, workspace: Arc<Workspace>, acquired: u64) {
        tokio::time::sleep(self.settings.idle_grace).await;

        let removed = {
            let mut open = self.open.lock().await;
            let idle = workspace.views() == 0 && workspace.acquired.load(Ordering::SeqCst) == acquired;
            let current = open.get(key).is_some_and(|ws| Arc::ptr_eq(ws, &workspace));
            if idle && current { open.remove(key) } else { None }
        };

        if let Some(workspace) = removed {
            let user_id = workspace.session().await.user_id().clone();
            workspace.close().await;
            tracing::info!(user_id = %user_id, "idle workspace closed");
        }
    }

    /// Closes every workspace of `user_id`, on every device.
    pub async fn close(&self, user_id: &UserId) {
        let mut removed = Vec::new();
        {
            let mut open = self.open.lock().await;
            let mut keys = Vec::new();
            for (key, ws) in open.iter() {
                if ws.session().await.user_id() == user_id {
                    keys.push(key.clone());
                }
            }
            for key in keys {
                removed.extend(open.remove(&key));
            }
        }
        for workspace in removed {
            workspace.close().await;
        }
    }

    pub async fn close_all(&self) {
        let drained: Vec<_> = self.open.lock().await.drain().map(|(_, ws)| ws).collect();
        for workspace in drained {
            workspace.close().await;
        }
        tracing::info!("all workspaces closed");
    }

    pub async fn len(&self) -> usize {
        self.open.lock().await.len()
    }
}
