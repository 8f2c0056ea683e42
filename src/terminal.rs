//! `smartmark watch`: one user's list, followed live from the terminal.

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::backend::Backends;
use crate::model::Bookmark;
use crate::session::{SessionGuard, SessionState};
use crate::workspace::{Workspace, WorkspaceSettings};

pub fn render_list(email: Option<&str>, bookmarks: &[Bookmark]) -> String {
    let mut out = String::new();
    if let Some(email) = email {
        out.push_str(&format!("Logged in as {}\n", email));
    }
    if bookmarks.is_empty() {
        out.push_str("No bookmarks yet\n");
        return out;
    }
    for b in bookmarks {
        out.push_str(&format!(
            "{}  {}\n    {}  [{}]\n",
            b.created_at.format("%Y-%m-%d %H:%M"),
            b.title,
            b.url,
            b.id
        ));
    }
    out
}

pub async fn run(
    guard: SessionGuard,
    backends: Backends,
    settings: WorkspaceSettings,
    token: Option<String>,
    shutdown: CancellationToken,
) -> Result<()> {
    let session = match guard.check(token.as_deref()).await {
        SessionState::Authenticated(session) => session,
        SessionState::Unauthenticated => {
            println!("Not signed in. Open this URL, then pass the access token with --token:");
            println!("{}", guard.login_url());
            return Ok(());
        }
    };

    let workspace = Workspace::new(&backends, &session, settings);
    workspace.open().await;

    let email = session.user.email.clone();
    let mut revisions = workspace.store().subscribe();
    loop {
        revisions.borrow_and_update();
        let bookmarks = workspace.store().snapshot().await;
        println!("{}", render_list(email.as_deref(), &bookmarks));

        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    workspace.close().await;
    let stats = workspace.store().stats().await;
    tracing::info!(
        created = stats.created,
        updated = stats.updated,
        deleted = stats.deleted,
        unchanged = stats.unchanged,
        "watch finished"
    );
    Ok(())
}
