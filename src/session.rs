use std::sync::Arc;

use crate::backend::AuthProvider;
use crate::error::SessionError;
use crate::model::Session;
use crate::unpack_error;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated(Session),
}

/// Decides between the login view and the main view. A failed check is the
/// same as having no session; nothing is retried.
#[derive(Clone)]
pub struct SessionGuard {
    auth: Arc<dyn AuthProvider>,
    provider: String,
    redirect_to: String,
}

impl SessionGuard {
    pub fn new(auth: Arc<dyn AuthProvider>, provider: &str, redirect_to: &str) -> Self {
        SessionGuard {
            auth,
            provider: provider.to_string(),
            redirect_to: redirect_to.to_string(),
        }
    }

    pub async fn check(&self, access_token: Option<&str>) -> SessionState {
        match self.resolve(access_token).await {
            Ok(session) => {
                tracing::debug!(user_id = %session.user_id(), "session found");
                SessionState::Authenticated(session)
            }
            Err(SessionError::Missing) => SessionState::Unauthenticated,
            Err(e) => {
                let error = unpack_error(&e);
                tracing::warn!(%error, "session check failed, treating as signed out");
                SessionState::Unauthenticated
            }
        }
    }

    async fn resolve(&self, access_token: Option<&str>) -> Result<Session, SessionError> {
        let token = access_token.filter(|t| !t.trim().is_empty()).ok_or(SessionError::Missing)?;
        let user = self.auth.get_user(token).await?;
        Ok(Session {
            access_token: token.to_string(),
            user,
        })
    }

    pub fn login_url(&self) -> String {
        self.auth.authorize_url(&self.provider, &self.redirect_to)
    }

    /// Ends the session with the provider. The local session is dropped by
    /// the caller whatever the outcome.
    pub async fn logout(&self, session: &Session) {
        match self.auth.sign_out(&session.access_token).await {
            Ok(()) => tracing::info!(user_id = %session.user_id(), "signed out"),
            Err(e) => {
                let error = unpack_error(&e);
                tracing::warn!(user_id = %session.user_id(), %error, "sign out failed");
            }
        }
    }
}
