use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use super::AuthProvider;
use crate::config::Backend;
use crate::error::SessionError;
use crate::model::UserIdentity;

/// GoTrue-style auth endpoints under `<backend>/auth/v1`.
pub struct HttpAuth {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl HttpAuth {
    pub fn new(client: Client, cfg: &Backend) -> Self {
        HttpAuth {
            client,
            base_url: format!("{}/auth/v1", cfg.base_url()),
            anon_key: cfg.anon_key.clone(),
        }
    }
}

#[async_trait]
impl AuthProvider for HttpAuth {
    async fn get_user(&self, access_token: &str) -> Result<UserIdentity, SessionError> {
        if access_token.trim().is_empty() {
            return Err(SessionError::Missing);
        }

        let response = self
            .client
            .get(format!("{}/user", self.base_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => Ok(response.json::<UserIdentity>().await?),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(SessionError::Rejected(response.text().await.unwrap_or_default()))
            }
            s => Err(SessionError::Rejected(format!("status {}", s.as_u16()))),
        }
    }

    fn authorize_url(&self, provider: &str, redirect_to: &str) -> String {
        format!(
            "{}/authorize?provider={}&redirect_to={}",
            self.base_url,
            urlencoding::encode(provider),
            urlencoding::encode(redirect_to)
        )
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), SessionError> {
        let response = self
            .client
            .post(format!("{}/logout", self.base_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(SessionError::Rejected(format!("logout status {}", response.status().as_u16())))
        }
    }
}
