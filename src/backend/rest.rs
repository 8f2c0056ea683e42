use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};

use super::BookmarkTable;
use crate::config::Backend;
use crate::error::{FetchError, MutationError};
use crate::model::{Bookmark, BookmarkId, NewBookmark, Session};

/// PostgREST access to the bookmarks table. Row-level security on the
/// backend scopes every request to the bearer token's user; the owner filter
/// is sent anyway.
pub struct RestTable {
    client: Client,
    table_url: String,
    anon_key: String,
    schema: String,
}

impl RestTable {
    pub fn new(client: Client, cfg: &Backend) -> Self {
        RestTable {
            client,
            table_url: format!("{}/rest/v1/{}", cfg.base_url(), cfg.table),
            anon_key: cfg.anon_key.clone(),
            schema: cfg.schema.clone(),
        }
    }

    fn authorized(&self, builder: RequestBuilder, session: &Session) -> RequestBuilder {
        builder
            .header("apikey", &self.anon_key)
            .header("Accept-Profile", &self.schema)
            .header("Content-Profile", &self.schema)
            .bearer_auth(&session.access_token)
    }
}

async fn status_body(response: Response) -> (u16, String) {
    let status = response.status().as_u16();
    (status, response.text().await.unwrap_or_default())
}

fn inserted_row(bytes: &[u8]) -> Option<Bookmark> {
    if bytes.is_empty() {
        return None;
    }
    match serde_json::from_slice::<Vec<Bookmark>>(bytes) {
        Ok(mut rows) => rows.pop(),
        Err(e) => {
            tracing::warn!(error = %e, "bookmark created but the returned row could not be decoded");
            None
        }
    }
}

#[async_trait]
impl BookmarkTable for RestTable {
    async fn select_by_owner(&self, session: &Session) -> Result<Vec<Bookmark>, FetchError> {
        let owner = format!("eq.{}", session.user_id());
        let request = self.client.get(&self.table_url).query(&[
            ("select", "*"),
            ("user_id", owner.as_str()),
            ("order", "created_at.desc"),
        ]);

        let response = self.authorized(request, session).send().await?;
        if !response.status().is_success() {
            let (status, body) = status_body(response).await;
            return Err(FetchError::Status { status, body });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| FetchError::Decode(e.to_string()))
    }

    async fn insert(&self, session: &Session, record: &NewBookmark) -> Result<Option<Bookmark>, MutationError> {
        let request = self
            .client
            .post(&self.table_url)
            .header("Prefer", "return=representation")
            .json(&[record]);

        let response = self.authorized(request, session).send().await?;
        if !response.status().is_success() {
            let (status, body) = status_body(response).await;
            return Err(MutationError::Status { status, body });
        }

        // The row is written once the status is a success, so a body that
        // cannot be read must not turn into an error the caller would retry.
        match response.bytes().await {
            Ok(bytes) => Ok(inserted_row(&bytes)),
            Err(e) => {
                tracing::warn!(error = %e, "bookmark created but the response body was lost");
                Ok(None)
            }
        }
    }

    async fn delete_by_id(&self, session: &Session, id: &BookmarkId) -> Result<(), MutationError> {
        let filter = format!("eq.{}", id);
        let request = self.client.delete(&self.table_url).query(&[("id", filter.as_str())]);

        let response = self.authorized(request, session).send().await?;
        if !response.status().is_success() {
            let (status, body) = status_body(response).await;
            return Err(MutationError::Status { status, body });
        }
        Ok(())
    }
}
