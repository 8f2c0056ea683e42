use serde::{Deserialize, Serialize};

use crate::model::{Bookmark, BookmarkForm, UserIdentity};

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn new_from_msg(msg: &str) -> Self {
        StatusResponse { status: msg.to_owned() }
    }
}

/// Posted by the login page once the provider redirect hands it a token.
#[derive(Debug, Deserialize)]
pub struct SessionRequest {
    pub access_token: String,
}

#[derive(Debug, Serialize)]
pub struct BookmarkList {
    pub bookmarks: Vec<Bookmark>,
}

/// Answer to a successful create: the form as the client should now show it.
#[derive(Debug, Serialize)]
pub struct CreateResponse {
    pub form: BookmarkForm,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    #[serde(flatten)]
    pub user: UserIdentity,
}
