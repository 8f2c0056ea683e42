use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{
        IntoResponse, Redirect, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures_util::stream::{self, Stream};
use tracing::info;

use crate::api::{BookmarkList, CreateResponse, MeResponse, SessionRequest, StatusResponse};
use crate::assets::serve_asset;
use crate::error::MutationError;
use crate::model::{BookmarkForm, BookmarkId, Session};
use crate::session::{SessionGuard, SessionState};
use crate::store::SharedStore;
use crate::workspace::{WorkspaceLease, Workspaces};
use crate::{bad_gateway, bad_request, created, success, unauthorized};

pub const SESSION_COOKIE: &str = "smartmark-access-token";

#[derive(Clone)]
pub struct AppState {
    pub guard: SessionGuard,
    pub workspaces: Arc<Workspaces>,
}

pub fn access_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

fn session_cookie(token: &str) -> HeaderValue {
    let cookie = format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, token);
    HeaderValue::from_str(&cookie).unwrap_or_else(|_| HeaderValue::from_static(""))
}

fn cleared_cookie() -> HeaderValue {
    HeaderValue::from_static("smartmark-access-token=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

async fn current_session(state: &AppState, headers: &HeaderMap) -> Option<Session> {
    match state.guard.check(access_token(headers).as_deref()).await {
        SessionState::Authenticated(session) => Some(session),
        SessionState::Unauthenticated => None,
    }
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<(Session, WorkspaceLease), Response> {
    let session = current_session(state, headers).await.ok_or_else(unauthorized)?;
    let workspace = state.workspaces.get_or_open(&session).await;
    Ok((session, workspace))
}

pub async fn healthcheck() -> impl IntoResponse {
    info!("got healthcheck request");
    Json(StatusResponse::new_from_msg("ok"))
}

pub async fn login_view() -> Response {
    serve_asset("login.html")
}

pub async fn start_login(State(state): State<AppState>) -> Redirect {
    Redirect::to(&state.guard.login_url())
}

pub async fn create_session(State(state): State<AppState>, Json(payload): Json<SessionRequest>) -> Response {
    match state.guard.check(Some(&payload.access_token)).await {
        SessionState::Authenticated(session) => {
            info!(user_id = %session.user_id(), "session established");
            let mut response = success(StatusResponse::new_from_msg("signed in"));
            response
                .headers_mut()
                .insert(header::SET_COOKIE, session_cookie(&session.access_token));
            response
        }
        SessionState::Unauthenticated => unauthorized(),
    }
}

pub async fn main_view(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match current_session(&state, &headers).await {
        Some(session) => {
            // loaded here, kept alive by the page's event stream
            let _view = state.workspaces.get_or_open(&session).await;
            serve_asset("index.html")
        }
        None => Redirect::to("/login").into_response(),
    }
}

pub async fn me(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match current_session(&state, &headers).await {
        Some(session) => success(MeResponse { user: session.user }),
        None => unauthorized(),
    }
}

pub async fn list_bookmarks(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (_, workspace) = match authenticate(&state, &headers).await {
        Ok(found) => found,
        Err(response) => return response,
    };

    let bookmarks = workspace.store().snapshot().await;
    success(BookmarkList { bookmarks })
}

pub async fn create_bookmark(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut form): Json<BookmarkForm>,
) -> Response {
    let (session, workspace) = match authenticate(&state, &headers).await {
        Ok(found) => found,
        Err(response) => return response,
    };

    match workspace.gateway().create(&session, &mut form).await {
        Ok(()) => created(CreateResponse { form }),
        Err(MutationError::EmptyField(field)) => bad_request(&format!("{} must not be empty", field)),
        Err(_) => bad_gateway("Failed to create bookmark"),
    }
}

pub async fn delete_bookmark(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    let (session, workspace) = match authenticate(&state, &headers).await {
        Ok(found) => found,
        Err(response) => return response,
    };

    match workspace.gateway().delete(&session, &BookmarkId::new(id)).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(_) => bad_gateway("Failed to delete bookmark"),
    }
}

pub async fn bookmark_events(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (session, workspace) = match authenticate(&state, &headers).await {
        Ok(found) => found,
        Err(response) => return response,
    };

    info!(user_id = %session.user_id(), "live list stream opened");
    let store = workspace.store().clone();
    Sse::new(list_events(store, workspace))
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// The full list once, then again after every store revision. `view` is held
/// for as long as the client stays connected.
pub fn list_events<V>(store: SharedStore, view: V) -> impl Stream<Item = Result<Event, Infallible>>
where
    V: Send + 'static,
{
    let rx = store.subscribe();
    stream::unfold((store, rx, true, view), |(store, mut rx, first, view)| async move {
        if !first && rx.changed().await.is_err() {
            return None;
        }
        rx.borrow_and_update();

        let bookmarks = store.snapshot().await;
        let event = Event::default()
            .event("bookmarks")
            .json_data(BookmarkList { bookmarks })
            .unwrap_or_else(|e| {
                tracing::error!("Failed to encode bookmark list: {}", e);
                Event::default().event("error").data("encode failed")
            });
        Some((Ok(event), (store, rx, false, view)))
    })
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(session) = current_session(&state, &headers).await {
        state.guard.logout(&session).await;
        state.workspaces.close(session.user_id()).await;
    }

    let mut response = Redirect::to("/login").into_response();
    response.headers_mut().insert(header::SET_COOKIE, cleared_cookie());
    response
}
