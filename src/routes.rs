use axum::http::Method;
use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::cors::{Any, CorsLayer};

use crate::assets::serve_embedded;
use crate::handler::{self, AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handler::main_view))
        .route("/healthz", get(handler::healthcheck))
        .route("/login", get(handler::login_view))
        .route("/auth/login", get(handler::start_login))
        .route("/auth/session", post(handler::create_session))
        .route("/logout", post(handler::logout))
        .route("/api/me", get(handler::me))
        .route("/api/bookmarks", get(handler::list_bookmarks))
        .route("/api/bookmarks", post(handler::create_bookmark))
        .route("/api/bookmarks/events", get(handler::bookmark_events))
        .route("/api/bookmarks/:id", delete(handler::delete_bookmark))
}

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);

    routes().fallback(serve_embedded).layer(cors).with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backends;
    use crate::handler::SESSION_COOKIE;
    use crate::session::SessionGuard;
    use crate::subscriber::ReconnectPolicy;
    use crate::testing::{FakeAuth, FakeFeed, FakeTable, bookmark, session};
    use crate::workspace::{WorkspaceSettings, Workspaces};
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use serde_json::Value;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use tower::ServiceExt;

    struct Harness {
        table: Arc<FakeTable>,
        auth: Arc<FakeAuth>,
        state: AppState,
    }

    fn harness() -> Harness {
        let table = Arc::new(FakeTable::default());
        let auth = Arc::new(FakeAuth::with_session(&session("u1")));
        let backends = Backends {
            auth: auth.clone(),
            table: table.clone(),
            feed: Arc::new(FakeFeed::default()),
        };
        let state = AppState {
            guard: SessionGuard::new(backends.auth.clone(), "google", "http://localhost:3000"),
            workspaces: Arc::new(Workspaces::new(
                backends,
                WorkspaceSettings {
                    optimistic_insert: false,
                    reconnect: ReconnectPolicy::disabled(),
                    idle_grace: std::time::Duration::from_secs(60),
                },
            )),
        };
        Harness { table, auth, state }
    }

    fn cookie() -> String {
        format!("{}={}", SESSION_COOKIE, session("u1").access_token)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_main_view_redirects_without_session() {
        let h = harness();
        let response = app(h.state)
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/login");
    }

    #[tokio::test]
    async fn test_api_requires_session() {
        let h = harness();
        let response = app(h.state)
            .oneshot(
                Request::get("/api/bookmarks")
                    .header(header::COOKIE, "smartmark-access-token=bogus")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_session_endpoint_sets_cookie() {
        let h = harness();
        let response = app(h.state)
            .oneshot(
                Request::post("/auth/session")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"access_token":"token-u1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(cookie.starts_with("smartmark-access-token=token-u1;"));
    }

    #[tokio::test]
    async fn test_list_returns_owned_bookmarks_newest_first() {
        let h = harness();
        h.table.seed(vec![
            bookmark("1", "u1", 1),
            bookmark("2", "u1", 2),
            bookmark("3", "u2", 3),
        ]);
        let response = app(h.state)
            .oneshot(
                Request::get("/api/bookmarks")
                    .header(header::COOKIE, cookie())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let ids: Vec<&str> = json["data"]["bookmarks"]
            .as_array()
            .unwrap()
            .iter()
            .map(|b| b["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["2", "1"]);
    }

    #[tokio::test]
    async fn test_create_rejects_blank_title() {
        let h = harness();
        let response = app(h.state)
            .oneshot(
                Request::post("/api/bookmarks")
                    .header(header::COOKIE, cookie())
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"title":"  ","url":"https://a.io"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(h.table.inserts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_create_returns_cleared_form() {
        let h = harness();
        let response = app(h.state)
            .oneshot(
                Request::post("/api/bookmarks")
                    .header(header::COOKIE, cookie())
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"title":"Rust","url":"https://rust-lang.org"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert_eq!(json["data"]["form"]["title"], "");
        assert_eq!(h.table.rows().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_failure_is_bad_gateway() {
        let h = harness();
        h.table.seed(vec![bookmark("1", "u1", 1)]);
        h.table.fail_mutations(true);
        let response = app(h.state.clone())
            .oneshot(
                Request::delete("/api/bookmarks/1")
                    .header(header::COOKIE, cookie())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let ws = h.state.workspaces.get_or_open(&session("u1")).await;
        assert_eq!(ws.store().snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_from_list() {
        let h = harness();
        h.table.seed(vec![bookmark("1", "u1", 1)]);
        let response = app(h.state.clone())
            .oneshot(
                Request::delete("/api/bookmarks/1")
                    .header(header::COOKIE, cookie())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let ws = h.state.workspaces.get_or_open(&session("u1")).await;
        assert!(ws.store().snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_logout_closes_workspace_and_clears_cookie() {
        let h = harness();
        h.state.workspaces.get_or_open(&session("u1")).await;

        let response = app(h.state.clone())
            .oneshot(
                Request::post("/logout")
                    .header(header::COOKIE, cookie())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(
            response.headers()[header::SET_COOKIE]
                .to_str()
                .unwrap()
                .contains("Max-Age=0")
        );
        assert_eq!(h.state.workspaces.len().await, 0);
        assert_eq!(h.auth.sign_outs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_auth_login_redirects_to_provider() {
        let h = harness();
        let response = app(h.state)
            .oneshot(Request::get("/auth/login").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(
            response.headers()[header::LOCATION]
                .to_str()
                .unwrap()
                .starts_with("https://auth.test/authorize?provider=google")
        );
    }
}
