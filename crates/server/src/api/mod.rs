pub mod auth;
pub mod library;
pub mod media;
pub mod server;
pub mod subsonic;
pub mod users;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::request_id::{MakeRequestUuid, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::auth::require_auth;
use crate::state::AppState;
use crate::status::count_traffic;
use crate::utils::{json_error_response, redirect_to};

pub const API_VERSIONS: &[&str] = &["v0"];

pub fn api_router(state: AppState) -> Router {
    let v0 = Router::new()
        .route("/albums", get(library::list_albums))
        .route("/albums/:id", get(library::get_album))
        .route("/artists", get(library::list_artists))
        .route("/artists/:id", get(library::get_artist))
        .route("/songs", get(library::list_songs))
        .route("/songs/:id", get(library::get_song))
        .route("/folders", get(library::list_folders))
        .route("/folders/:id", get(library::get_folder))
        .route("/search/:query", get(library::search))
        .route("/art/:id", get(media::get_art))
        .route("/stream/:id", get(media::get_stream))
        .route("/transcode/:id", get(media::get_transcode))
        .route("/waveform/:id", get(media::get_waveform))
        .route("/status", get(server::get_status))
        .route("/login", get(auth::login))
        .route("/logout", post(auth::logout))
        .route("/users", get(users::list_users).post(users::create_user))
        .route(
            "/users/:id",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        .route(
            "/subsonic/:method",
            get(subsonic::dispatch).post(subsonic::dispatch),
        );

    Router::new()
        .route("/", get(|| async { redirect_to("/api") }))
        .route("/api", get(server::discovery))
        .nest("/api/v0", v0)
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(middleware::from_fn(check_version))
        .layer(middleware::from_fn(count_traffic))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

/// Rejects `/api/<version>/...` for versions this server does not speak,
/// before any credentials are checked.
async fn check_version(req: Request<Body>, next: Next) -> Response {
    let mut segments = req.uri().path().split('/').filter(|s| !s.is_empty());
    if segments.next() == Some("api") {
        if let Some(version) = segments.next() {
            if !API_VERSIONS.contains(&version) {
                return json_error_response(
                    StatusCode::BAD_REQUEST,
                    format!("unsupported API version: {}", version),
                );
            }
        }
    }
    next.run(req).await
}

async fn not_found() -> Response {
    json_error_response(StatusCode::NOT_FOUND, "not found")
}

#[cfg(test)]
pub(crate) mod tests {
    use axum::http::{header, HeaderValue};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use common::Role;
    use tower::ServiceExt;

    use super::*;
    use crate::testing::scanned_state;

    pub(crate) async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    pub(crate) async fn call_json(app: &Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let (status, body) = call(app, req).await;
        (status, serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null))
    }

    pub(crate) fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    pub(crate) fn basic(uri: &str, username: &str, password: &str) -> Request<Body> {
        let token = STANDARD.encode(format!("{}:{}", username, password));
        let mut req = get(uri);
        req.headers_mut().insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {}", token)).unwrap(),
        );
        req
    }

    /// A router over the seeded library plus an admin's session key.
    pub(crate) async fn app_with_admin() -> (tempfile::TempDir, Router, AppState, String) {
        let (dir, state) = scanned_state();
        let admin = state.auth.create_user("root", "correct", Role::Admin).unwrap();
        let key = state.auth.create_session(&admin, "test").unwrap().key;
        (dir, api_router(state.clone()), state, key)
    }

    #[tokio::test]
    async fn root_redirects_to_discovery() {
        let (_dir, app, _state, _key) = app_with_admin().await;
        let response = app.clone().oneshot(get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/api");

        let (status, body) = call_json(&app, get("/api")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["error"].is_null());
        assert_eq!(body["versions"][0], "v0");
    }

    #[tokio::test]
    async fn unknown_versions_are_rejected_first() {
        let (_dir, app, _state, _key) = app_with_admin().await;
        let (status, body) = call_json(&app, get("/api/v9/songs")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], 400);
        assert_eq!(body["error"]["message"], "unsupported API version: v9");
    }

    #[tokio::test]
    async fn login_then_token_access() {
        let (_dir, app, _state, _key) = app_with_admin().await;
        let (status, body) = call_json(&app, basic("/api/v0/login?c=tests", "root", "correct")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["error"].is_null());
        let key = body["session"]["key"].as_str().unwrap().to_string();
        assert_eq!(key.len(), 32);
        assert_eq!(body["session"]["client"], "tests");

        let (status, body) = call_json(&app, get(&format!("/api/v0/songs?s={}", key))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["songs"].as_array().unwrap().len(), 2);

        let (status, body) = call_json(&app, get("/api/v0/songs?s=bogus")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], 401);
    }

    #[tokio::test]
    async fn login_failures_are_unauthorized() {
        let (_dir, app, _state, _key) = app_with_admin().await;
        let (status, _) = call_json(&app, basic("/api/v0/login", "root", "wrong")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = call_json(&app, get("/api/v0/login")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn logout_ends_the_session() {
        let (_dir, app, _state, key) = app_with_admin().await;
        let req = Request::builder()
            .method("POST")
            .uri(format!("/api/v0/logout?s={}", key))
            .body(Body::empty())
            .unwrap();
        let (status, _) = call_json(&app, req).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call_json(&app, get(&format!("/api/v0/songs?s={}", key))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_routes_are_json_404() {
        let (_dir, app, _state, key) = app_with_admin().await;
        let (status, body) = call_json(&app, get(&format!("/api/v0/nothing?s={}", key))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], 404);
    }
}
