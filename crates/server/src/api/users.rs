use std::collections::HashMap;

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    Extension, Form,
};
use common::{Role, User};
use serde::Serialize;
use tracing::info;

use crate::auth::{hash_password, AuthError};
use crate::state::{AppState, AuthContext, JsonError, JsonResult};
use crate::utils::{blocking, catalog_error, envelope, json_error, parse_id};

use super::library::load_one;

/// What the API shows of a user; the password hash stays private.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: u64,
    pub username: String,
    pub role_id: u8,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            role_id: user.role_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UsersBody {
    pub users: Vec<UserView>,
}

fn permission_denied() -> JsonError {
    json_error(StatusCode::FORBIDDEN, "permission denied")
}

fn auth_error(err: AuthError) -> JsonError {
    json_error(err.status(), err.to_string())
}

fn username_param(raw: &str) -> Result<String, JsonError> {
    let username = raw.trim();
    if username.is_empty() {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "missing required parameter: username",
        ));
    }
    Ok(username.to_string())
}

/// Form body values win over query parameters.
fn merged(
    query: HashMap<String, String>,
    form: Option<Form<HashMap<String, String>>>,
) -> HashMap<String, String> {
    let mut params = query;
    if let Some(Form(body)) = form {
        params.extend(body);
    }
    params.retain(|_, value| !value.is_empty());
    params
}

fn parse_role(raw: &str) -> Result<Role, JsonError> {
    raw.trim()
        .parse::<u8>()
        .ok()
        .and_then(Role::from_id)
        .ok_or_else(|| json_error(StatusCode::BAD_REQUEST, "invalid integer role ID"))
}

pub async fn list_users(State(state): State<AppState>) -> JsonResult<UsersBody> {
    let catalog = state.library.catalog().clone();
    let users = blocking(move || catalog.all::<User>().map_err(catalog_error)).await?;
    Ok(envelope(UsersBody {
        users: users.iter().map(UserView::from).collect(),
    }))
}

pub async fn get_user(
    State(state): State<AppState>,
    AxumPath(raw): AxumPath<String>,
) -> JsonResult<UsersBody> {
    let id = parse_id(&raw, "user")?;
    let catalog = state.library.catalog().clone();
    let user = blocking(move || load_one::<User>(&catalog, id, "user")).await?;
    Ok(envelope(UsersBody {
        users: vec![UserView::from(&user)],
    }))
}

pub async fn create_user(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Query(query): Query<HashMap<String, String>>,
    form: Option<Form<HashMap<String, String>>>,
) -> JsonResult<UsersBody> {
    if context.user.role() != Role::Admin {
        return Err(permission_denied());
    }
    let params = merged(query, form);
    let field = |name: &'static str| {
        params.get(name).cloned().ok_or_else(|| {
            json_error(
                StatusCode::BAD_REQUEST,
                format!("missing required parameter: {}", name),
            )
        })
    };
    let username = username_param(&field("username")?)?;
    let password = field("password")?;
    let role = parse_role(&field("role")?)?;

    let auth = state.auth.clone();
    let user = blocking(move || auth.create_user(&username, &password, role).map_err(auth_error)).await?;
    info!("auth: user {} created by {}", user.username, context.user.username);
    Ok(envelope(UsersBody {
        users: vec![UserView::from(&user)],
    }))
}

pub async fn update_user(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    AxumPath(raw): AxumPath<String>,
    Query(query): Query<HashMap<String, String>>,
    form: Option<Form<HashMap<String, String>>>,
) -> JsonResult<UsersBody> {
    let id = parse_id(&raw, "user")?;
    let params = merged(query, form);
    let caller = context.user;
    let is_admin = caller.role() == Role::Admin;
    if !is_admin && caller.id != id {
        return Err(permission_denied());
    }
    let role = params.get("role").map(|raw| parse_role(raw)).transpose()?;
    if let Some(role) = role {
        if !is_admin && role != caller.role() {
            return Err(permission_denied());
        }
    }

    let username = match params.get("username") {
        Some(raw) => Some(username_param(raw)?),
        None => None,
    };

    let catalog = state.library.catalog().clone();
    let user = blocking(move || {
        let mut user = load_one::<User>(&catalog, id, "user")?;
        if let Some(username) = username {
            user.username = username;
        }
        if let Some(password) = params.get("password") {
            user.password_hash = hash_password(password).map_err(auth_error)?;
        }
        if let Some(role) = role {
            user.role_id = role.id();
        }
        catalog.update(&user).map_err(catalog_error)?;
        Ok(user)
    })
    .await?;
    Ok(envelope(UsersBody {
        users: vec![UserView::from(&user)],
    }))
}

/// Removes a user and, through the catalog's cascade, its sessions.
pub async fn delete_user(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    AxumPath(raw): AxumPath<String>,
) -> JsonResult<UsersBody> {
    if context.user.role() != Role::Admin {
        return Err(permission_denied());
    }
    let id = parse_id(&raw, "user")?;
    if id == context.user.id {
        return Err(json_error(StatusCode::BAD_REQUEST, "cannot delete current user"));
    }
    let catalog = state.library.catalog().clone();
    let user = blocking(move || {
        let user = load_one::<User>(&catalog, id, "user")?;
        catalog.delete(&user).map_err(catalog_error)
    })
    .await?;
    info!("auth: user {} deleted by {}", user.username, context.user.username);
    Ok(envelope(UsersBody {
        users: vec![UserView::from(&user)],
    }))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Request};

    use super::*;
    use crate::api::tests::{app_with_admin, call_json, get};

    fn form(method: &str, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn admin_creates_users_once() {
        let (_dir, app, _state, key) = app_with_admin().await;
        let uri = format!("/api/v0/users?s={}", key);
        let (status, body) =
            call_json(&app, form("POST", &uri, "username=alice&password=pw&role=1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["users"][0]["username"], "alice");
        assert_eq!(body["users"][0]["roleId"], 1);
        assert!(body["users"][0].get("passwordHash").is_none());

        let (status, _) =
            call_json(&app, form("POST", &uri, "username=alice&password=pw&role=1")).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = call_json(&app, form("POST", &uri, "username=bob&password=pw")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["message"], "missing required parameter: role");

        let (status, _) =
            call_json(&app, form("POST", &uri, "username=bob&password=pw&role=7")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = call_json(&app, get(&uri)).await;
        assert_eq!(body["users"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn regular_users_only_touch_themselves() {
        let (_dir, app, state, _key) = app_with_admin().await;
        let user = state.auth.create_user("carol", "pw", Role::User).unwrap();
        let key = state.auth.create_session(&user, "test").unwrap().key;

        let (status, _) = call_json(
            &app,
            form("POST", &format!("/api/v0/users?s={}", key), "username=x&password=y&role=2"),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let own = format!("/api/v0/users/{}?s={}", user.id, key);
        let (status, _) = call_json(&app, form("PUT", &own, "role=2")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = call_json(&app, form("PUT", &own, "username=caroline")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["users"][0]["username"], "caroline");

        let (status, _) = call_json(&app, form("PUT", &format!("/api/v0/users/1?s={}", key), "username=z")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn renaming_to_a_blank_username_fails() {
        let (_dir, app, state, key) = app_with_admin().await;
        let erin = state.auth.create_user("erin", "pw", Role::User).unwrap();
        let uri = format!("/api/v0/users/{}?s={}", erin.id, key);

        let (status, body) = call_json(&app, form("PUT", &uri, "username=%20%20")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["message"], "missing required parameter: username");

        let create = format!("/api/v0/users?s={}", key);
        let (status, _) = call_json(&app, form("POST", &create, "username=+&password=pw&role=2")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call_json(&app, form("PUT", &uri, "username=%20erin2%20")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["users"][0]["username"], "erin2");
    }

    #[tokio::test]
    async fn delete_refuses_self_and_cascades_sessions() {
        let (_dir, app, state, key) = app_with_admin().await;
        let admin = state.auth.authenticate_token(&key).unwrap().0;
        let (status, body) = call_json(
            &app,
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/v0/users/{}?s={}", admin.id, key))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["message"], "cannot delete current user");

        let dave = state.auth.create_user("dave", "pw", Role::User).unwrap();
        let dave_key = state.auth.create_session(&dave, "test").unwrap().key;
        let (status, _) = call_json(
            &app,
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/v0/users/{}?s={}", dave.id, key))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(state.auth.authenticate_token(&dave_key).is_err());
    }
}
