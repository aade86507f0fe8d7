use std::collections::HashMap;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use common::{now_unix, Role, Session, User};
use library::{Catalog, CatalogError};
use rand::distr::Alphanumeric;
use rand::Rng;
use rand_core::{OsRng, RngCore};
use tracing::{info, warn};

use crate::api::subsonic;
use crate::state::{AppState, AuthContext};
use crate::utils::{json_error_response, query_params};

pub const TOKEN_TTL_SECS: i64 = 24 * 60 * 60;
pub const SUBSONIC_TTL_SECS: i64 = 7 * 24 * 60 * 60;

const KEY_SALT_BYTES: usize = 16;

/// How a request proves who it is, chosen from its path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthScheme {
    None,
    Password,
    Token,
    Subsonic,
}

impl AuthScheme {
    pub fn for_path(path: &str) -> Self {
        let mut segments = path.split('/').filter(|segment| !segment.is_empty());
        if segments.next() != Some("api") {
            return AuthScheme::None;
        }
        match (segments.next(), segments.next()) {
            (Some(version), Some(endpoint)) if is_version(version) => match endpoint {
                "login" => AuthScheme::Password,
                "subsonic" => AuthScheme::Subsonic,
                _ => AuthScheme::Token,
            },
            _ => AuthScheme::None,
        }
    }
}

fn is_version(segment: &str) -> bool {
    match segment.strip_prefix('v') {
        Some(rest) => !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

#[derive(Debug)]
pub enum AuthError {
    NoUsername,
    NoPassword,
    InvalidUsername,
    InvalidPassword,
    NoToken,
    InvalidToken,
    SessionExpired,
    MalformedHeader,
    MissingParameter(&'static str),
    Internal(String),
    Storage(CatalogError),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::MalformedHeader | AuthError::MissingParameter(_) => StatusCode::BAD_REQUEST,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AuthError::Storage(CatalogError::Conflict(_)) => StatusCode::CONFLICT,
            AuthError::Storage(CatalogError::NotFound(_)) => StatusCode::NOT_FOUND,
            AuthError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    /// Error code in the XML protocol: 10 missing parameter, 40 bad
    /// credentials, 0 anything else.
    pub fn subsonic_code(&self) -> u16 {
        match self {
            AuthError::MissingParameter(_) => subsonic::ERR_MISSING_PARAMETER,
            AuthError::Internal(_) | AuthError::Storage(_) => subsonic::ERR_GENERIC,
            _ => subsonic::ERR_BAD_CREDENTIALS,
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::NoUsername => write!(f, "no username provided"),
            AuthError::NoPassword => write!(f, "no password provided"),
            AuthError::InvalidUsername => write!(f, "invalid username"),
            AuthError::InvalidPassword => write!(f, "invalid password"),
            AuthError::NoToken => write!(f, "no token provided"),
            AuthError::InvalidToken => write!(f, "invalid token"),
            AuthError::SessionExpired => write!(f, "session expired"),
            AuthError::MalformedHeader => write!(f, "invalid HTTP Basic header"),
            AuthError::MissingParameter(name) => write!(f, "missing required parameter: {}", name),
            AuthError::Internal(err) => write!(f, "server error: {}", err),
            AuthError::Storage(err) => write!(f, "storage error: {}", err),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<CatalogError> for AuthError {
    fn from(err: CatalogError) -> Self {
        AuthError::Storage(err)
    }
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AuthError::Internal(err.to_string()))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// 32 hex characters from the user's hash and a salt that is thrown away.
fn session_key(password_hash: &str) -> String {
    let mut salt = [0u8; KEY_SALT_BYTES];
    OsRng.fill_bytes(&mut salt);
    let mut hasher = blake3::Hasher::new();
    hasher.update(password_hash.as_bytes());
    hasher.update(&salt);
    let digest = hasher.finalize();
    digest.to_hex().as_str()[..32].to_string()
}

fn random_password() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

/// Username and password from an `Authorization: Basic` header. `None` when
/// the header is absent.
pub fn basic_credentials(headers: &HeaderMap) -> Result<Option<(String, String)>, AuthError> {
    let value = match headers.get(header::AUTHORIZATION) {
        Some(value) => value.to_str().map_err(|_| AuthError::MalformedHeader)?,
        None => return Ok(None),
    };
    let encoded = match value.trim().split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("basic") => rest.trim(),
        _ => return Err(AuthError::MalformedHeader),
    };
    let decoded = STANDARD
        .decode(encoded)
        .or_else(|_| URL_SAFE.decode(encoded))
        .map_err(|_| AuthError::MalformedHeader)?;
    let pair = String::from_utf8(decoded).map_err(|_| AuthError::MalformedHeader)?;
    let (username, password) = match pair.split_once(':') {
        Some((username, password)) => (username.to_string(), password.to_string()),
        None => (pair, String::new()),
    };
    Ok(Some((username, password)))
}

/// Users and sessions over the catalog.
#[derive(Clone)]
pub struct AuthStore {
    catalog: Catalog,
}

impl AuthStore {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }

    pub fn create_user(&self, username: &str, password: &str, role: Role) -> Result<User, AuthError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AuthError::NoUsername);
        }
        if password.is_empty() {
            return Err(AuthError::NoPassword);
        }
        let user = User {
            id: 0,
            username: username.to_string(),
            password_hash: hash_password(password)?,
            role_id: role.id(),
            external_token: None,
        };
        Ok(self.catalog.save(&user)?)
    }

    /// Checks a username and password pair.
    pub fn login(&self, username: &str, password: &str) -> Result<User, AuthError> {
        if username.is_empty() {
            return Err(AuthError::NoUsername);
        }
        if password.is_empty() {
            return Err(AuthError::NoPassword);
        }
        let user = self
            .catalog
            .find::<User>(username)?
            .ok_or(AuthError::InvalidUsername)?;
        if !verify_password(password, &user.password_hash) {
            return Err(AuthError::InvalidPassword);
        }
        Ok(user)
    }

    pub fn create_session(&self, user: &User, client: &str) -> Result<Session, AuthError> {
        let mut attempts = 0;
        loop {
            let session = Session {
                id: 0,
                user_id: user.id,
                key: session_key(&user.password_hash),
                expire: now_unix() + TOKEN_TTL_SECS,
                client: client.to_string(),
            };
            match self.catalog.save(&session) {
                Ok(session) => {
                    info!("auth: session #{} created for {}", session.id, user.username);
                    return Ok(session);
                }
                Err(CatalogError::Conflict(_)) if attempts < 3 => attempts += 1,
                Err(err) => return Err(err.into()),
            }
        }
    }

    pub fn logout(&self, session: &Session) -> Result<(), AuthError> {
        self.catalog.delete(session)?;
        Ok(())
    }

    /// Resolves a session key and pushes its expiry out by a day.
    pub fn authenticate_token(&self, key: &str) -> Result<(User, Session), AuthError> {
        if key.is_empty() {
            return Err(AuthError::NoToken);
        }
        let session = self.live_session(key, AuthError::InvalidToken)?;
        let user = match self.catalog.load::<User>(session.user_id) {
            Ok(user) => user,
            Err(CatalogError::NotFound(_)) => return Err(AuthError::InvalidToken),
            Err(err) => return Err(err.into()),
        };
        let session = self.extend(session, TOKEN_TTL_SECS)?;
        Ok((user, session))
    }

    /// The XML protocol sends the username and a session key as its password,
    /// optionally hex encoded behind an `enc:` prefix.
    pub fn authenticate_subsonic(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(User, Session), AuthError> {
        let key = match password.strip_prefix("enc:") {
            Some(encoded) => {
                let bytes = hex::decode(encoded).map_err(|_| AuthError::InvalidPassword)?;
                String::from_utf8(bytes).map_err(|_| AuthError::InvalidPassword)?
            }
            None => password.to_string(),
        };
        let user = self
            .catalog
            .find::<User>(username)?
            .ok_or(AuthError::InvalidUsername)?;
        let session = self.live_session(&key, AuthError::InvalidPassword)?;
        if session.user_id != user.id {
            return Err(AuthError::InvalidPassword);
        }
        let session = self.extend(session, SUBSONIC_TTL_SECS)?;
        Ok((user, session))
    }

    /// Creates `root` with a random password when no user exists yet.
    pub fn ensure_root_user(&self) -> Result<Option<String>, AuthError> {
        if self.catalog.count::<User>()? > 0 {
            return Ok(None);
        }
        let password = random_password();
        self.create_user("root", &password, Role::Admin)?;
        Ok(Some(password))
    }

    fn live_session(&self, key: &str, missing: AuthError) -> Result<Session, AuthError> {
        let session = self.catalog.find::<Session>(key)?.ok_or(missing)?;
        if session.is_expired(now_unix()) {
            if let Err(err) = self.catalog.delete(&session) {
                warn!("auth: failed to drop expired session #{}: {}", session.id, err);
            }
            return Err(AuthError::SessionExpired);
        }
        Ok(session)
    }

    fn extend(&self, mut session: Session, ttl: i64) -> Result<Session, AuthError> {
        session.expire = now_unix() + ttl;
        self.catalog.update(&session)?;
        Ok(session)
    }
}

/// Gate in front of every route. Picks the scheme from the path and stores
/// the principal as a request extension.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let scheme = AuthScheme::for_path(req.uri().path());
    let params = query_params(req.uri());
    let principal = match scheme {
        AuthScheme::None => return next.run(req).await,
        AuthScheme::Password => password_principal(&state, req.headers(), &params).await,
        AuthScheme::Token => token_principal(&state, req.headers(), &params).await,
        AuthScheme::Subsonic => subsonic_principal(&state, &params).await,
    };
    match principal {
        Ok(context) => {
            req.extensions_mut().insert(context);
            next.run(req).await
        }
        Err(err) => reject(scheme, err),
    }
}

fn reject(scheme: AuthScheme, err: AuthError) -> Response {
    if matches!(err, AuthError::Internal(_) | AuthError::Storage(_)) {
        warn!("auth: {}", err);
    }
    match scheme {
        AuthScheme::Subsonic => subsonic::failure(err.subsonic_code(), &err.to_string()),
        _ => json_error_response(err.status(), err.to_string()),
    }
}

async fn password_principal(
    state: &AppState,
    headers: &HeaderMap,
    params: &HashMap<String, String>,
) -> Result<AuthContext, AuthError> {
    let (username, password) = match basic_credentials(headers)? {
        Some(pair) => pair,
        None => (
            params.get("username").cloned().unwrap_or_default(),
            params.get("password").cloned().unwrap_or_default(),
        ),
    };
    let auth = state.auth.clone();
    let user = off_worker(move || auth.login(&username, &password)).await?;
    Ok(AuthContext {
        user,
        session: None,
    })
}

/// Catalog reads and the session refresh commit run off the async workers.
async fn off_worker<T, F>(work: F) -> Result<T, AuthError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, AuthError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| AuthError::Internal(err.to_string()))?
}

async fn token_principal(
    state: &AppState,
    headers: &HeaderMap,
    params: &HashMap<String, String>,
) -> Result<AuthContext, AuthError> {
    let key = match basic_credentials(headers)? {
        Some((username, _)) => username,
        None => params.get("s").cloned().unwrap_or_default(),
    };
    let auth = state.auth.clone();
    let (user, session) = off_worker(move || auth.authenticate_token(&key)).await?;
    Ok(AuthContext {
        user,
        session: Some(session),
    })
}

async fn subsonic_principal(
    state: &AppState,
    params: &HashMap<String, String>,
) -> Result<AuthContext, AuthError> {
    let username = params.get("u").cloned().unwrap_or_default();
    let password = params.get("p").cloned().unwrap_or_default();
    if username.is_empty() {
        return Err(AuthError::NoUsername);
    }
    if password.is_empty() {
        return Err(AuthError::NoPassword);
    }
    if params.get("v").map_or(true, |v| v.is_empty()) {
        return Err(AuthError::MissingParameter("v"));
    }
    let auth = state.auth.clone();
    let (user, session) =
        off_worker(move || auth.authenticate_subsonic(&username, &password)).await?;
    Ok(AuthContext {
        user,
        session: Some(session),
    })
}
