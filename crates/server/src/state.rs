use std::time::Instant;

use axum::http::StatusCode;
use axum::Json;
use common::{Session, User};
use library::Library;
use serde::Serialize;

use crate::art::ArtResolver;
use crate::auth::AuthStore;
use crate::scan::Maintenance;
use crate::transcode::Transcoder;
use crate::waveform::WaveformCache;

#[derive(Clone)]
pub struct AppState {
    pub library: Library,
    pub auth: AuthStore,
    pub art: ArtResolver,
    pub transcoder: Transcoder,
    pub waveforms: WaveformCache,
    pub maintenance: Maintenance,
    pub started: Instant,
}

/// The authenticated caller. Password logins carry no session yet.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub user: User,
    pub session: Option<Session>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Success body: `{"error": null, ...payload}`.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub error: Option<ErrorBody>,
    #[serde(flatten)]
    pub data: T,
}

pub type JsonError = (StatusCode, Json<ErrorResponse>);

pub type JsonResult<T> = Result<Json<Envelope<T>>, JsonError>;
