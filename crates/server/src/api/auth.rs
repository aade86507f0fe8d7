use std::collections::HashMap;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Extension,
};
use common::Session;
use serde::Serialize;
use tracing::{info, warn};

use crate::state::{AppState, AuthContext, JsonResult};
use crate::utils::{blocking, envelope, json_error};

#[derive(Debug, Serialize)]
pub struct SessionBody {
    pub session: Session,
}

/// Password logins arrive here already verified; a session is minted for
/// the client named by `c`.
pub async fn login(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Query(params): Query<HashMap<String, String>>,
) -> JsonResult<SessionBody> {
    let client = params.get("c").cloned().unwrap_or_default();
    let auth = state.auth.clone();
    let user = context.user;
    let session = blocking(move || {
        auth.create_session(&user, &client).map_err(|err| {
            warn!("auth: session for {} failed: {}", user.username, err);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "server error")
        })
    })
    .await?;
    Ok(envelope(SessionBody { session }))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> JsonResult<SessionBody> {
    let session = match context.session {
        Some(session) => session,
        None => return Err(json_error(StatusCode::BAD_REQUEST, "no session to end")),
    };
    let auth = state.auth.clone();
    let session = blocking(move || {
        auth.logout(&session).map_err(|err| json_error(err.status(), err.to_string()))?;
        Ok(session)
    })
    .await?;
    info!("auth: session #{} ended for {}", session.id, context.user.username);
    Ok(envelope(SessionBody { session }))
}
