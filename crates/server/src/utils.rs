use std::collections::HashMap;

use axum::body::Body;
use axum::extract::Query;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use library::CatalogError;
use tracing::warn;

use crate::state::{Envelope, ErrorBody, ErrorResponse, JsonError};

pub fn json_error(status: StatusCode, message: impl Into<String>) -> JsonError {
    (
        status,
        Json(ErrorResponse {
            error: ErrorBody {
                code: status.as_u16(),
                message: message.into(),
            },
        }),
    )
}

pub fn json_error_response(status: StatusCode, message: impl Into<String>) -> Response {
    json_error(status, message).into_response()
}

pub fn envelope<T>(data: T) -> Json<Envelope<T>> {
    Json(Envelope { error: None, data })
}

/// Boundary translation for catalog failures.
pub fn catalog_error(err: CatalogError) -> JsonError {
    match err {
        CatalogError::NotFound(what) => json_error(StatusCode::NOT_FOUND, format!("{} not found", what)),
        CatalogError::Conflict(what) => json_error(StatusCode::CONFLICT, format!("{} already exists", what)),
        CatalogError::Constraint(what) => json_error(StatusCode::CONFLICT, what),
        other => {
            warn!("api: catalog error: {}", other);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "server error")
        }
    }
}

pub fn parse_id(raw: &str, kind: &str) -> Result<u64, JsonError> {
    match raw.trim().parse::<u64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(json_error(
            StatusCode::BAD_REQUEST,
            format!("invalid integer {} ID", kind),
        )),
    }
}

/// Runs catalog-heavy or CPU-bound work off the async workers.
pub async fn blocking<T, F>(work: F) -> Result<T, JsonError>
where
    F: FnOnce() -> Result<T, JsonError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result,
        Err(err) => {
            warn!("api: worker failed: {}", err);
            Err(json_error(StatusCode::INTERNAL_SERVER_ERROR, "server error"))
        }
    }
}

pub fn query_params(uri: &Uri) -> HashMap<String, String> {
    Query::<HashMap<String, String>>::try_from_uri(uri)
        .map(|Query(params)| params)
        .unwrap_or_default()
}

/// True for `1`, `true`, `yes` and `on`, ignoring case.
pub fn is_truthy(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}

pub fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

pub fn redirect_to(path: &str) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::SEE_OTHER;
    let location = HeaderValue::from_str(path).unwrap_or_else(|_| HeaderValue::from_static("/"));
    response.headers_mut().insert(header::LOCATION, location);
    response
}

pub fn escape_xml(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_must_be_positive_integers() {
        assert_eq!(parse_id("42", "song").unwrap(), 42);
        let (status, Json(body)) = parse_id("abc", "song").unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error.message, "invalid integer song ID");
        assert!(parse_id("0", "song").is_err());
    }

    #[test]
    fn catalog_errors_map_to_statuses() {
        let (status, _) = catalog_error(CatalogError::NotFound("album 3".into()));
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = catalog_error(CatalogError::Conflict("user root".into()));
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, body) =
            catalog_error(CatalogError::Constraint("artist 2 still has albums".into()));
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.0.error.message, "artist 2 still has albums");
    }

    #[test]
    fn envelope_flattens_payload() {
        #[derive(serde::Serialize)]
        struct Payload {
            songs: Vec<u32>,
        }
        let Json(body) = envelope(Payload { songs: vec![1] });
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value, serde_json::json!({ "error": null, "songs": [1] }));

        let (_, Json(err)) = json_error(StatusCode::UNAUTHORIZED, "invalid token");
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "error": { "code": 401, "message": "invalid token" } })
        );
    }

    #[test]
    fn query_and_flags() {
        let uri: Uri = "/api/v0/songs?s=abc&songs=TRUE".parse().unwrap();
        let params = query_params(&uri);
        assert_eq!(params.get("s").map(String::as_str), Some("abc"));
        assert!(is_truthy(params.get("songs").map(String::as_str)));
        assert!(!is_truthy(None));
        assert_eq!(escape_xml("a<b & \"c\""), "a&lt;b &amp; &quot;c&quot;");
    }
}
