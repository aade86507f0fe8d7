use std::collections::HashMap;

use axum::{
    body::Body,
    extract::{Path as AxumPath, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
};
use common::{http_date, Song};
use tracing::warn;

use crate::art::{parse_size, ArtError};
use crate::state::{AppState, JsonError};
use crate::status::add_tx;
use crate::stream::{stream_song, unsatisfiable_response, StreamError};
use crate::transcode::{Profile, TranscodeError};
use crate::utils::{blocking, json_error, parse_id};
use crate::waveform::{WaveformError, WaveformOptions};

use super::library::load_one;

pub(crate) fn art_error(err: ArtError) -> JsonError {
    if err.status() == StatusCode::INTERNAL_SERVER_ERROR {
        warn!("art: {}", err);
    }
    json_error(err.status(), err.to_string())
}

fn transcode_error(err: TranscodeError) -> JsonError {
    if err.status() == StatusCode::INTERNAL_SERVER_ERROR {
        warn!("transcode: {}", err);
    }
    json_error(err.status(), err.to_string())
}

fn waveform_error(err: WaveformError) -> JsonError {
    if err.status() == StatusCode::INTERNAL_SERVER_ERROR {
        warn!("waveform: {}", err);
    }
    json_error(err.status(), err.to_string())
}

pub(crate) async fn load_song(state: &AppState, id: u64) -> Result<Song, JsonError> {
    let catalog = state.library.catalog().clone();
    blocking(move || load_one::<Song>(&catalog, id, "song")).await
}

/// Raw file response, shared with the XML protocol's `stream`.
pub(crate) async fn serve_song(song: &Song, headers: &HeaderMap) -> Result<Response, JsonError> {
    match stream_song(song, headers).await {
        Ok(response) => Ok(response),
        Err(StreamError::Unsatisfiable(size)) => Ok(unsatisfiable_response(size)),
        Err(err) => {
            warn!("stream: error: {}: {}", song.describe(), err);
            Err(json_error(err.status(), err.to_string()))
        }
    }
}

pub async fn get_art(
    State(state): State<AppState>,
    AxumPath(raw): AxumPath<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, JsonError> {
    let id = parse_id(&raw, "art")?;
    let size = parse_size(params.get("size").map(String::as_str)).map_err(art_error)?;
    let art = state.art.clone();
    let picture = blocking(move || art.resolve(id, size).map_err(art_error)).await?;
    Ok(picture.into_response())
}

pub async fn get_stream(
    State(state): State<AppState>,
    AxumPath(raw): AxumPath<String>,
    headers: HeaderMap,
) -> Result<Response, JsonError> {
    let id = parse_id(&raw, "song")?;
    let song = load_song(&state, id).await?;
    serve_song(&song, &headers).await
}

pub async fn get_transcode(
    State(state): State<AppState>,
    AxumPath(raw): AxumPath<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, JsonError> {
    let id = parse_id(&raw, "transcode")?;
    let profile = Profile::parse(
        params.get("codec").map(String::as_str),
        params.get("quality").map(String::as_str),
    )
    .map_err(transcode_error)?;
    if !state.transcoder.supports(profile.codec) {
        return Err(transcode_error(TranscodeError::EncoderMissing(
            profile.codec.encoder(),
        )));
    }
    if headers.contains_key(header::RANGE) {
        return Err(transcode_error(TranscodeError::RangeUnsupported));
    }

    let song = load_song(&state, id).await?;
    let stream = state.transcoder.spawn(profile, &song).map_err(transcode_error)?;

    // Length is unknown until the encoder exits.
    let mut response = Response::new(Body::from_stream(stream));
    let response_headers = response.headers_mut();
    if let Ok(value) = profile.mime().parse() {
        response_headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = http_date(song.last_modified).parse() {
        response_headers.insert(header::LAST_MODIFIED, value);
    }
    if let Ok(value) = format!("inline; filename=\"{}\"", profile.output_name(&song)).parse() {
        response_headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

pub async fn get_waveform(
    State(state): State<AppState>,
    AxumPath(raw): AxumPath<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, JsonError> {
    let id = parse_id(&raw, "song")?;
    let param = |name: &str| params.get(name).map(String::as_str);
    let options = WaveformOptions::parse(param("size"), param("fg"), param("bg"), param("alt"))
        .map_err(waveform_error)?;

    let catalog = state.library.catalog().clone();
    let waveforms = state.waveforms.clone();
    let (png, last_modified) = blocking(move || {
        let song = load_one::<Song>(&catalog, id, "song")?;
        let png = waveforms.render(&song, options).map_err(waveform_error)?;
        Ok((png, song.last_modified))
    })
    .await?;

    let len = png.len();
    add_tx(len as u64);
    let mut response = Response::new(Body::from(png));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static("image/png"));
    headers.insert(header::CONTENT_LENGTH, len.into());
    if let Ok(value) = http_date(last_modified).parse() {
        headers.insert(header::LAST_MODIFIED, value);
    }
    Ok(response)
}
