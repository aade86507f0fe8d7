use std::io::SeekFrom;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use common::{http_date, Song};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::status::add_tx;

pub const CHUNK_SIZE: usize = 8 * 1024;
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// What a `Range` header asks of a body of known size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    Full,
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

/// Reads a single `bytes=` range. Malformed or multi-range headers fall back
/// to the whole body.
pub fn parse_range(value: Option<&str>, size: u64) -> RangeRequest {
    let spec = match value.and_then(|v| v.trim().strip_prefix("bytes=")) {
        Some(spec) if !spec.contains(',') => spec.trim(),
        _ => return RangeRequest::Full,
    };
    let (first, last) = match spec.split_once('-') {
        Some(pair) => pair,
        None => return RangeRequest::Full,
    };

    if first.is_empty() {
        // Suffix form: the last N bytes.
        return match last.parse::<u64>() {
            Ok(0) => RangeRequest::Unsatisfiable,
            Ok(_) if size == 0 => RangeRequest::Unsatisfiable,
            Ok(suffix) => RangeRequest::Partial {
                start: size.saturating_sub(suffix),
                end: size - 1,
            },
            Err(_) => RangeRequest::Full,
        };
    }

    let start = match first.parse::<u64>() {
        Ok(start) => start,
        Err(_) => return RangeRequest::Full,
    };
    if start >= size {
        return RangeRequest::Unsatisfiable;
    }
    let end = if last.is_empty() {
        size - 1
    } else {
        match last.parse::<u64>() {
            Ok(end) if end >= start => end.min(size - 1),
            _ => return RangeRequest::Full,
        }
    };
    RangeRequest::Partial { start, end }
}

/// Byte accounting for one outgoing stream. Logs a progress line on every
/// tick that saw traffic.
pub struct Progress {
    subsystem: &'static str,
    id: u64,
    total: Option<u64>,
    sent: u64,
    at_last_tick: u64,
    last_tick: Instant,
}

impl Progress {
    pub fn new(subsystem: &'static str, id: u64, total: Option<u64>) -> Self {
        Self {
            subsystem,
            id,
            total,
            sent: 0,
            at_last_tick: 0,
            last_tick: Instant::now(),
        }
    }

    pub fn add(&mut self, bytes: usize) {
        self.sent += bytes as u64;
        add_tx(bytes as u64);
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn tick(&mut self) {
        let now = Instant::now();
        let delta = self.sent - self.at_last_tick;
        if delta > 0 {
            let secs = now.duration_since(self.last_tick).as_secs_f64();
            info!(
                "{}: {}",
                self.subsystem,
                progress_line(self.id, self.sent, self.total, delta, secs)
            );
        }
        self.at_last_tick = self.sent;
        self.last_tick = now;
    }
}

pub fn progress_line(id: u64, sent: u64, total: Option<u64>, delta: u64, secs: f64) -> String {
    let rate = if secs > 0.0 {
        (delta as f64 * 8.0) / secs / 1_000_000.0
    } else {
        0.0
    };
    match total {
        Some(total) if total > 0 => format!(
            "[#{:05}] [{:5.1}%] {:.2} / {:.2} MB [{:.2} Mbps]",
            id,
            sent as f64 / total as f64 * 100.0,
            megabytes(sent),
            megabytes(total),
            rate
        ),
        _ => format!("[#{:05}] sent: {:.2} MB [{:.2} Mbps]", id, megabytes(sent), rate),
    }
}

fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

#[derive(Debug)]
pub enum StreamError {
    Missing(String),
    Unsatisfiable(u64),
    Io(std::io::Error),
}

impl StreamError {
    pub fn status(&self) -> StatusCode {
        match self {
            StreamError::Missing(_) => StatusCode::NOT_FOUND,
            StreamError::Unsatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            StreamError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamError::Missing(path) => write!(f, "file not found: {}", path),
            StreamError::Unsatisfiable(size) => write!(f, "range not satisfiable (size {})", size),
            StreamError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for StreamError {}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::Io(err)
    }
}

/// Serves a song's file as is, honoring a single byte range.
pub async fn stream_song(song: &Song, headers: &HeaderMap) -> Result<Response, StreamError> {
    let mut file = match tokio::fs::File::open(&song.file_name).await {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(StreamError::Missing(song.file_name.clone()))
        }
        Err(err) => return Err(err.into()),
    };
    let size = file.metadata().await?.len();
    let range = parse_range(
        headers.get(header::RANGE).and_then(|value| value.to_str().ok()),
        size,
    );
    let (status, start, length) = match range {
        RangeRequest::Full => (StatusCode::OK, 0, size),
        RangeRequest::Partial { start, end } => (StatusCode::PARTIAL_CONTENT, start, end - start + 1),
        RangeRequest::Unsatisfiable => return Err(StreamError::Unsatisfiable(size)),
    };
    if start > 0 {
        file.seek(SeekFrom::Start(start)).await?;
    }

    let mime = song
        .file_type()
        .map(|kind| kind.mime().to_string())
        .unwrap_or_else(|| {
            mime_guess::from_path(&song.file_name)
                .first_or_octet_stream()
                .to_string()
        });

    info!("stream: start: {}", song.describe());
    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(16);
    let descriptor = song.describe();
    let id = song.id;
    tokio::spawn(async move {
        let mut progress = Progress::new("stream", id, Some(length));
        let mut reader = file.take(length);
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + PROGRESS_INTERVAL,
            PROGRESS_INTERVAL,
        );
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            tokio::select! {
                _ = ticker.tick() => progress.tick(),
                _ = tx.closed() => {
                    info!("stream: client reset: {} after {} bytes", descriptor, progress.sent());
                    return;
                }
                read = reader.read(&mut buf) => match read {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
                            info!("stream: client reset: {} after {} bytes", descriptor, progress.sent());
                            return;
                        }
                        progress.add(n);
                    }
                    Err(err) => {
                        warn!("stream: failed: {}: {}", descriptor, err);
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                },
            }
        }
        info!("stream: completed: {} [{} bytes]", descriptor, progress.sent());
    });

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, mime)
        .header(header::CONTENT_LENGTH, length)
        .header(header::LAST_MODIFIED, http_date(song.last_modified))
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONNECTION, "close");
    if status == StatusCode::PARTIAL_CONTENT {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", start, start + length - 1, size),
        );
    }
    builder
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .map_err(|err| StreamError::Io(std::io::Error::new(std::io::ErrorKind::Other, err)))
}

/// 416 with the `Content-Range: bytes */size` hint.
pub fn unsatisfiable_response(size: u64) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
    if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", size)) {
        response.headers_mut().insert(header::CONTENT_RANGE, value);
    }
    response
}
