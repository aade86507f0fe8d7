use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use axum::http::StatusCode;
use bytes::Bytes;
use common::Song;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};

use crate::stream::{Progress, CHUNK_SIZE, PROGRESS_INTERVAL};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Codec {
    Mp3,
    Vorbis,
    Opus,
}

impl Codec {
    pub const ALL: [Codec; 3] = [Codec::Mp3, Codec::Vorbis, Codec::Opus];

    pub fn parse(value: Option<&str>) -> Result<Self, TranscodeError> {
        let value = value.unwrap_or("mp3").trim().to_ascii_lowercase();
        match value.as_str() {
            "" | "mp3" => Ok(Codec::Mp3),
            "ogg" | "vorbis" => Ok(Codec::Vorbis),
            "opus" => Ok(Codec::Opus),
            other => Err(TranscodeError::InvalidCodec(other.to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Codec::Mp3 => "MP3",
            Codec::Vorbis => "Ogg Vorbis",
            Codec::Opus => "Ogg Opus",
        }
    }

    /// Encoder name as listed by `ffmpeg -codecs`.
    pub fn encoder(self) -> &'static str {
        match self {
            Codec::Mp3 => "libmp3lame",
            Codec::Vorbis => "libvorbis",
            Codec::Opus => "libopus",
        }
    }

    pub fn ext(self) -> &'static str {
        match self {
            Codec::Mp3 => "mp3",
            Codec::Vorbis => "ogg",
            Codec::Opus => "opus",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            Codec::Mp3 => "audio/mpeg",
            Codec::Vorbis => "audio/ogg",
            Codec::Opus => "audio/ogg; codecs=opus",
        }
    }

    fn container(self) -> &'static str {
        match self {
            Codec::Mp3 => "mp3",
            Codec::Vorbis | Codec::Opus => "ogg",
        }
    }

    fn bitrates(self) -> &'static [u32] {
        match self {
            Codec::Mp3 => &[128, 192, 256, 320],
            Codec::Vorbis | Codec::Opus => &[128, 192, 256, 320, 500],
        }
    }

    fn vbr_levels(self) -> &'static [u8] {
        match self {
            Codec::Mp3 => &[0, 2, 4],
            Codec::Vorbis | Codec::Opus => &[6, 8, 10],
        }
    }

    fn vbr_prefix(self) -> char {
        match self {
            Codec::Mp3 => 'v',
            Codec::Vorbis | Codec::Opus => 'q',
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Quality {
    Cbr(u32),
    Vbr(u8),
}

/// A codec with a quality from that codec's allow-list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Profile {
    pub codec: Codec,
    pub quality: Quality,
}

impl Profile {
    pub fn parse(codec: Option<&str>, quality: Option<&str>) -> Result<Self, TranscodeError> {
        let codec = Codec::parse(codec)?;
        let raw = quality.unwrap_or("192").trim().to_ascii_lowercase();
        let invalid = || TranscodeError::InvalidQuality(raw.clone());

        let quality = if let Some(level) = raw.strip_prefix(codec.vbr_prefix()) {
            let level: u8 = level.parse().map_err(|_| invalid())?;
            if !codec.vbr_levels().contains(&level) {
                return Err(invalid());
            }
            Quality::Vbr(level)
        } else {
            let kbps: u32 = raw.trim_end_matches('k').parse().map_err(|_| invalid())?;
            if !codec.bitrates().contains(&kbps) {
                return Err(invalid());
            }
            Quality::Cbr(kbps)
        };
        Ok(Self { codec, quality })
    }

    pub fn mime(&self) -> &'static str {
        self.codec.mime()
    }

    pub fn mode(&self) -> &'static str {
        match self.quality {
            Quality::Cbr(_) => "CBR",
            Quality::Vbr(_) => "VBR",
        }
    }

    pub fn quality_label(&self) -> String {
        match self.quality {
            Quality::Cbr(kbps) => format!("{}kbps", kbps),
            Quality::Vbr(level) => format!(
                "{}{}",
                self.codec.vbr_prefix().to_ascii_uppercase(),
                level
            ),
        }
    }

    /// Synthetic name for the encoded output, used in logs.
    pub fn output_name(&self, song: &Song) -> String {
        let stem = Path::new(&song.file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| song.id.to_string());
        format!("{}.{}", stem, self.codec.ext())
    }

    pub fn encoder_args(&self, input: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-i".into(),
            input.as_os_str().to_os_string(),
            "-acodec".into(),
            self.codec.encoder().into(),
        ];
        match (self.codec, self.quality) {
            (_, Quality::Cbr(kbps)) => {
                args.push("-b:a".into());
                args.push(format!("{}k", kbps).into());
            }
            (Codec::Mp3, Quality::Vbr(level)) => {
                args.push("-qscale:a".into());
                args.push(level.to_string().into());
            }
            (_, Quality::Vbr(level)) => {
                args.push("-aq".into());
                args.push(level.to_string().into());
            }
        }
        args.push("-f".into());
        args.push(self.codec.container().into());
        args.push("pipe:1".into());
        args
    }
}

#[derive(Debug)]
pub enum TranscodeError {
    InvalidCodec(String),
    InvalidQuality(String),
    EncoderMissing(&'static str),
    RangeUnsupported,
    Spawn(std::io::Error),
}

impl TranscodeError {
    pub fn status(&self) -> StatusCode {
        match self {
            TranscodeError::InvalidCodec(_) | TranscodeError::InvalidQuality(_) => {
                StatusCode::BAD_REQUEST
            }
            TranscodeError::EncoderMissing(_) => StatusCode::SERVICE_UNAVAILABLE,
            TranscodeError::RangeUnsupported => StatusCode::RANGE_NOT_SATISFIABLE,
            TranscodeError::Spawn(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for TranscodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranscodeError::InvalidCodec(codec) => write!(f, "invalid transcoder codec: {}", codec),
            TranscodeError::InvalidQuality(quality) => {
                write!(f, "invalid quality for codec: {}", quality)
            }
            TranscodeError::EncoderMissing(name) => {
                write!(f, "ffmpeg not found or {} unsupported, transcoding disabled", name)
            }
            TranscodeError::RangeUnsupported => write!(f, "cannot use HTTP range with transcoding"),
            TranscodeError::Spawn(err) => write!(f, "failed to start encoder: {}", err),
        }
    }
}

impl std::error::Error for TranscodeError {}

/// Handle on the external encoder, detected once at startup.
#[derive(Clone, Debug, Default)]
pub struct Transcoder {
    ffmpeg: Option<PathBuf>,
    encoders: Arc<HashSet<Codec>>,
}

impl Transcoder {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub async fn detect(override_path: Option<&str>) -> Self {
        let ffmpeg = match override_path.map(str::trim).filter(|p| !p.is_empty()) {
            Some(path) => Some(PathBuf::from(path)),
            None => find_on_path("ffmpeg"),
        };
        let ffmpeg = match ffmpeg {
            Some(ffmpeg) => ffmpeg,
            None => {
                warn!("transcode: ffmpeg not found, transcoding disabled");
                return Self::disabled();
            }
        };

        let output = Command::new(&ffmpeg)
            .args(["-loglevel", "quiet", "-codecs"])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await;
        let listing = match output {
            Ok(output) => String::from_utf8_lossy(&output.stdout).to_string(),
            Err(err) => {
                warn!("transcode: cannot run {}: {}", ffmpeg.display(), err);
                return Self::disabled();
            }
        };
        let encoders = supported_encoders(&listing);
        for codec in Codec::ALL {
            if encoders.contains(&codec) {
                info!("transcode: {} enabled ({})", codec.name(), codec.encoder());
            } else {
                warn!("transcode: {} disabled, {} missing", codec.name(), codec.encoder());
            }
        }
        Self {
            ffmpeg: Some(ffmpeg),
            encoders: Arc::new(encoders),
        }
    }

    pub fn supports(&self, codec: Codec) -> bool {
        self.ffmpeg.is_some() && self.encoders.contains(&codec)
    }

    pub fn enabled(&self) -> bool {
        self.ffmpeg.is_some() && !self.encoders.is_empty()
    }

    /// Starts the encoder and returns its output as a body stream. Dropping
    /// the stream kills and reaps the process.
    pub fn spawn(
        &self,
        profile: Profile,
        song: &Song,
    ) -> Result<ReceiverStream<Result<Bytes, std::io::Error>>, TranscodeError> {
        let ffmpeg = match (&self.ffmpeg, self.supports(profile.codec)) {
            (Some(ffmpeg), true) => ffmpeg,
            _ => return Err(TranscodeError::EncoderMissing(profile.codec.encoder())),
        };
        let mut child = Command::new(ffmpeg)
            .args(profile.encoder_args(Path::new(&song.file_name)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(TranscodeError::Spawn)?;
        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                return Err(TranscodeError::Spawn(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "encoder stdout unavailable",
                )))
            }
        };

        info!(
            "transcode: start: {} -> {} [{} {}]",
            song.describe(),
            profile.output_name(song),
            profile.codec.name(),
            profile.quality_label()
        );
        let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(16);
        tokio::spawn(pump(child, stdout, tx, song.id, song.describe()));
        Ok(ReceiverStream::new(rx))
    }
}

enum Outcome {
    Completed,
    ClientReset,
    Failed(String),
}

async fn pump(
    mut child: Child,
    mut stdout: ChildStdout,
    tx: mpsc::Sender<Result<Bytes, std::io::Error>>,
    id: u64,
    descriptor: String,
) {
    let mut progress = Progress::new("transcode", id, None);
    let mut ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + PROGRESS_INTERVAL,
        PROGRESS_INTERVAL,
    );
    let mut buf = vec![0u8; CHUNK_SIZE];

    let mut outcome = loop {
        tokio::select! {
            _ = ticker.tick() => progress.tick(),
            _ = tx.closed() => break Outcome::ClientReset,
            read = stdout.read(&mut buf) => match read {
                Ok(0) => break Outcome::Completed,
                Ok(n) => {
                    if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
                        break Outcome::ClientReset;
                    }
                    progress.add(n);
                }
                Err(err) => break Outcome::Failed(err.to_string()),
            },
        }
    };
    drop(stdout);

    match outcome {
        Outcome::Completed => match child.wait().await {
            Ok(status) if status.success() => {}
            Ok(status) => outcome = Outcome::Failed(format!("encoder exited with {}", status)),
            Err(err) => outcome = Outcome::Failed(err.to_string()),
        },
        Outcome::ClientReset | Outcome::Failed(_) => reap(&mut child).await,
    }

    match outcome {
        Outcome::Completed => info!(
            "transcode: completed: {} [{} bytes]",
            descriptor,
            progress.sent()
        ),
        Outcome::ClientReset => info!(
            "transcode: client reset: {} after {} bytes",
            descriptor,
            progress.sent()
        ),
        Outcome::Failed(reason) => {
            error!("transcode: failed: {}: {}", descriptor, reason);
            // Aborts the body so the client sees a truncated response.
            let _ = tx
                .send(Err(std::io::Error::new(std::io::ErrorKind::Other, reason)))
                .await;
        }
    }
}

async fn reap(child: &mut Child) {
    if let Err(err) = child.kill().await {
        warn!("transcode: failed to kill encoder: {}", err);
    }
}

/// Encoders from an `ffmpeg -codecs` listing that this server can drive.
pub fn supported_encoders(listing: &str) -> HashSet<Codec> {
    Codec::ALL
        .into_iter()
        .filter(|codec| listing.contains(codec.encoder()))
        .collect()
}

fn find_on_path(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
