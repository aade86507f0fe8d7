use std::io::Cursor;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

use axum::http::StatusCode;
use bytes::Bytes;
use common::Song;
use image::{ImageFormat, Rgba, RgbaImage};
use lru::LruCache;
use parking_lot::Mutex;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

const DEFAULT_WIDTH: u32 = 1200;
const DEFAULT_HEIGHT: u32 = 128;
const MAX_DIMENSION: u32 = 8192;
const CACHE_ENTRIES: usize = 32;
/// Frames folded into one peak while decoding.
const BLOCK_FRAMES: usize = 1024;

#[derive(Debug)]
pub enum WaveformError {
    InvalidSize(String),
    InvalidColor(String),
    Unsupported(String),
    Decode(String),
    Io(std::io::Error),
    Image(image::ImageError),
}

impl WaveformError {
    pub fn status(&self) -> StatusCode {
        match self {
            WaveformError::InvalidSize(_) | WaveformError::InvalidColor(_) => StatusCode::BAD_REQUEST,
            WaveformError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            WaveformError::Io(err) if err.kind() == std::io::ErrorKind::NotFound => {
                StatusCode::NOT_FOUND
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for WaveformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaveformError::InvalidSize(raw) => {
                write!(f, "invalid x-separated integer pair for size: {}", raw)
            }
            WaveformError::InvalidColor(raw) => write!(f, "invalid color: {}", raw),
            WaveformError::Unsupported(what) => write!(f, "unsupported audio format: {}", what),
            WaveformError::Decode(err) => write!(f, "decode error: {}", err),
            WaveformError::Io(err) => write!(f, "io error: {}", err),
            WaveformError::Image(err) => write!(f, "image error: {}", err),
        }
    }
}

impl std::error::Error for WaveformError {}

impl From<std::io::Error> for WaveformError {
    fn from(err: std::io::Error) -> Self {
        WaveformError::Io(err)
    }
}

impl From<image::ImageError> for WaveformError {
    fn from(err: image::ImageError) -> Self {
        WaveformError::Image(err)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WaveformOptions {
    pub width: u32,
    pub height: u32,
    pub fg: [u8; 3],
    pub bg: [u8; 3],
    pub alt: [u8; 3],
}

impl WaveformOptions {
    pub fn parse(
        size: Option<&str>,
        fg: Option<&str>,
        bg: Option<&str>,
        alt: Option<&str>,
    ) -> Result<Self, WaveformError> {
        let (width, height) = match size.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => parse_dimensions(raw)?,
            None => (DEFAULT_WIDTH, DEFAULT_HEIGHT),
        };
        let fg = color_or(fg, [0, 0, 0])?;
        let bg = color_or(bg, [255, 255, 255])?;
        let alt = color_or(alt, fg)?;
        Ok(Self {
            width,
            height,
            fg,
            bg,
            alt,
        })
    }
}

fn parse_dimensions(raw: &str) -> Result<(u32, u32), WaveformError> {
    let invalid = || WaveformError::InvalidSize(raw.to_string());
    let (w, h) = raw.split_once(['x', 'X']).ok_or_else(invalid)?;
    let width: u32 = w.trim().parse().map_err(|_| invalid())?;
    let height: u32 = h.trim().parse().map_err(|_| invalid())?;
    if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(invalid());
    }
    Ok((width, height))
}

fn color_or(raw: Option<&str>, fallback: [u8; 3]) -> Result<[u8; 3], WaveformError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => parse_color(raw).ok_or_else(|| WaveformError::InvalidColor(raw.to_string())),
        None => Ok(fallback),
    }
}

/// `#rgb` or `#rrggbb`; the `#` is optional.
pub fn parse_color(raw: &str) -> Option<[u8; 3]> {
    let hex = raw.strip_prefix('#').unwrap_or(raw);
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let channel = |s: &str| u8::from_str_radix(s, 16).ok();
    match hex.len() {
        3 => {
            let mut out = [0u8; 3];
            for (i, c) in hex.chars().enumerate() {
                let digit = channel(&c.to_string())?;
                out[i] = digit * 17;
            }
            Some(out)
        }
        6 => Some([
            channel(&hex[0..2])?,
            channel(&hex[2..4])?,
            channel(&hex[4..6])?,
        ]),
        _ => None,
    }
}

/// Per-block peak amplitudes (0.0..=1.0) of the file's default track.
pub fn decode_peaks(path: &Path) -> Result<Vec<f32>, WaveformError> {
    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|s| s.to_str()) {
        hint.with_extension(ext);
    }
    let detected = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|err| match err {
            SymphoniaError::IoError(err) => WaveformError::Io(err),
            other => WaveformError::Unsupported(other.to_string()),
        })?;
    let mut format = detected.format;
    let track = format
        .default_track()
        .ok_or_else(|| WaveformError::Unsupported("no default audio track".to_string()))?;
    let track_id = track.id;
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|err| WaveformError::Unsupported(err.to_string()))?;

    let mut peaks = Vec::new();
    let mut block_peak = 0f32;
    let mut block_frames = 0usize;
    let mut samples: Option<SampleBuffer<f32>> = None;
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(_)) => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(err) => return Err(WaveformError::Decode(err.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // Corrupt packets are skipped.
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(err) => return Err(WaveformError::Decode(err.to_string())),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        let needed = decoded.capacity() as u64;
        let stale = samples
            .as_ref()
            .map_or(true, |buffer| (buffer.capacity() as u64) < needed * channels as u64);
        if stale {
            samples = Some(SampleBuffer::<f32>::new(needed, spec));
        }
        let Some(buffer) = samples.as_mut() else {
            continue;
        };
        buffer.copy_interleaved_ref(decoded);

        for frame in buffer.samples().chunks(channels) {
            let amplitude = frame.iter().fold(0f32, |acc, s| acc.max(s.abs()));
            block_peak = block_peak.max(amplitude);
            block_frames += 1;
            if block_frames == BLOCK_FRAMES {
                peaks.push(block_peak.min(1.0));
                block_peak = 0.0;
                block_frames = 0;
            }
        }
    }
    if block_frames > 0 {
        peaks.push(block_peak.min(1.0));
    }
    Ok(peaks)
}

/// Folds `peaks` into exactly `columns` buckets, keeping each bucket's max.
pub fn fold_columns(peaks: &[f32], columns: usize) -> Vec<f32> {
    if peaks.is_empty() || columns == 0 {
        return vec![0.0; columns];
    }
    (0..columns)
        .map(|col| {
            let start = col * peaks.len() / columns;
            let end = ((col + 1) * peaks.len() / columns).max(start + 1).min(peaks.len());
            peaks[start..end].iter().fold(0f32, |acc, p| acc.max(*p))
        })
        .collect()
}

/// One vertical bar per column, centered, alternating fg and alt.
pub fn render_png(peaks: &[f32], options: &WaveformOptions) -> Result<Vec<u8>, WaveformError> {
    let [r, g, b] = options.bg;
    let mut img = RgbaImage::from_pixel(options.width, options.height, Rgba([r, g, b, 255]));
    let columns = fold_columns(peaks, options.width as usize);
    let mid = options.height as f32 / 2.0;
    for (x, peak) in columns.iter().enumerate() {
        let [r, g, b] = if x % 2 == 0 { options.fg } else { options.alt };
        let half = (peak * mid).max(0.5);
        let top = (mid - half).floor().max(0.0) as u32;
        let bottom = ((mid + half).ceil() as u32).min(options.height);
        for y in top..bottom {
            img.put_pixel(x as u32, y, Rgba([r, g, b, 255]));
        }
    }
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct WaveformKey {
    song_id: u64,
    last_modified: i64,
    options: WaveformOptions,
}

/// Recently rendered waveforms, keyed by every input to the rendering.
#[derive(Clone)]
pub struct WaveformCache {
    entries: Arc<Mutex<LruCache<WaveformKey, Bytes>>>,
}

impl Default for WaveformCache {
    fn default() -> Self {
        Self::new(CACHE_ENTRIES)
    }
}

impl WaveformCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    /// Blocking: decodes the whole file on a miss.
    pub fn render(&self, song: &Song, options: WaveformOptions) -> Result<Bytes, WaveformError> {
        let key = WaveformKey {
            song_id: song.id,
            last_modified: song.last_modified,
            options,
        };
        if let Some(png) = self.entries.lock().get(&key) {
            return Ok(png.clone());
        }
        let peaks = decode_peaks(Path::new(&song.file_name))?;
        let png = Bytes::from(render_png(&peaks, &options)?);
        self.entries.lock().put(key, png.clone());
        Ok(png)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
