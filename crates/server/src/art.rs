use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use common::{http_date, Art};
use image::imageops::FilterType;
use image::ImageFormat;
use library::{Catalog, CatalogError};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::status::add_tx;

#[derive(Debug)]
pub enum ArtError {
    InvalidSize(String),
    NegativeSize,
    NotFound(String),
    Io(std::io::Error),
    Image(image::ImageError),
    Catalog(CatalogError),
}

impl ArtError {
    pub fn status(&self) -> StatusCode {
        match self {
            ArtError::InvalidSize(_) | ArtError::NegativeSize => StatusCode::BAD_REQUEST,
            ArtError::NotFound(_) => StatusCode::NOT_FOUND,
            ArtError::Catalog(CatalogError::NotFound(_)) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for ArtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtError::InvalidSize(raw) => write!(f, "invalid integer size: {}", raw),
            ArtError::NegativeSize => write!(f, "negative integer size"),
            ArtError::NotFound(what) => write!(f, "art file not found: {}", what),
            ArtError::Io(err) => write!(f, "io error: {}", err),
            ArtError::Image(err) => write!(f, "image error: {}", err),
            ArtError::Catalog(CatalogError::NotFound(_)) => write!(f, "art ID not found"),
            ArtError::Catalog(err) => write!(f, "catalog error: {}", err),
        }
    }
}

impl std::error::Error for ArtError {}

impl From<std::io::Error> for ArtError {
    fn from(err: std::io::Error) -> Self {
        ArtError::Io(err)
    }
}

impl From<image::ImageError> for ArtError {
    fn from(err: image::ImageError) -> Self {
        ArtError::Image(err)
    }
}

impl From<CatalogError> for ArtError {
    fn from(err: CatalogError) -> Self {
        ArtError::Catalog(err)
    }
}

/// `None` when absent; zero and negative sizes are refused.
pub fn parse_size(raw: Option<&str>) -> Result<Option<u32>, ArtError> {
    let raw = match raw.map(str::trim) {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Ok(None),
    };
    let size: i64 = raw
        .parse()
        .map_err(|_| ArtError::InvalidSize(raw.to_string()))?;
    if size <= 0 {
        return Err(ArtError::NegativeSize);
    }
    u32::try_from(size)
        .map(Some)
        .map_err(|_| ArtError::InvalidSize(raw.to_string()))
}

/// Image bytes ready to send.
#[derive(Clone, Debug)]
pub struct Picture {
    pub bytes: Bytes,
    pub mime: String,
    pub last_modified: i64,
}

impl Picture {
    pub fn into_response(self) -> Response {
        let len = self.bytes.len();
        add_tx(len as u64);
        let mut response = Response::new(Body::from(self.bytes));
        let headers = response.headers_mut();
        if let Ok(value) = self.mime.parse() {
            headers.insert(header::CONTENT_TYPE, value);
        }
        headers.insert(header::CONTENT_LENGTH, len.into());
        if let Ok(value) = http_date(self.last_modified).parse() {
            headers.insert(header::LAST_MODIFIED, value);
        }
        response
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ArtCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub bytes: usize,
}

struct Cached {
    last_modified: i64,
    picture: Picture,
}

struct ResizeCache {
    entries: LruCache<(u64, u32), Cached>,
    bytes: usize,
    max_bytes: usize,
}

impl ResizeCache {
    fn get(&mut self, key: (u64, u32), last_modified: i64) -> Option<Picture> {
        let stale = match self.entries.get(&key) {
            Some(cached) if cached.last_modified == last_modified => {
                return Some(cached.picture.clone())
            }
            Some(_) => true,
            None => false,
        };
        if stale {
            if let Some(old) = self.entries.pop(&key) {
                self.bytes -= old.picture.bytes.len();
            }
        }
        None
    }

    fn put(&mut self, key: (u64, u32), picture: Picture) {
        let len = picture.bytes.len();
        if len > self.max_bytes {
            return;
        }
        if let Some(old) = self.entries.pop(&key) {
            self.bytes -= old.picture.bytes.len();
        }
        while self.bytes + len > self.max_bytes {
            match self.entries.pop_lru() {
                Some((_, evicted)) => self.bytes -= evicted.picture.bytes.len(),
                None => break,
            }
        }
        self.bytes += len;
        let last_modified = picture.last_modified;
        self.entries.put(key, Cached { last_modified, picture });
    }
}

/// Loads art files and produces square thumbnails, keeping recent
/// thumbnails under a byte ceiling.
#[derive(Clone)]
pub struct ArtResolver {
    catalog: Catalog,
    cache: Arc<Mutex<ResizeCache>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl ArtResolver {
    pub fn new(catalog: Catalog, max_bytes: usize) -> Self {
        Self {
            catalog,
            cache: Arc::new(Mutex::new(ResizeCache {
                entries: LruCache::unbounded(),
                bytes: 0,
                max_bytes,
            })),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Blocking: reads the file and may decode and re-encode it.
    pub fn resolve(&self, id: u64, size: Option<u32>) -> Result<Picture, ArtError> {
        let art = self.catalog.load::<Art>(id)?;
        let size = match size {
            Some(size) => size,
            None => return read_original(&art),
        };

        let key = (art.id, size);
        if let Some(picture) = self.cache.lock().get(key, art.last_modified) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(picture);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let original = read_original(&art)?;
        let picture = resize(&original, size)?;
        debug!(
            "art: resized #{} to {}px [{} bytes]",
            art.id,
            size,
            picture.bytes.len()
        );
        self.cache.lock().put(key, picture.clone());
        Ok(picture)
    }

    pub fn stats(&self) -> ArtCacheStats {
        let cache = self.cache.lock();
        ArtCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: cache.entries.len(),
            bytes: cache.bytes,
        }
    }
}

fn read_original(art: &Art) -> Result<Picture, ArtError> {
    let bytes = match std::fs::read(&art.file_name) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ArtError::NotFound(art.file_name.clone()))
        }
        Err(err) => return Err(err.into()),
    };
    let mime = match image::guess_format(&bytes) {
        Ok(format) => format.to_mime_type().to_string(),
        Err(_) => mime_guess::from_path(&art.file_name)
            .first_or_octet_stream()
            .to_string(),
    };
    Ok(Picture {
        bytes: Bytes::from(bytes),
        mime,
        last_modified: art.last_modified,
    })
}

/// Fits the image in a `size` square. JPEG stays JPEG, everything else
/// becomes PNG.
fn resize(original: &Picture, size: u32) -> Result<Picture, ArtError> {
    let format = image::guess_format(&original.bytes)?;
    let img = image::load_from_memory_with_format(&original.bytes, format)?;
    let resized = img.resize(size, size, FilterType::Triangle);

    let output = match format {
        ImageFormat::Jpeg => ImageFormat::Jpeg,
        _ => ImageFormat::Png,
    };
    let resized = match output {
        ImageFormat::Jpeg => image::DynamicImage::ImageRgb8(resized.to_rgb8()),
        _ => resized,
    };
    let mut buf = Cursor::new(Vec::new());
    resized.write_to(&mut buf, output)?;
    Ok(Picture {
        bytes: Bytes::from(buf.into_inner()),
        mime: output.to_mime_type().to_string(),
        last_modified: original.last_modified,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn catalog_with_art(dir: &std::path::Path, format: ImageFormat, name: &str) -> (Catalog, Art) {
        let path = dir.join(name);
        RgbImage::from_pixel(64, 32, Rgb([200, 10, 10]))
            .save_with_format(&path, format)
            .unwrap();
        let catalog = Catalog::open(&dir.join("art.redb")).unwrap();
        let art = catalog
            .save(&Art {
                id: 0,
                file_name: path.to_string_lossy().to_string(),
                file_size: std::fs::metadata(&path).unwrap().len(),
                last_modified: 1_000,
            })
            .unwrap();
        (catalog, art)
    }

    #[test]
    fn sizes_are_validated() {
        assert!(parse_size(None).unwrap().is_none());
        assert!(parse_size(Some("")).unwrap().is_none());
        assert_eq!(parse_size(Some("200")).unwrap(), Some(200));
        assert!(matches!(parse_size(Some("0")), Err(ArtError::NegativeSize)));
        assert!(matches!(parse_size(Some("-4")), Err(ArtError::NegativeSize)));
        assert!(matches!(parse_size(Some("big")), Err(ArtError::InvalidSize(_))));
        assert_eq!(ArtError::NegativeSize.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn original_is_served_with_magic_mime() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, art) = catalog_with_art(dir.path(), ImageFormat::Png, "cover.jpg");
        let resolver = ArtResolver::new(catalog, 1024 * 1024);

        let picture = resolver.resolve(art.id, None).unwrap();
        assert_eq!(picture.mime, "image/png");
        assert_eq!(picture.last_modified, 1_000);
        assert_eq!(resolver.stats().misses, 0);
    }

    #[test]
    fn resize_is_cached_until_the_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, mut art) = catalog_with_art(dir.path(), ImageFormat::Jpeg, "cover.jpg");
        let resolver = ArtResolver::new(catalog.clone(), 1024 * 1024);

        let first = resolver.resolve(art.id, Some(16)).unwrap();
        let second = resolver.resolve(art.id, Some(16)).unwrap();
        assert_eq!(first.bytes, second.bytes);
        assert_eq!(first.mime, "image/jpeg");
        let stats = resolver.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));

        let decoded = image::load_from_memory(&first.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));

        art.last_modified = 2_000;
        catalog.update(&art).unwrap();
        resolver.resolve(art.id, Some(16)).unwrap();
        assert_eq!(resolver.stats().misses, 2);
    }

    #[test]
    fn cache_respects_its_byte_ceiling() {
        let picture = |n: usize| Picture {
            bytes: Bytes::from(vec![0u8; n]),
            mime: "image/png".into(),
            last_modified: 0,
        };
        let mut cache = ResizeCache {
            entries: LruCache::unbounded(),
            bytes: 0,
            max_bytes: 100,
        };
        cache.put((1, 10), picture(60));
        cache.put((2, 10), picture(30));
        assert!(cache.get((1, 10), 0).is_some());
        cache.put((3, 10), picture(50));

        assert!(cache.get((2, 10), 0).is_none());
        assert!(cache.get((1, 10), 0).is_none());
        assert!(cache.get((3, 10), 0).is_some());
        assert!(cache.bytes <= 100);

        cache.put((4, 10), picture(500));
        assert!(cache.get((4, 10), 0).is_none());
    }

    #[test]
    fn unknown_art_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, _) = catalog_with_art(dir.path(), ImageFormat::Png, "a.png");
        let resolver = ArtResolver::new(catalog, 1024);
        let err = resolver.resolve(999, None).unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
