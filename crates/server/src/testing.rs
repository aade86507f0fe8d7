//! Fixtures shared by the server's unit tests.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use library::{Catalog, Library, TagReader};
use metadata::{FileInfo, MetadataError};
use tokio_util::sync::CancellationToken;

use crate::art::ArtResolver;
use crate::auth::AuthStore;
use crate::scan::Maintenance;
use crate::state::AppState;
use crate::transcode::Transcoder;
use crate::waveform::WaveformCache;

/// Reads `title|artist|album|year` from the file body.
pub struct StubReader;

impl TagReader for StubReader {
    fn read(&self, path: &Path) -> Result<FileInfo, MetadataError> {
        let body = fs::read_to_string(path)?;
        let mut parts = body.trim().split('|');
        FileInfo {
            title: parts.next().unwrap_or_default().to_string(),
            artist: parts.next().unwrap_or_default().to_string(),
            album: parts.next().unwrap_or_default().to_string(),
            year: parts.next().and_then(|y| y.parse().ok()).unwrap_or(0),
            bitrate: 320,
            channels: 2,
            length: 180,
            sample_rate: 44100,
            ..FileInfo::default()
        }
        .validate()
    }
}

pub fn write_song(root: &Path, rel: &str, tags: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, tags).unwrap();
}

/// Two songs under `music/`, nothing scanned yet.
pub fn seeded_library() -> (tempfile::TempDir, Library) {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("music");
    write_song(&root, "ArtistA/AlbumA/01.mp3", "S1|ArtistA|AlbumA|2020");
    write_song(&root, "ArtistB/AlbumB/02.flac", "S2|ArtistB|AlbumB|2021");
    let catalog = Catalog::open(&dir.path().join("db.redb")).unwrap();
    let library = Library::with_reader(root, catalog, Arc::new(StubReader));
    (dir, library)
}

/// A scanned library behind a full `AppState` without an encoder.
pub fn scanned_state() -> (tempfile::TempDir, AppState) {
    let (dir, library) = seeded_library();
    let cancel = std::sync::atomic::AtomicBool::new(false);
    library.scan(Default::default(), &cancel).unwrap();
    let state = AppState {
        auth: AuthStore::new(library.catalog().clone()),
        art: ArtResolver::new(library.catalog().clone(), 1 << 20),
        transcoder: Transcoder::disabled(),
        waveforms: WaveformCache::new(4),
        maintenance: Maintenance::new(library.clone(), CancellationToken::new()),
        started: Instant::now(),
        library,
    };
    (dir, state)
}
