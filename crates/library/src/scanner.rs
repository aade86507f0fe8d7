use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use common::{system_time_unix, Album, Art, Artist, FileType, Folder, Song};
use metadata::{FileInfo, MetadataError};
use redb::WriteTransaction;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::catalog::{album_key, txn, Catalog, CatalogError};

const BATCH_SIZE: usize = 256;
const COVER_NAMES: &[&str] = &["cover", "folder", "front", "album"];
const COVER_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Source of tags and properties for audio files.
pub trait TagReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<FileInfo, MetadataError>;
}

/// Reads real files through `lofty`.
pub struct LoftyReader;

impl TagReader for LoftyReader {
    fn read(&self, path: &Path) -> Result<FileInfo, MetadataError> {
        metadata::read_file(path)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ScanOptions {
    /// Re-read songs whose file changed since they were indexed.
    pub refresh_modified: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    pub folders_added: usize,
    pub artists_added: usize,
    pub albums_added: usize,
    pub songs_added: usize,
    pub songs_updated: usize,
    pub arts_added: usize,
    pub files_skipped: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug)]
pub enum ScanError {
    Cancelled,
    RootMissing(PathBuf),
    Catalog(CatalogError),
}

impl std::fmt::Display for ScanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanError::Cancelled => write!(f, "cancelled"),
            ScanError::RootMissing(path) => write!(f, "media root {:?} is not a directory", path),
            ScanError::Catalog(err) => write!(f, "catalog error: {}", err),
        }
    }
}

impl std::error::Error for ScanError {}

impl From<CatalogError> for ScanError {
    fn from(err: CatalogError) -> Self {
        ScanError::Catalog(err)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalkEvent {
    EnterDir(PathBuf),
    File(PathBuf),
}

/// Directories and recognized audio files under `root`, in lexicographic
/// order with each directory before its contents.
pub fn walk(root: &Path) -> impl Iterator<Item = WalkEvent> {
    WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!("scan: skipping unreadable entry: {}", err);
                None
            }
        })
        .filter_map(|entry| {
            let file_type = entry.file_type();
            if file_type.is_dir() {
                Some(WalkEvent::EnterDir(entry.into_path()))
            } else if file_type.is_file() && FileType::from_path(entry.path()).is_some() {
                Some(WalkEvent::File(entry.into_path()))
            } else {
                None
            }
        })
}

enum Flow {
    More,
    Done,
    Cancelled,
}

/// Consumes [`walk`] events and converges the catalog toward the tree.
pub struct Scanner<'a> {
    catalog: &'a Catalog,
    reader: &'a dyn TagReader,
    cancel: &'a AtomicBool,
    options: ScanOptions,
    root: PathBuf,
    folders: HashMap<PathBuf, u64>,
    artists: HashMap<String, u64>,
    albums: HashMap<String, u64>,
    arts: HashMap<PathBuf, Option<u64>>,
    stats: ScanStats,
}

impl<'a> Scanner<'a> {
    pub fn new(catalog: &'a Catalog, reader: &'a dyn TagReader, cancel: &'a AtomicBool) -> Self {
        Self {
            catalog,
            reader,
            cancel,
            options: ScanOptions::default(),
            root: PathBuf::new(),
            folders: HashMap::new(),
            artists: HashMap::new(),
            albums: HashMap::new(),
            arts: HashMap::new(),
            stats: ScanStats::default(),
        }
    }

    pub fn with_options(mut self, options: ScanOptions) -> Self {
        self.options = options;
        self
    }

    pub fn run(mut self, root: &Path) -> Result<ScanStats, ScanError> {
        let started = Instant::now();
        self.root = match fs::canonicalize(root) {
            Ok(path) if path.is_dir() => path,
            _ => return Err(ScanError::RootMissing(root.to_path_buf())),
        };
        info!("scan: walking {:?}", self.root);

        let catalog = self.catalog;
        let root = self.root.clone();
        let mut events = walk(&root);
        loop {
            let flow = catalog.with_fast_tx(|tx| {
                for _ in 0..BATCH_SIZE {
                    if self.cancel.load(Ordering::Relaxed) {
                        return Ok::<_, ScanError>(Flow::Cancelled);
                    }
                    match events.next() {
                        Some(WalkEvent::EnterDir(path)) => {
                            self.enter_dir(tx, &path)?;
                        }
                        Some(WalkEvent::File(path)) => self.add_file(tx, &path)?,
                        None => return Ok(Flow::Done),
                    }
                }
                Ok(Flow::More)
            })?;
            match flow {
                Flow::More => continue,
                Flow::Done => break,
                Flow::Cancelled => {
                    catalog.flush()?;
                    warn!("scan: cancelled");
                    return Err(ScanError::Cancelled);
                }
            }
        }
        catalog.flush()?;

        self.stats.elapsed_ms = started.elapsed().as_millis() as u64;
        let stats = self.stats;
        info!(
            "scan: added: [{} artists] [{} albums] [{} songs] [{} folders] [{} art]",
            stats.artists_added,
            stats.albums_added,
            stats.songs_added,
            stats.folders_added,
            stats.arts_added
        );
        if stats.songs_updated > 0 || stats.files_skipped > 0 {
            info!(
                "scan: updated {} songs, skipped {} files",
                stats.songs_updated, stats.files_skipped
            );
        }
        info!("scan: finished in {} ms", stats.elapsed_ms);
        Ok(stats)
    }

    fn enter_dir(&mut self, tx: &WriteTransaction, path: &Path) -> Result<u64, CatalogError> {
        if let Some(id) = self.folders.get(path) {
            return Ok(*id);
        }
        let key = path.to_string_lossy();
        if let Some(folder) = txn::find::<Folder>(tx, &key)? {
            self.folders.insert(path.to_path_buf(), folder.id);
            return Ok(folder.id);
        }

        let parent_id = if path == self.root {
            None
        } else {
            match path.parent() {
                Some(parent) => self.folder_id(tx, parent)?,
                None => None,
            }
        };
        let mut folder = Folder::from_path(path, parent_id);
        let id = txn::insert(tx, &mut folder)?;
        debug!("scan: folder {:?} -> {}", path, id);
        self.folders.insert(path.to_path_buf(), id);
        self.stats.folders_added += 1;
        Ok(id)
    }

    fn folder_id(&mut self, tx: &WriteTransaction, path: &Path) -> Result<Option<u64>, CatalogError> {
        if let Some(id) = self.folders.get(path) {
            return Ok(Some(*id));
        }
        let folder = txn::find::<Folder>(tx, &path.to_string_lossy())?;
        if let Some(folder) = &folder {
            self.folders.insert(path.to_path_buf(), folder.id);
        }
        Ok(folder.map(|folder| folder.id))
    }

    fn add_file(&mut self, tx: &WriteTransaction, path: &Path) -> Result<(), CatalogError> {
        let file_name = path.to_string_lossy().to_string();
        let existing = txn::find::<Song>(tx, &file_name)?;

        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(err) => {
                warn!("scan: cannot stat {:?}: {}", path, err);
                self.stats.files_skipped += 1;
                return Ok(());
            }
        };
        let last_modified = meta.modified().map(system_time_unix).unwrap_or(0);
        if let Some(song) = &existing {
            if !self.options.refresh_modified || last_modified <= song.last_modified {
                if song.art_id.is_some() {
                    let dir = path.parent().unwrap_or(&self.root).to_path_buf();
                    self.art_id(tx, &dir)?;
                }
                return Ok(());
            }
        }

        let info = match self.reader.read(path) {
            Ok(info) => info,
            Err(err) => {
                match err {
                    MetadataError::TagsMissing | MetadataError::PropertiesMissing => {
                        debug!("scan: skipping {:?}: {}", path, err)
                    }
                    _ => warn!("scan: skipping {:?}: {}", path, err),
                }
                self.stats.files_skipped += 1;
                return Ok(());
            }
        };

        let artist_id = self.artist_id(tx, &info.artist)?;
        let album_id = self.album_id(tx, artist_id, &info)?;
        let dir = path.parent().unwrap_or(&self.root).to_path_buf();
        let folder_id = self.enter_dir(tx, &dir)?;
        let art_id = self.art_id(tx, &dir)?;

        let mut song = Song {
            id: existing.as_ref().map(|song| song.id).unwrap_or(0),
            album: info.album,
            album_id,
            artist: info.artist,
            artist_id,
            art_id,
            bitrate: info.bitrate,
            channels: info.channels,
            comment: info.comment,
            file_name,
            file_size: meta.len(),
            file_type_id: FileType::from_path(path)
                .map(|kind| kind.id())
                .unwrap_or_default(),
            folder_id,
            genre: info.genre,
            last_modified,
            length: info.length,
            sample_rate: info.sample_rate,
            title: info.title,
            track: info.track,
            year: info.year,
        };

        if existing.is_some() {
            txn::update(tx, &song)?;
            self.stats.songs_updated += 1;
        } else {
            txn::insert(tx, &mut song)?;
            self.stats.songs_added += 1;
        }
        Ok(())
    }

    fn artist_id(&mut self, tx: &WriteTransaction, title: &str) -> Result<u64, CatalogError> {
        if let Some(id) = self.artists.get(title) {
            return Ok(*id);
        }
        let id = match txn::find::<Artist>(tx, title)? {
            Some(artist) => artist.id,
            None => {
                let mut artist = Artist {
                    id: 0,
                    title: title.to_string(),
                };
                self.stats.artists_added += 1;
                txn::insert(tx, &mut artist)?
            }
        };
        self.artists.insert(title.to_string(), id);
        Ok(id)
    }

    fn album_id(
        &mut self,
        tx: &WriteTransaction,
        artist_id: u64,
        info: &FileInfo,
    ) -> Result<u64, CatalogError> {
        let key = album_key(artist_id, &info.album);
        if let Some(id) = self.albums.get(&key) {
            return Ok(*id);
        }
        let id = match txn::find::<Album>(tx, &key)? {
            Some(album) => album.id,
            None => {
                let mut album = Album {
                    id: 0,
                    artist: info.artist.clone(),
                    artist_id,
                    title: info.album.clone(),
                    year: info.year,
                };
                self.stats.albums_added += 1;
                txn::insert(tx, &mut album)?
            }
        };
        self.albums.insert(key, id);
        Ok(id)
    }

    /// Upserts the directory's cover by file name, refreshing a stored row
    /// whose size or mtime no longer matches the file.
    fn art_id(&mut self, tx: &WriteTransaction, dir: &Path) -> Result<Option<u64>, CatalogError> {
        if let Some(cached) = self.arts.get(dir) {
            return Ok(*cached);
        }
        let id = match find_cover(dir) {
            Some(cover) => self.upsert_art(tx, &cover)?,
            None => None,
        };
        self.arts.insert(dir.to_path_buf(), id);
        Ok(id)
    }

    fn upsert_art(&mut self, tx: &WriteTransaction, cover: &Path) -> Result<Option<u64>, CatalogError> {
        let meta = match fs::metadata(cover) {
            Ok(meta) => meta,
            Err(err) => {
                warn!("scan: cannot stat cover {:?}: {}", cover, err);
                return Ok(None);
            }
        };
        let file_size = meta.len();
        let last_modified = meta.modified().map(system_time_unix).unwrap_or(0);
        let file_name = cover.to_string_lossy().to_string();

        match txn::find::<Art>(tx, &file_name)? {
            Some(mut art) => {
                if art.file_size != file_size || art.last_modified != last_modified {
                    art.file_size = file_size;
                    art.last_modified = last_modified;
                    txn::update(tx, &art)?;
                    debug!("scan: cover {:?} changed", cover);
                }
                Ok(Some(art.id))
            }
            None => {
                let mut art = Art {
                    id: 0,
                    file_name,
                    file_size,
                    last_modified,
                };
                self.stats.arts_added += 1;
                Ok(Some(txn::insert(tx, &mut art)?))
            }
        }
    }
}

/// Picks the cover image of a directory: a well-known name first, else the
/// first image in name order.
pub fn find_cover(dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    let mut images: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
                .map(|ext| COVER_EXTENSIONS.contains(&ext.as_str()))
                .unwrap_or(false)
        })
        .collect();
    images.sort();

    for name in COVER_NAMES {
        let preferred = images.iter().find(|path| {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().eq_ignore_ascii_case(name))
                .unwrap_or(false)
        });
        if let Some(path) = preferred {
            return Some(path.clone());
        }
    }
    images.into_iter().next()
}
