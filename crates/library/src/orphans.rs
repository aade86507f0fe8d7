use std::path::{Path, MAIN_SEPARATOR};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use common::Song;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::catalog::{txn, Catalog, CatalogError};
use crate::scanner::ScanError;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanStats {
    pub songs: usize,
    pub albums: usize,
    pub artists: usize,
    pub folders: usize,
    pub arts: usize,
    pub elapsed_ms: u64,
}

/// Removes catalog rows no longer backed by files: songs first, then the
/// albums, artists, folders and art they leave unreferenced.
pub fn collect_orphans(
    catalog: &Catalog,
    base: &Path,
    sub: Option<&Path>,
    cancel: &AtomicBool,
) -> Result<OrphanStats, ScanError> {
    let started = Instant::now();
    let mut stats = OrphanStats::default();

    let outside = catalog.songs_not_in_path(&dir_prefix(base))?;
    stats.songs += delete_songs(catalog, &outside)?;

    let scope = sub.unwrap_or(base);
    let mut missing = Vec::new();
    for song in catalog.songs_in_path(&dir_prefix(scope))? {
        if cancel.load(Ordering::Relaxed) {
            return Err(ScanError::Cancelled);
        }
        if !Path::new(&song.file_name).exists() {
            missing.push(song);
        }
    }
    stats.songs += delete_songs(catalog, &missing)?;

    stats.albums = catalog.purge_orphan_albums()?;
    stats.artists = catalog.purge_orphan_artists()?;
    stats.folders = catalog.purge_orphan_folders()?;
    stats.arts = catalog.purge_orphan_arts()?;
    catalog.flush()?;

    stats.elapsed_ms = started.elapsed().as_millis() as u64;
    info!(
        "orphans: removed: [{} songs] [{} albums] [{} artists] [{} folders] [{} art]",
        stats.songs, stats.albums, stats.artists, stats.folders, stats.arts
    );
    Ok(stats)
}

fn delete_songs(catalog: &Catalog, songs: &[Song]) -> Result<usize, CatalogError> {
    if songs.is_empty() {
        return Ok(0);
    }
    catalog.with_fast_tx(|tx| {
        for song in songs {
            txn::delete(tx, song)?;
        }
        Ok(songs.len())
    })
}

fn dir_prefix(path: &Path) -> String {
    let mut prefix = path.to_string_lossy().to_string();
    if !prefix.ends_with(MAIN_SEPARATOR) {
        prefix.push(MAIN_SEPARATOR);
    }
    prefix
}

#[cfg(test)]
mod tests {
    use std::fs;

    use common::{Album, Artist, Folder};

    use super::*;
    use crate::scanner::tests::{seeded, StubReader};
    use crate::scanner::Scanner;

    #[test]
    fn deleted_file_takes_its_album_artist_and_folders() {
        let (_dir, root, catalog) = seeded();
        let cancel = AtomicBool::new(false);
        Scanner::new(&catalog, &StubReader, &cancel).run(&root).unwrap();
        assert_eq!(catalog.count::<Folder>().unwrap(), 5);

        fs::remove_file(root.join("ArtistA/AlbumA/01.mp3")).unwrap();
        let stats = collect_orphans(&catalog, &root, None, &cancel).unwrap();

        assert_eq!(stats.songs, 1);
        assert_eq!(stats.albums, 1);
        assert_eq!(stats.artists, 1);
        assert_eq!(stats.folders, 2);
        assert!(catalog.find::<Artist>("ArtistA").unwrap().is_none());
        assert!(catalog.find::<Artist>("ArtistB").unwrap().is_some());
        assert_eq!(catalog.count::<Album>().unwrap(), 1);
        assert_eq!(catalog.count::<Folder>().unwrap(), 3);
    }

    #[test]
    fn songs_outside_the_base_are_removed() {
        let (_dir, root, catalog) = seeded();
        let cancel = AtomicBool::new(false);
        Scanner::new(&catalog, &StubReader, &cancel).run(&root).unwrap();

        let narrowed = root.join("ArtistB");
        let stats = collect_orphans(&catalog, &narrowed, None, &cancel).unwrap();
        assert_eq!(stats.songs, 1);
        assert_eq!(catalog.count::<Song>().unwrap(), 1);
        assert!(catalog.find::<Artist>("ArtistA").unwrap().is_none());
    }

    #[test]
    fn unchanged_tree_loses_nothing() {
        let (_dir, root, catalog) = seeded();
        let cancel = AtomicBool::new(false);
        Scanner::new(&catalog, &StubReader, &cancel).run(&root).unwrap();
        let before = catalog.counts().unwrap();

        let stats = collect_orphans(&catalog, &root, Some(&root.join("ArtistA")), &cancel).unwrap();
        assert_eq!(stats, OrphanStats { elapsed_ms: stats.elapsed_ms, ..OrphanStats::default() });
        assert_eq!(catalog.counts().unwrap(), before);
    }

    #[test]
    fn cancellation_is_checked_between_songs() {
        let (_dir, root, catalog) = seeded();
        let running = AtomicBool::new(false);
        Scanner::new(&catalog, &StubReader, &running).run(&root).unwrap();

        let cancelled = AtomicBool::new(true);
        let result = collect_orphans(&catalog, &root, None, &cancelled);
        assert!(matches!(result, Err(ScanError::Cancelled)));
        assert_eq!(catalog.count::<Song>().unwrap(), 2);
    }
}
