pub mod catalog;
pub mod orphans;
pub mod scanner;

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::Mutex;

pub use catalog::{album_key, txn, Catalog, CatalogCounts, CatalogError, Link, Record};
pub use orphans::{collect_orphans, OrphanStats};
pub use scanner::{
    find_cover, walk, LoftyReader, ScanError, ScanOptions, ScanStats, Scanner, TagReader,
    WalkEvent,
};

/// The media root together with its catalog. Scans and orphan passes share
/// one writer lock so they never interleave.
#[derive(Clone)]
pub struct Library {
    root: PathBuf,
    catalog: Catalog,
    reader: Arc<dyn TagReader>,
    writer: Arc<Mutex<()>>,
}

impl Library {
    pub fn open(root: PathBuf, db_path: &Path) -> Result<Self, CatalogError> {
        let catalog = Catalog::open(db_path)?;
        Ok(Self::with_reader(root, catalog, Arc::new(LoftyReader)))
    }

    pub fn with_reader(root: PathBuf, catalog: Catalog, reader: Arc<dyn TagReader>) -> Self {
        let root = std::fs::canonicalize(&root).unwrap_or(root);
        Self {
            root,
            catalog,
            reader,
            writer: Arc::new(Mutex::new(())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn scan(&self, options: ScanOptions, cancel: &AtomicBool) -> Result<ScanStats, ScanError> {
        let _guard = self.writer.lock();
        Scanner::new(&self.catalog, self.reader.as_ref(), cancel)
            .with_options(options)
            .run(&self.root)
    }

    /// Orphan pass over the whole root, or only `sub` for missing files.
    pub fn collect_orphans(
        &self,
        sub: Option<&Path>,
        cancel: &AtomicBool,
    ) -> Result<OrphanStats, ScanError> {
        let _guard = self.writer.lock();
        collect_orphans(&self.catalog, &self.root, sub, cancel)
    }

    /// True while a scan or orphan pass holds the writer lock.
    pub fn is_busy(&self) -> bool {
        self.writer.is_locked()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use common::{Artist, Song};

    use super::*;
    use crate::scanner::tests::{seeded, StubReader};

    #[test]
    fn library_scans_then_collects() {
        let (dir, root, catalog) = seeded();
        let library = Library::with_reader(root.clone(), catalog, Arc::new(StubReader));
        let cancel = AtomicBool::new(false);

        let stats = library.scan(ScanOptions::default(), &cancel).unwrap();
        assert_eq!(stats.songs_added, 2);
        assert!(!library.is_busy());

        fs::remove_dir_all(root.join("ArtistB")).unwrap();
        let orphans = library.collect_orphans(None, &cancel).unwrap();
        assert_eq!(orphans.songs, 1);
        assert_eq!(library.catalog().count::<Song>().unwrap(), 1);
        assert!(library.catalog().find::<Artist>("ArtistB").unwrap().is_none());
        drop(dir);
    }
}
