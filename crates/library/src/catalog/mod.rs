mod records;
pub mod txn;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use common::{Album, Art, Artist, Folder, Session, Song, User};
use rand::seq::SliceRandom;
use redb::{
    CommitError, Database, DatabaseError, Durability, ReadableTable, StorageError, TableError,
    TransactionError, WriteTransaction,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub use records::{album_key, Link, Record};

#[derive(Debug)]
pub enum CatalogError {
    NotFound(String),
    Conflict(String),
    /// A link to a missing parent, or a delete of a row that still has children.
    Constraint(String),
    Storage(redb::Error),
    Codec(Box<bincode::ErrorKind>),
    Io(std::io::Error),
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogError::NotFound(what) => write!(f, "{} not found", what),
            CatalogError::Conflict(what) => write!(f, "{} already exists", what),
            CatalogError::Constraint(what) => write!(f, "constraint violated: {}", what),
            CatalogError::Storage(err) => write!(f, "db error: {}", err),
            CatalogError::Codec(err) => write!(f, "bincode error: {}", err),
            CatalogError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for CatalogError {}

impl From<std::io::Error> for CatalogError {
    fn from(err: std::io::Error) -> Self {
        CatalogError::Io(err)
    }
}

impl From<redb::Error> for CatalogError {
    fn from(err: redb::Error) -> Self {
        CatalogError::Storage(err)
    }
}

impl From<DatabaseError> for CatalogError {
    fn from(err: DatabaseError) -> Self {
        CatalogError::Storage(err.into())
    }
}

impl From<TableError> for CatalogError {
    fn from(err: TableError) -> Self {
        CatalogError::Storage(err.into())
    }
}

impl From<TransactionError> for CatalogError {
    fn from(err: TransactionError) -> Self {
        CatalogError::Storage(err.into())
    }
}

impl From<StorageError> for CatalogError {
    fn from(err: StorageError) -> Self {
        CatalogError::Storage(err.into())
    }
}

impl From<CommitError> for CatalogError {
    fn from(err: CommitError) -> Self {
        CatalogError::Storage(err.into())
    }
}

impl From<Box<bincode::ErrorKind>> for CatalogError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        CatalogError::Codec(err)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogCounts {
    pub folders: u64,
    pub artists: u64,
    pub albums: u64,
    pub songs: u64,
    pub arts: u64,
    pub users: u64,
    pub sessions: u64,
}

/// Typed access to the library database. Cloning shares the handle.
#[derive(Clone)]
pub struct Catalog {
    db: Arc<Database>,
}

impl Catalog {
    pub fn open(path: &Path) -> Result<Self, CatalogError> {
        let db = open_or_create_db(path)?;
        let catalog = Self { db: Arc::new(db) };
        catalog.with_tx(|tx| records::create_tables(tx))?;
        Ok(catalog)
    }

    /// Runs `f` in one durable write transaction: committed on `Ok`,
    /// aborted on `Err`.
    pub fn with_tx<R, E>(&self, f: impl FnOnce(&WriteTransaction) -> Result<R, E>) -> Result<R, E>
    where
        E: From<CatalogError>,
    {
        self.with_durability(Durability::Immediate, f)
    }

    /// Same as [`Catalog::with_tx`] without waiting for fsync. The next
    /// durable commit persists the work.
    pub fn with_fast_tx<R, E>(
        &self,
        f: impl FnOnce(&WriteTransaction) -> Result<R, E>,
    ) -> Result<R, E>
    where
        E: From<CatalogError>,
    {
        self.with_durability(Durability::None, f)
    }

    /// Durable empty commit, flushing earlier fast transactions.
    pub fn flush(&self) -> Result<(), CatalogError> {
        self.with_tx(|_| Ok(()))
    }

    fn with_durability<R, E>(
        &self,
        durability: Durability,
        f: impl FnOnce(&WriteTransaction) -> Result<R, E>,
    ) -> Result<R, E>
    where
        E: From<CatalogError>,
    {
        let mut tx = self.db.begin_write().map_err(CatalogError::from)?;
        tx.set_durability(durability);
        match f(&tx) {
            Ok(value) => {
                tx.commit().map_err(CatalogError::from)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(abort_err) = tx.abort() {
                    warn!("catalog: abort failed: {}", abort_err);
                }
                Err(err)
            }
        }
    }

    pub fn load<T: Record>(&self, id: u64) -> Result<T, CatalogError> {
        let read_txn = self.db.begin_read()?;
        let rows = read_txn.open_table(T::ROWS)?;
        let record = match rows.get(id)? {
            Some(value) => decode_value(value.value())?,
            None => return Err(CatalogError::NotFound(format!("{} {}", T::NAME, id))),
        };
        Ok(record)
    }

    pub fn find<T: Record>(&self, key: &str) -> Result<Option<T>, CatalogError> {
        let read_txn = self.db.begin_read()?;
        let keys = read_txn.open_table(T::KEYS)?;
        let rows = read_txn.open_table(T::ROWS)?;
        let id = keys.get(key)?.map(|value| value.value());
        let record = match id {
            Some(id) => match rows.get(id)? {
                Some(value) => Some(decode_value(value.value())?),
                None => None,
            },
            None => None,
        };
        Ok(record)
    }

    /// Fills a partial record populated with either its id or its natural key.
    pub fn load_by_key<T: Record>(&self, wanted: &T) -> Result<T, CatalogError> {
        if wanted.id() != 0 {
            return self.load(wanted.id());
        }
        let key = wanted.natural_key();
        self.find(&key)?
            .ok_or_else(|| CatalogError::NotFound(format!("{} {}", T::NAME, key)))
    }

    pub fn all<T: Record>(&self) -> Result<Vec<T>, CatalogError> {
        self.scan_rows(|_| true)
    }

    /// Children of `parent` through `link`, in id order.
    pub fn all_by<T: Record>(&self, link: Link, parent: u64) -> Result<Vec<T>, CatalogError> {
        let read_txn = self.db.begin_read()?;
        let links = read_txn.open_table(link.table())?;
        let rows = read_txn.open_table(T::ROWS)?;
        let mut items = Vec::new();
        for entry in links.range((parent, 0)..=(parent, u64::MAX))? {
            let (key, _) = entry?;
            if let Some(value) = rows.get(key.value().1)? {
                items.push(decode_value(value.value())?);
            }
        }
        Ok(items)
    }

    pub fn count_by(&self, link: Link, parent: u64) -> Result<usize, CatalogError> {
        let read_txn = self.db.begin_read()?;
        let links = read_txn.open_table(link.table())?;
        let mut count = 0;
        for entry in links.range((parent, 0)..=(parent, u64::MAX))? {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    /// Case-insensitive substring match over the record's title-like fields.
    pub fn search<T: Record>(&self, query: &str) -> Result<Vec<T>, CatalogError> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        self.scan_rows(|record: &T| record.matches(&needle))
    }

    pub fn limit<T: Record>(&self, offset: usize, count: usize) -> Result<Vec<T>, CatalogError> {
        let read_txn = self.db.begin_read()?;
        let rows = read_txn.open_table(T::ROWS)?;
        let mut items = Vec::new();
        for entry in rows.iter()?.skip(offset).take(count) {
            let (_, value) = entry?;
            items.push(decode_value(value.value())?);
        }
        Ok(items)
    }

    pub fn random<T: Record>(&self, count: usize) -> Result<Vec<T>, CatalogError> {
        let read_txn = self.db.begin_read()?;
        let rows = read_txn.open_table(T::ROWS)?;
        let mut ids = Vec::new();
        for entry in rows.iter()? {
            let (key, _) = entry?;
            ids.push(key.value());
        }
        ids.shuffle(&mut rand::rng());
        ids.truncate(count);

        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(value) = rows.get(id)? {
                items.push(decode_value(value.value())?);
            }
        }
        Ok(items)
    }

    pub fn count<T: Record>(&self) -> Result<u64, CatalogError> {
        let read_txn = self.db.begin_read()?;
        let rows = read_txn.open_table(T::ROWS)?;
        Ok(rows.len()?)
    }

    pub fn counts(&self) -> Result<CatalogCounts, CatalogError> {
        Ok(CatalogCounts {
            folders: self.count::<Folder>()?,
            artists: self.count::<Artist>()?,
            albums: self.count::<Album>()?,
            songs: self.count::<Song>()?,
            arts: self.count::<Art>()?,
            users: self.count::<User>()?,
            sessions: self.count::<Session>()?,
        })
    }

    /// Inserts `record` and returns it with its generated id.
    pub fn save<T: Record>(&self, record: &T) -> Result<T, CatalogError> {
        let mut record = record.clone();
        self.with_tx(|tx| txn::insert(tx, &mut record))?;
        Ok(record)
    }

    pub fn update<T: Record>(&self, record: &T) -> Result<(), CatalogError> {
        self.with_tx(|tx| txn::update(tx, record))
    }

    pub fn delete<T: Record>(&self, wanted: &T) -> Result<T, CatalogError> {
        self.with_tx(|tx| txn::delete(tx, wanted))
    }

    /// Songs whose `fileName` starts with `prefix`.
    pub fn songs_in_path(&self, prefix: &str) -> Result<Vec<Song>, CatalogError> {
        self.songs_by_path(prefix, true)
    }

    pub fn songs_not_in_path(&self, prefix: &str) -> Result<Vec<Song>, CatalogError> {
        self.songs_by_path(prefix, false)
    }

    fn songs_by_path(&self, prefix: &str, inside: bool) -> Result<Vec<Song>, CatalogError> {
        let read_txn = self.db.begin_read()?;
        let keys = read_txn.open_table(<Song as Record>::KEYS)?;
        let rows = read_txn.open_table(<Song as Record>::ROWS)?;
        let mut ids = Vec::new();
        if inside {
            for entry in keys.range(prefix..)? {
                let (key, value) = entry?;
                if !key.value().starts_with(prefix) {
                    break;
                }
                ids.push(value.value());
            }
        } else {
            for entry in keys.iter()? {
                let (key, value) = entry?;
                if !key.value().starts_with(prefix) {
                    ids.push(value.value());
                }
            }
        }

        let mut songs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(value) = rows.get(id)? {
                songs.push(decode_value(value.value())?);
            }
        }
        Ok(songs)
    }

    /// Deletes albums without songs. Returns the number removed.
    pub fn purge_orphan_albums(&self) -> Result<usize, CatalogError> {
        self.purge::<Album>(|tx, id| Ok(!txn::has_children(tx, Link::AlbumSongs, id)?))
    }

    /// Deletes artists with neither albums nor songs.
    pub fn purge_orphan_artists(&self) -> Result<usize, CatalogError> {
        self.purge::<Artist>(|tx, id| {
            Ok(!txn::has_children(tx, Link::ArtistAlbums, id)?
                && !txn::has_children(tx, Link::ArtistSongs, id)?)
        })
    }

    /// Deletes folders with neither songs nor child folders, repeating until
    /// emptied parents are gone too.
    pub fn purge_orphan_folders(&self) -> Result<usize, CatalogError> {
        self.with_fast_tx(|tx| {
            let mut total = 0;
            loop {
                let removed = purge_in::<Folder>(tx, |tx, id| {
                    Ok(!txn::has_children(tx, Link::FolderSongs, id)?
                        && !txn::has_children(tx, Link::FolderChildren, id)?)
                })?;
                if removed == 0 {
                    break;
                }
                total += removed;
            }
            Ok(total)
        })
    }

    pub fn purge_orphan_arts(&self) -> Result<usize, CatalogError> {
        self.purge::<Art>(|tx, id| Ok(!txn::has_children(tx, Link::ArtSongs, id)?))
    }

    fn purge<T: Record>(
        &self,
        orphaned: impl Fn(&WriteTransaction, u64) -> Result<bool, CatalogError>,
    ) -> Result<usize, CatalogError> {
        self.with_fast_tx(|tx| purge_in::<T>(tx, orphaned))
    }

    fn scan_rows<T: Record>(&self, keep: impl Fn(&T) -> bool) -> Result<Vec<T>, CatalogError> {
        let read_txn = self.db.begin_read()?;
        let rows = read_txn.open_table(T::ROWS)?;
        let mut items = Vec::new();
        for entry in rows.iter()? {
            let (_, value) = entry?;
            let record: T = decode_value(value.value())?;
            if keep(&record) {
                items.push(record);
            }
        }
        Ok(items)
    }
}

fn purge_in<T: Record>(
    tx: &WriteTransaction,
    orphaned: impl Fn(&WriteTransaction, u64) -> Result<bool, CatalogError>,
) -> Result<usize, CatalogError> {
    let mut doomed = Vec::new();
    for id in txn::ids::<T>(tx)? {
        if orphaned(tx, id)? {
            doomed.push(id);
        }
    }
    for id in &doomed {
        let record: T = txn::load(tx, *id)?;
        txn::delete(tx, &record)?;
    }
    Ok(doomed.len())
}

fn open_or_create_db(path: &Path) -> Result<Database, CatalogError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    if path.exists() {
        Ok(Database::open(path)?)
    } else {
        Ok(Database::create(path)?)
    }
}

fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, CatalogError> {
    Ok(bincode::serialize(value)?)
}

fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, CatalogError> {
    Ok(bincode::deserialize(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, Catalog) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(&dir.path().join("library.redb")).unwrap();
        (dir, catalog)
    }

    fn artist(title: &str) -> Artist {
        Artist {
            id: 0,
            title: title.to_string(),
        }
    }

    fn song(file_name: &str, album_id: u64, artist_id: u64, folder_id: u64) -> Song {
        Song {
            file_name: file_name.to_string(),
            title: "Song".to_string(),
            artist: "Artist".to_string(),
            album_id,
            artist_id,
            folder_id,
            bitrate: 320,
            channels: 2,
            length: 200,
            sample_rate: 44100,
            ..Song::default()
        }
    }

    #[test]
    fn save_assigns_ids_and_rejects_duplicates() {
        let (_dir, catalog) = open_temp();
        let first = catalog.save(&artist("Boards of Canada")).unwrap();
        let second = catalog.save(&artist("Autechre")).unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);

        let err = catalog.save(&artist("Autechre")).unwrap_err();
        assert!(matches!(err, CatalogError::Conflict(_)));
        assert_eq!(catalog.count::<Artist>().unwrap(), 2);
    }

    #[test]
    fn load_by_key_fills_from_id_or_natural_key() {
        let (_dir, catalog) = open_temp();
        let saved = catalog.save(&artist("Plaid")).unwrap();

        let by_key = catalog.load_by_key(&artist("Plaid")).unwrap();
        assert_eq!(by_key, saved);

        let by_id = catalog
            .load_by_key(&Artist {
                id: saved.id,
                title: String::new(),
            })
            .unwrap();
        assert_eq!(by_id.title, "Plaid");

        let missing = catalog.load_by_key(&artist("Nobody")).unwrap_err();
        assert!(matches!(missing, CatalogError::NotFound(_)));
    }

    #[test]
    fn update_moves_natural_key_and_links() {
        let (_dir, catalog) = open_temp();
        let a = catalog.save(&artist("A")).unwrap();
        let b = catalog.save(&artist("B")).unwrap();
        let mut album = catalog
            .save(&Album {
                artist: "A".to_string(),
                artist_id: a.id,
                title: "First".to_string(),
                ..Album::default()
            })
            .unwrap();

        album.artist_id = b.id;
        album.title = "Renamed".to_string();
        catalog.update(&album).unwrap();

        assert!(catalog.find::<Album>(&album_key(a.id, "First")).unwrap().is_none());
        assert!(catalog.find::<Album>(&album_key(b.id, "Renamed")).unwrap().is_some());
        assert!(catalog.all_by::<Album>(Link::ArtistAlbums, a.id).unwrap().is_empty());
        assert_eq!(catalog.all_by::<Album>(Link::ArtistAlbums, b.id).unwrap().len(), 1);
    }

    #[test]
    fn deleting_a_user_cascades_to_sessions() {
        let (_dir, catalog) = open_temp();
        let user = catalog
            .save(&User {
                username: "root".to_string(),
                password_hash: "hash".to_string(),
                role_id: 2,
                ..User::default()
            })
            .unwrap();
        for key in ["k1", "k2"] {
            catalog
                .save(&Session {
                    user_id: user.id,
                    key: key.to_string(),
                    expire: 10,
                    ..Session::default()
                })
                .unwrap();
        }
        assert_eq!(catalog.count_by(Link::UserSessions, user.id).unwrap(), 2);

        catalog
            .delete(&User {
                username: "root".to_string(),
                ..User::default()
            })
            .unwrap();
        assert_eq!(catalog.count::<Session>().unwrap(), 0);
        assert!(catalog.find::<Session>("k1").unwrap().is_none());
    }

    #[test]
    fn failed_transaction_leaves_no_trace() {
        let (_dir, catalog) = open_temp();
        let result: Result<(), CatalogError> = catalog.with_tx(|tx| {
            txn::insert(tx, &mut artist("Ghost"))?;
            Err(CatalogError::Conflict("forced".to_string()))
        });
        assert!(result.is_err());
        assert!(catalog.find::<Artist>("Ghost").unwrap().is_none());
    }

    #[test]
    fn search_is_case_insensitive() {
        let (_dir, catalog) = open_temp();
        catalog.save(&artist("Aphex Twin")).unwrap();
        catalog.save(&artist("Squarepusher")).unwrap();

        let found = catalog.search::<Artist>("TWIN").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "Aphex Twin");
        assert!(catalog.search::<Artist>("  ").unwrap().is_empty());
    }

    #[test]
    fn limit_and_random_bound_their_results() {
        let (_dir, catalog) = open_temp();
        for idx in 0..5 {
            catalog.save(&artist(&format!("artist {}", idx))).unwrap();
        }
        let page = catalog.limit::<Artist>(1, 2).unwrap();
        assert_eq!(page.iter().map(|a| a.id).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(catalog.random::<Artist>(3).unwrap().len(), 3);
        assert_eq!(catalog.random::<Artist>(50).unwrap().len(), 5);
    }

    /// An artist, one of its albums and a root folder: `(album, artist, folder)` ids.
    fn parents(catalog: &Catalog) -> (u64, u64, u64) {
        let artist = catalog.save(&artist("Artist")).unwrap();
        let album = catalog
            .save(&Album {
                artist_id: artist.id,
                title: "Album".to_string(),
                ..Album::default()
            })
            .unwrap();
        let folder = catalog
            .save(&Folder::from_path(Path::new("/music"), None))
            .unwrap();
        (album.id, artist.id, folder.id)
    }

    #[test]
    fn songs_are_split_by_path_prefix() {
        let (_dir, catalog) = open_temp();
        let (album, artist, folder) = parents(&catalog);
        catalog.save(&song("/music/a/1.mp3", album, artist, folder)).unwrap();
        catalog.save(&song("/music/b/2.mp3", album, artist, folder)).unwrap();
        catalog.save(&song("/other/3.mp3", album, artist, folder)).unwrap();

        let inside = catalog.songs_in_path("/music/").unwrap();
        assert_eq!(inside.len(), 2);
        let outside = catalog.songs_not_in_path("/music/").unwrap();
        assert_eq!(outside.len(), 1);
        assert_eq!(outside[0].file_name, "/other/3.mp3");
    }

    #[test]
    fn purges_remove_only_unreferenced_rows() {
        let (_dir, catalog) = open_temp();
        let root = catalog
            .save(&Folder::from_path(Path::new("/music"), None))
            .unwrap();
        let used = catalog
            .save(&Folder::from_path(Path::new("/music/used"), Some(root.id)))
            .unwrap();
        let empty = catalog
            .save(&Folder::from_path(Path::new("/music/empty"), Some(root.id)))
            .unwrap();
        catalog
            .save(&Folder::from_path(Path::new("/music/empty/deeper"), Some(empty.id)))
            .unwrap();

        let kept = catalog.save(&artist("Kept")).unwrap();
        let lonely = catalog.save(&artist("Lonely")).unwrap();
        let album = catalog
            .save(&Album {
                artist_id: kept.id,
                title: "Album".to_string(),
                ..Album::default()
            })
            .unwrap();
        catalog
            .save(&Album {
                artist_id: lonely.id,
                title: "Unused".to_string(),
                ..Album::default()
            })
            .unwrap();
        catalog
            .save(&song("/music/used/1.mp3", album.id, kept.id, used.id))
            .unwrap();

        assert_eq!(catalog.purge_orphan_albums().unwrap(), 1);
        assert_eq!(catalog.purge_orphan_artists().unwrap(), 1);
        assert_eq!(catalog.purge_orphan_folders().unwrap(), 2);
        assert_eq!(catalog.purge_orphan_arts().unwrap(), 0);

        let counts = catalog.counts().unwrap();
        assert_eq!(counts.albums, 1);
        assert_eq!(counts.artists, 1);
        assert_eq!(counts.folders, 2);
        assert!(catalog.find::<Artist>("Lonely").unwrap().is_none());
    }

    #[test]
    fn links_to_missing_parents_are_rejected() {
        let (_dir, catalog) = open_temp();
        let err = catalog.save(&song("/music/1.mp3", 999, 998, 997)).unwrap_err();
        assert!(matches!(err, CatalogError::Constraint(_)));
        let err = catalog
            .save(&Album {
                artist_id: 12345,
                title: "Nowhere".to_string(),
                ..Album::default()
            })
            .unwrap_err();
        assert!(matches!(err, CatalogError::Constraint(_)));
        let err = catalog
            .save(&Session {
                user_id: 4242,
                key: "k".to_string(),
                ..Session::default()
            })
            .unwrap_err();
        assert!(matches!(err, CatalogError::Constraint(_)));
        let err = catalog
            .save(&Folder::from_path(Path::new("/music/sub"), Some(77)))
            .unwrap_err();
        assert!(matches!(err, CatalogError::Constraint(_)));

        let counts = catalog.counts().unwrap();
        assert_eq!(counts, CatalogCounts::default());
    }

    #[test]
    fn update_cannot_point_at_a_missing_parent() {
        let (_dir, catalog) = open_temp();
        let (album, artist, folder) = parents(&catalog);
        let mut saved = catalog.save(&song("/music/1.mp3", album, artist, folder)).unwrap();
        saved.album_id = 555;
        let err = catalog.update(&saved).unwrap_err();
        assert!(matches!(err, CatalogError::Constraint(_)));
        let stored: Song = catalog.load(saved.id).unwrap();
        assert_eq!(stored.album_id, album);
    }

    #[test]
    fn parents_with_children_cannot_be_deleted() {
        let (_dir, catalog) = open_temp();
        let (album, artist, folder) = parents(&catalog);
        let saved = catalog.save(&song("/music/1.mp3", album, artist, folder)).unwrap();

        let err = catalog.delete(&Artist { id: artist, title: String::new() }).unwrap_err();
        assert!(matches!(err, CatalogError::Constraint(_)));
        let err = catalog.delete(&Album { id: album, ..Album::default() }).unwrap_err();
        assert!(matches!(err, CatalogError::Constraint(_)));
        let err = catalog.delete(&Folder { id: folder, ..Folder::default() }).unwrap_err();
        assert!(matches!(err, CatalogError::Constraint(_)));
        assert!(catalog.load::<Artist>(artist).is_ok());

        catalog.delete(&saved).unwrap();
        catalog.delete(&Album { id: album, ..Album::default() }).unwrap();
        catalog.delete(&Artist { id: artist, title: String::new() }).unwrap();
        catalog.delete(&Folder { id: folder, ..Folder::default() }).unwrap();
        assert_eq!(catalog.counts().unwrap(), CatalogCounts::default());
    }
}
