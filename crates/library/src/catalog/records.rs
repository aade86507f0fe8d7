use common::{Album, Art, Artist, Folder, Session, Song, User};
use redb::{TableDefinition, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{txn, CatalogError};

const KEY_SEP: char = '\x1f';

pub(crate) const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

const FOLDERS: TableDefinition<u64, &[u8]> = TableDefinition::new("folders");
const FOLDERS_BY_PATH: TableDefinition<&str, u64> = TableDefinition::new("folders_by_path");
const ARTISTS: TableDefinition<u64, &[u8]> = TableDefinition::new("artists");
const ARTISTS_BY_TITLE: TableDefinition<&str, u64> = TableDefinition::new("artists_by_title");
const ALBUMS: TableDefinition<u64, &[u8]> = TableDefinition::new("albums");
const ALBUMS_BY_ARTIST_TITLE: TableDefinition<&str, u64> =
    TableDefinition::new("albums_by_artist_title");
const SONGS: TableDefinition<u64, &[u8]> = TableDefinition::new("songs");
const SONGS_BY_FILE: TableDefinition<&str, u64> = TableDefinition::new("songs_by_file");
const ARTS: TableDefinition<u64, &[u8]> = TableDefinition::new("art");
const ARTS_BY_FILE: TableDefinition<&str, u64> = TableDefinition::new("art_by_file");
const USERS: TableDefinition<u64, &[u8]> = TableDefinition::new("users");
const USERS_BY_NAME: TableDefinition<&str, u64> = TableDefinition::new("users_by_name");
const SESSIONS: TableDefinition<u64, &[u8]> = TableDefinition::new("sessions");
const SESSIONS_BY_KEY: TableDefinition<&str, u64> = TableDefinition::new("sessions_by_key");

const ALBUM_SONGS: TableDefinition<(u64, u64), ()> = TableDefinition::new("album_songs");
const ARTIST_SONGS: TableDefinition<(u64, u64), ()> = TableDefinition::new("artist_songs");
const FOLDER_SONGS: TableDefinition<(u64, u64), ()> = TableDefinition::new("folder_songs");
const ART_SONGS: TableDefinition<(u64, u64), ()> = TableDefinition::new("art_songs");
const ARTIST_ALBUMS: TableDefinition<(u64, u64), ()> = TableDefinition::new("artist_albums");
const FOLDER_CHILDREN: TableDefinition<(u64, u64), ()> = TableDefinition::new("folder_children");
const USER_SESSIONS: TableDefinition<(u64, u64), ()> = TableDefinition::new("user_sessions");

/// A parent-to-child relation, stored as `(parent_id, child_id)` keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Link {
    AlbumSongs,
    ArtistSongs,
    FolderSongs,
    ArtSongs,
    ArtistAlbums,
    FolderChildren,
    UserSessions,
}

impl Link {
    pub const ALL: [Link; 7] = [
        Link::AlbumSongs,
        Link::ArtistSongs,
        Link::FolderSongs,
        Link::ArtSongs,
        Link::ArtistAlbums,
        Link::FolderChildren,
        Link::UserSessions,
    ];

    pub(crate) fn table(self) -> TableDefinition<'static, (u64, u64), ()> {
        match self {
            Link::AlbumSongs => ALBUM_SONGS,
            Link::ArtistSongs => ARTIST_SONGS,
            Link::FolderSongs => FOLDER_SONGS,
            Link::ArtSongs => ART_SONGS,
            Link::ArtistAlbums => ARTIST_ALBUMS,
            Link::FolderChildren => FOLDER_CHILDREN,
            Link::UserSessions => USER_SESSIONS,
        }
    }

    /// Kind name and row table of the parent side.
    pub(crate) fn parent(self) -> (&'static str, TableDefinition<'static, u64, &'static [u8]>) {
        match self {
            Link::AlbumSongs => (Album::NAME, ALBUMS),
            Link::ArtistSongs | Link::ArtistAlbums => (Artist::NAME, ARTISTS),
            Link::FolderSongs | Link::FolderChildren => (Folder::NAME, FOLDERS),
            Link::ArtSongs => (Art::NAME, ARTS),
            Link::UserSessions => (User::NAME, USERS),
        }
    }

    pub(crate) fn children(self) -> &'static str {
        match self {
            Link::AlbumSongs | Link::ArtistSongs | Link::FolderSongs | Link::ArtSongs => "songs",
            Link::ArtistAlbums => "albums",
            Link::FolderChildren => "subfolders",
            Link::UserSessions => "sessions",
        }
    }
}

/// Storage layout of one entity kind: a row table keyed by id, a unique
/// natural-key index and the links binding it to its parents.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + 'static {
    const NAME: &'static str;
    const ROWS: TableDefinition<'static, u64, &'static [u8]>;
    const KEYS: TableDefinition<'static, &'static str, u64>;
    /// Links in which this kind is the parent. A row is only deleted once
    /// all of them are empty.
    const CHILDREN: &'static [Link] = &[];

    fn id(&self) -> u64;
    fn set_id(&mut self, id: u64);
    fn natural_key(&self) -> String;

    fn links(&self) -> Vec<(Link, u64)> {
        Vec::new()
    }

    /// `needle` is already lowercased.
    fn matches(&self, _needle: &str) -> bool {
        false
    }

    /// Runs before the row is removed, inside the same transaction.
    fn cascade(&self, _tx: &WriteTransaction) -> Result<(), CatalogError> {
        Ok(())
    }
}

fn contains_folded(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}

pub fn album_key(artist_id: u64, title: &str) -> String {
    format!("{}{}{}", artist_id, KEY_SEP, title)
}

impl Record for Folder {
    const NAME: &'static str = "folder";
    const ROWS: TableDefinition<'static, u64, &'static [u8]> = FOLDERS;
    const KEYS: TableDefinition<'static, &'static str, u64> = FOLDERS_BY_PATH;
    const CHILDREN: &'static [Link] = &[Link::FolderChildren, Link::FolderSongs];

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn natural_key(&self) -> String {
        self.path.clone()
    }

    fn links(&self) -> Vec<(Link, u64)> {
        self.parent_id
            .map(|parent| vec![(Link::FolderChildren, parent)])
            .unwrap_or_default()
    }

    fn matches(&self, needle: &str) -> bool {
        contains_folded(&self.title, needle)
    }
}

impl Record for Artist {
    const NAME: &'static str = "artist";
    const ROWS: TableDefinition<'static, u64, &'static [u8]> = ARTISTS;
    const KEYS: TableDefinition<'static, &'static str, u64> = ARTISTS_BY_TITLE;
    const CHILDREN: &'static [Link] = &[Link::ArtistAlbums, Link::ArtistSongs];

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn natural_key(&self) -> String {
        self.title.clone()
    }

    fn matches(&self, needle: &str) -> bool {
        contains_folded(&self.title, needle)
    }
}

impl Record for Album {
    const NAME: &'static str = "album";
    const ROWS: TableDefinition<'static, u64, &'static [u8]> = ALBUMS;
    const KEYS: TableDefinition<'static, &'static str, u64> = ALBUMS_BY_ARTIST_TITLE;
    const CHILDREN: &'static [Link] = &[Link::AlbumSongs];

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn natural_key(&self) -> String {
        album_key(self.artist_id, &self.title)
    }

    fn links(&self) -> Vec<(Link, u64)> {
        vec![(Link::ArtistAlbums, self.artist_id)]
    }

    fn matches(&self, needle: &str) -> bool {
        contains_folded(&self.title, needle)
    }
}

impl Record for Song {
    const NAME: &'static str = "song";
    const ROWS: TableDefinition<'static, u64, &'static [u8]> = SONGS;
    const KEYS: TableDefinition<'static, &'static str, u64> = SONGS_BY_FILE;

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn natural_key(&self) -> String {
        self.file_name.clone()
    }

    fn links(&self) -> Vec<(Link, u64)> {
        let mut links = vec![
            (Link::AlbumSongs, self.album_id),
            (Link::ArtistSongs, self.artist_id),
            (Link::FolderSongs, self.folder_id),
        ];
        if let Some(art_id) = self.art_id {
            links.push((Link::ArtSongs, art_id));
        }
        links
    }

    fn matches(&self, needle: &str) -> bool {
        contains_folded(&self.title, needle)
    }
}

impl Record for Art {
    const NAME: &'static str = "art";
    const ROWS: TableDefinition<'static, u64, &'static [u8]> = ARTS;
    const KEYS: TableDefinition<'static, &'static str, u64> = ARTS_BY_FILE;
    const CHILDREN: &'static [Link] = &[Link::ArtSongs];

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn natural_key(&self) -> String {
        self.file_name.clone()
    }
}

impl Record for User {
    const NAME: &'static str = "user";
    const ROWS: TableDefinition<'static, u64, &'static [u8]> = USERS;
    const KEYS: TableDefinition<'static, &'static str, u64> = USERS_BY_NAME;
    const CHILDREN: &'static [Link] = &[Link::UserSessions];

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn natural_key(&self) -> String {
        self.username.clone()
    }

    fn matches(&self, needle: &str) -> bool {
        contains_folded(&self.username, needle)
    }

    fn cascade(&self, tx: &WriteTransaction) -> Result<(), CatalogError> {
        for session_id in txn::child_ids(tx, Link::UserSessions, self.id)? {
            let session = Session {
                id: session_id,
                ..Session::default()
            };
            txn::delete(tx, &session)?;
        }
        Ok(())
    }
}

impl Record for Session {
    const NAME: &'static str = "session";
    const ROWS: TableDefinition<'static, u64, &'static [u8]> = SESSIONS;
    const KEYS: TableDefinition<'static, &'static str, u64> = SESSIONS_BY_KEY;

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn natural_key(&self) -> String {
        self.key.clone()
    }

    fn links(&self) -> Vec<(Link, u64)> {
        vec![(Link::UserSessions, self.user_id)]
    }
}

/// Creates every table so read transactions never see a missing one.
pub(crate) fn create_tables(tx: &WriteTransaction) -> Result<(), CatalogError> {
    tx.open_table(SEQUENCES)?;
    open_entity::<Folder>(tx)?;
    open_entity::<Artist>(tx)?;
    open_entity::<Album>(tx)?;
    open_entity::<Song>(tx)?;
    open_entity::<Art>(tx)?;
    open_entity::<User>(tx)?;
    open_entity::<Session>(tx)?;
    for link in Link::ALL {
        tx.open_table(link.table())?;
    }
    Ok(())
}

fn open_entity<T: Record>(tx: &WriteTransaction) -> Result<(), CatalogError> {
    tx.open_table(T::ROWS)?;
    tx.open_table(T::KEYS)?;
    Ok(())
}
