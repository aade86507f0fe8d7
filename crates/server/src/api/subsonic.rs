//! Emulation of the Subsonic REST protocol (1.8.0) over the catalog.
//!
//! Every reply, failures included, is an XML `subsonic-response` sent with
//! HTTP 200. Identifiers for the folder/artist/album tree use `prefix_id`.

use std::collections::{BTreeMap, HashMap};

use axum::{
    body::Body,
    extract::{Path as AxumPath, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use common::{iso_timestamp, now_unix, Album, Artist, FileType, Folder, Song};
use library::{Catalog, CatalogError, Link};
use tracing::warn;

use crate::state::AppState;
use crate::utils::escape_xml;

use super::media::{load_song, serve_song};

pub const XMLNS: &str = "http://subsonic.org/restapi";
pub const VERSION: &str = "1.8.0";

pub const ERR_GENERIC: u16 = 0;
pub const ERR_MISSING_PARAMETER: u16 = 10;
pub const ERR_BAD_CREDENTIALS: u16 = 40;

const DEFAULT_LIST_SIZE: usize = 10;

/// A minimal XML element: attributes and nested children, no text nodes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Element {
    name: &'static str,
    attrs: Vec<(&'static str, String)>,
    children: Vec<Element>,
}

impl Element {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    pub fn attr(mut self, key: &'static str, value: impl ToString) -> Self {
        self.attrs.push((key, value.to_string()));
        self
    }

    pub fn child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = Element>) -> Self {
        self.children.extend(children);
        self
    }

    fn write(&self, out: &mut String) {
        out.push('<');
        out.push_str(self.name);
        for (key, value) in &self.attrs {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&escape_xml(value));
            out.push('"');
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &self.children {
            child.write(out);
        }
        out.push_str("</");
        out.push_str(self.name);
        out.push('>');
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        self.write(&mut out);
        out
    }
}

fn container(status: &str) -> Element {
    Element::new("subsonic-response")
        .attr("xmlns", XMLNS)
        .attr("status", status)
        .attr("version", VERSION)
}

fn xml_response(element: Element) -> Response {
    let mut response = Response::new(Body::from(element.to_xml()));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/xml; charset=utf-8"),
    );
    response
}

/// `status="ok"` wrapped around `payload`, if any.
fn ok(payload: Option<Element>) -> Response {
    let mut root = container("ok");
    if let Some(payload) = payload {
        root = root.child(payload);
    }
    xml_response(root)
}

pub fn failure(code: u16, message: &str) -> Response {
    let error = Element::new("error").attr("code", code).attr("message", message);
    xml_response(container("failed").child(error))
}

/// Why a protocol call failed, before it is rendered.
#[derive(Debug)]
pub enum Fault {
    Missing(&'static str),
    Generic(String),
    NotFound,
}

impl Fault {
    fn into_response(self) -> Response {
        match self {
            Fault::Missing(name) => failure(
                ERR_MISSING_PARAMETER,
                &format!("Required parameter is missing: {}", name),
            ),
            Fault::Generic(message) => {
                warn!("subsonic: {}", message);
                failure(ERR_GENERIC, "An error occurred.")
            }
            Fault::NotFound => StatusCode::NOT_FOUND.into_response(),
        }
    }
}

impl From<CatalogError> for Fault {
    fn from(err: CatalogError) -> Self {
        Fault::Generic(err.to_string())
    }
}

type Params = HashMap<String, String>;

fn required<'a>(params: &'a Params, name: &'static str) -> Result<&'a str, Fault> {
    params
        .get(name)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
        .ok_or(Fault::Missing(name))
}

fn number<T: std::str::FromStr>(params: &Params, name: &'static str, default: T) -> Result<T, Fault> {
    match params.get(name).filter(|value| !value.is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Fault::Generic(format!("invalid integer {}: {}", name, raw))),
        None => Ok(default),
    }
}

/// Handles `/subsonic/<method>` with or without the `.view` suffix.
pub async fn dispatch(
    State(state): State<AppState>,
    AxumPath(method): AxumPath<String>,
    Query(params): Query<Params>,
    headers: HeaderMap,
) -> Response {
    let method = method.strip_suffix(".view").unwrap_or(&method).to_string();
    match method.as_str() {
        "ping" => ok(None),
        "getLicense" => ok(Some(Element::new("license").attr("valid", true))),
        "getMusicFolders" => ok(Some(music_folders(&state))),
        "getPlaylists" => ok(Some(Element::new("playlists"))),
        "getStarred" => ok(Some(Element::new("starred"))),
        "getCoverArt" => cover_art(&state, &params).await,
        "stream" => stream(&state, &params, &headers).await,
        "getIndexes" | "getMusicDirectory" | "getAlbum" | "getAlbumList2" | "getRandomSongs" => {
            let catalog = state.library.catalog().clone();
            let call = method.clone();
            let result = tokio::task::spawn_blocking(move || match call.as_str() {
                "getIndexes" => indexes(&catalog),
                "getMusicDirectory" => music_directory(&catalog, &params),
                "getAlbum" => album(&catalog, &params),
                "getAlbumList2" => album_list(&catalog, &params),
                _ => random_songs(&catalog, &params),
            })
            .await;
            match result {
                Ok(Ok(payload)) => ok(Some(payload)),
                Ok(Err(fault)) => fault.into_response(),
                Err(err) => Fault::Generic(err.to_string()).into_response(),
            }
        }
        other => failure(ERR_GENERIC, &format!("Unknown method: {}", other)),
    }
}

fn music_folders(state: &AppState) -> Element {
    let name = state
        .library
        .root()
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    Element::new("musicFolders").child(
        Element::new("musicFolder")
            .attr("id", 0)
            .attr("name", name),
    )
}

fn song_element(name: &'static str, song: &Song) -> Element {
    let kind = song.file_type();
    Element::new(name)
        .attr("id", song.id)
        .attr("parent", format!("folder_{}", song.folder_id))
        .attr("title", &song.title)
        .attr("album", &song.album)
        .attr("artist", &song.artist)
        .attr("isDir", false)
        .attr("coverArt", song.art_id.map(|id| id.to_string()).unwrap_or_default())
        .attr("created", iso_timestamp(song.last_modified))
        .attr("duration", song.length)
        .attr("bitRate", song.bitrate)
        .attr("track", song.track)
        .attr("discNumber", 1)
        .attr("year", song.year)
        .attr("genre", &song.genre)
        .attr("size", song.file_size)
        .attr("suffix", kind.map(FileType::extension).unwrap_or(""))
        .attr("contentType", kind.map(FileType::mime).unwrap_or("application/octet-stream"))
        .attr("isVideo", false)
        .attr("path", &song.file_name)
        .attr("albumId", song.album_id)
        .attr("artistId", song.artist_id)
        .attr("type", "music")
}

/// Album attributes are summarized from its songs; the first song supplies
/// the cover and creation time.
fn album_element(album: &Album, songs: &[Song]) -> Element {
    let first = songs.first();
    Element::new("album")
        .attr("id", album.id)
        .attr("name", &album.title)
        .attr("artist", &album.artist)
        .attr("artistId", album.artist_id)
        .attr(
            "coverArt",
            first.and_then(|song| song.art_id).map(|id| id.to_string()).unwrap_or_default(),
        )
        .attr("songCount", songs.len())
        .attr("duration", songs.iter().map(|song| song.length as u64).sum::<u64>())
        .attr("created", iso_timestamp(first.map_or(0, |song| song.last_modified)))
}

/// First character of a title, uppercased, as the index bucket.
fn index_key(title: &str) -> String {
    title
        .chars()
        .next()
        .map(|c| c.to_uppercase().collect())
        .unwrap_or_else(|| "#".to_string())
}

fn indexes(catalog: &Catalog) -> Result<Element, Fault> {
    let mut artists = catalog.all::<Artist>()?;
    artists.sort_by(|a, b| a.title.to_lowercase().cmp(&b.title.to_lowercase()));
    let mut groups: BTreeMap<String, Vec<Element>> = BTreeMap::new();
    for artist in &artists {
        groups.entry(index_key(&artist.title)).or_default().push(
            Element::new("artist")
                .attr("name", &artist.title)
                .attr("id", format!("artist_{}", artist.id)),
        );
    }
    Ok(Element::new("indexes")
        .attr("lastModified", now_unix())
        .children(
            groups
                .into_iter()
                .map(|(name, artists)| Element::new("index").attr("name", name).children(artists)),
        ))
}

fn directory_child(id: String, title: &str) -> Element {
    Element::new("child")
        .attr("id", id)
        .attr("title", title)
        .attr("isDir", true)
}

fn music_directory(catalog: &Catalog, params: &Params) -> Result<Element, Fault> {
    let raw = required(params, "id")?;
    let (prefix, id) = raw.split_once('_').ok_or(Fault::Missing("id"))?;
    let id: u64 = id
        .parse()
        .map_err(|_| Fault::Generic(format!("invalid directory id: {}", raw)))?;

    let (name, children) = match prefix {
        "folder" => {
            let folder = catalog.load::<Folder>(id)?;
            let mut children: Vec<Element> = catalog
                .all_by::<Folder>(Link::FolderChildren, folder.id)?
                .iter()
                .map(|sub| directory_child(format!("folder_{}", sub.id), &sub.title))
                .collect();
            children.extend(
                catalog
                    .all_by::<Song>(Link::FolderSongs, folder.id)?
                    .iter()
                    .map(|song| song_element("child", song)),
            );
            (folder.title, children)
        }
        "artist" => {
            let artist = catalog.load::<Artist>(id)?;
            let mut children = Vec::new();
            for album in catalog.all_by::<Album>(Link::ArtistAlbums, artist.id)? {
                let songs = catalog.all_by::<Song>(Link::AlbumSongs, album.id)?;
                let cover = songs.first().and_then(|song| song.art_id);
                children.push(
                    directory_child(format!("album_{}", album.id), &album.title)
                        .attr("artist", &album.artist)
                        .attr("coverArt", cover.map(|id| id.to_string()).unwrap_or_default()),
                );
            }
            (artist.title, children)
        }
        "album" => {
            let album = catalog.load::<Album>(id)?;
            let children = catalog
                .all_by::<Song>(Link::AlbumSongs, album.id)?
                .iter()
                .map(|song| song_element("child", song))
                .collect();
            (album.title, children)
        }
        _ => return Err(Fault::Missing("id")),
    };
    Ok(Element::new("directory")
        .attr("id", raw)
        .attr("name", name)
        .children(children))
}

fn album(catalog: &Catalog, params: &Params) -> Result<Element, Fault> {
    let raw = required(params, "id")?;
    let id: u64 = raw
        .trim_start_matches("album_")
        .parse()
        .map_err(|_| Fault::Generic(format!("invalid album id: {}", raw)))?;
    let album = catalog.load::<Album>(id)?;
    let songs = catalog.all_by::<Song>(Link::AlbumSongs, album.id)?;
    Ok(album_element(&album, &songs).children(songs.iter().map(|song| song_element("song", song))))
}

fn album_list(catalog: &Catalog, params: &Params) -> Result<Element, Fault> {
    let offset = number(params, "offset", 0usize)?;
    let size = number(params, "size", DEFAULT_LIST_SIZE)?;
    let mut albums = Vec::new();
    for album in catalog.limit::<Album>(offset, size)? {
        let songs = catalog.all_by::<Song>(Link::AlbumSongs, album.id)?;
        if songs.is_empty() {
            continue;
        }
        albums.push(album_element(&album, &songs));
    }
    Ok(Element::new("albumList2").children(albums))
}

fn random_songs(catalog: &Catalog, params: &Params) -> Result<Element, Fault> {
    let size = number(params, "size", DEFAULT_LIST_SIZE)?;
    let songs = catalog.random::<Song>(size)?;
    Ok(Element::new("randomSongs").children(songs.iter().map(|song| song_element("song", song))))
}

async fn cover_art(state: &AppState, params: &Params) -> Response {
    let id = match required(params, "id").map(|raw| raw.trim().parse::<u64>()) {
        Ok(Ok(id)) => id,
        Ok(Err(_)) => return Fault::Missing("id").into_response(),
        Err(fault) => return fault.into_response(),
    };
    let size = match number::<i64>(params, "size", 0) {
        Ok(0) if !params.contains_key("size") => None,
        Ok(size) if size >= 1 => u32::try_from(size).ok(),
        _ => return Fault::Missing("size").into_response(),
    };
    let art = state.art.clone();
    match tokio::task::spawn_blocking(move || art.resolve(id, size)).await {
        Ok(Ok(picture)) => picture.into_response(),
        Ok(Err(err)) if err.status() == StatusCode::NOT_FOUND => Fault::NotFound.into_response(),
        Ok(Err(err)) => Fault::Generic(err.to_string()).into_response(),
        Err(err) => Fault::Generic(err.to_string()).into_response(),
    }
}

async fn stream(state: &AppState, params: &Params, headers: &HeaderMap) -> Response {
    let id = match required(params, "id").map(|raw| raw.trim().parse::<u64>()) {
        Ok(Ok(id)) => id,
        Ok(Err(_)) => return Fault::Generic("invalid song id".to_string()).into_response(),
        Err(fault) => return fault.into_response(),
    };
    let song = match load_song(state, id).await {
        Ok(song) => song,
        Err((_, body)) => return Fault::Generic(body.0.error.message).into_response(),
    };
    match serve_song(&song, headers).await {
        Ok(response) => response,
        Err((_, body)) => Fault::Generic(body.0.error.message).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use common::Role;

    use super::*;
    use crate::api::tests::{app_with_admin, call, get};

    fn text(body: Vec<u8>) -> String {
        String::from_utf8(body).unwrap()
    }

    async fn credentials() -> (tempfile::TempDir, axum::Router, AppState, String) {
        let (dir, app, state, _) = app_with_admin().await;
        let user = state.auth.create_user("sub", "pw", Role::User).unwrap();
        let key = state.auth.create_session(&user, "subsonic").unwrap().key;
        (dir, app, state, format!("u=sub&p={}&v=1.8.0&c=test", key))
    }

    #[test]
    fn elements_escape_and_self_close() {
        let xml = Element::new("a")
            .attr("title", "Tom & \"Jerry\"")
            .child(Element::new("b"))
            .to_xml();
        assert!(xml.ends_with("<a title=\"Tom &amp; &quot;Jerry&quot;\"><b/></a>"));
    }

    #[test]
    fn index_keys() {
        assert_eq!(index_key("abba"), "A");
        assert_eq!(index_key(""), "#");
    }

    #[tokio::test]
    async fn ping_is_self_closing() {
        let (_dir, app, _state, creds) = credentials().await;
        let (status, body) = call(&app, get(&format!("/api/v0/subsonic/ping.view?{}", creds))).await;
        assert_eq!(status, StatusCode::OK);
        let body = text(body);
        assert!(body.contains(
            "<subsonic-response xmlns=\"http://subsonic.org/restapi\" status=\"ok\" version=\"1.8.0\"/>"
        ));
    }

    #[tokio::test]
    async fn hex_encoded_keys_work() {
        let (_dir, app, state, _) = credentials().await;
        let user = state.auth.create_user("hexed", "pw", Role::User).unwrap();
        let key = state.auth.create_session(&user, "subsonic").unwrap().key;
        let uri = format!(
            "/api/v0/subsonic/getLicense?u=hexed&p=enc:{}&v=1.8.0",
            hex::encode(key.as_bytes())
        );
        let body = text(call(&app, get(&uri)).await.1);
        assert!(body.contains("<license valid=\"true\"/>"));
    }

    #[tokio::test]
    async fn credential_failures_render_xml() {
        let (_dir, app, _state, _) = credentials().await;
        let (status, body) =
            call(&app, get("/api/v0/subsonic/ping.view?u=sub&p=wrong&v=1.8.0")).await;
        assert_eq!(status, StatusCode::OK);
        let body = text(body);
        assert!(body.contains("status=\"failed\""));
        assert!(body.contains("code=\"40\""));

        let body = text(call(&app, get("/api/v0/subsonic/ping.view?u=sub&p=x")).await.1);
        assert!(body.contains("code=\"10\""));
    }

    #[tokio::test]
    async fn indexes_and_directories() {
        let (_dir, app, state, creds) = credentials().await;
        let body = text(call(&app, get(&format!("/api/v0/subsonic/getIndexes.view?{}", creds))).await.1);
        assert!(body.contains("<index name=\"A\">"));
        assert!(body.contains("name=\"ArtistA\""));

        let artist = state.library.catalog().find::<Artist>("ArtistB").unwrap().unwrap();
        let uri = format!(
            "/api/v0/subsonic/getMusicDirectory.view?id=artist_{}&{}",
            artist.id, creds
        );
        let body = text(call(&app, get(&uri)).await.1);
        assert!(body.contains("title=\"AlbumB\""));
        assert!(body.contains("isDir=\"true\""));

        let body = text(
            call(&app, get(&format!("/api/v0/subsonic/getMusicDirectory.view?{}", creds)))
                .await
                .1,
        );
        assert!(body.contains("code=\"10\""));
    }

    #[tokio::test]
    async fn album_lists_and_random_songs() {
        let (_dir, app, _state, creds) = credentials().await;
        let body = text(
            call(&app, get(&format!("/api/v0/subsonic/getAlbumList2.view?size=1&{}", creds)))
                .await
                .1,
        );
        assert_eq!(body.matches("<album ").count(), 1);
        assert!(body.contains("songCount=\"1\""));

        let body = text(
            call(&app, get(&format!("/api/v0/subsonic/getRandomSongs.view?{}", creds)))
                .await
                .1,
        );
        assert_eq!(body.matches("<song ").count(), 2);
    }

    #[tokio::test]
    async fn stream_serves_the_file() {
        let (_dir, app, state, creds) = credentials().await;
        let song = state.library.catalog().all::<Song>().unwrap().remove(0);
        let (status, body) = call(
            &app,
            get(&format!("/api/v0/subsonic/stream.view?id={}&{}", song.id, creds)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, std::fs::read(&song.file_name).unwrap());
    }
}
