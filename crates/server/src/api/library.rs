use std::collections::HashMap;

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
};
use common::{Album, Artist, Folder, Song};
use library::{Catalog, CatalogError, Link, Record};
use serde::Serialize;

use crate::state::{AppState, JsonError, JsonResult};
use crate::utils::{blocking, catalog_error, envelope, is_truthy, json_error, parse_id};

const SEARCH_TYPES: [&str; 4] = ["artists", "albums", "songs", "folders"];

#[derive(Debug, Default, Serialize)]
pub struct AlbumsBody {
    pub albums: Vec<Album>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub songs: Option<Vec<Song>>,
}

#[derive(Debug, Default, Serialize)]
pub struct ArtistsBody {
    pub artists: Vec<Artist>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub albums: Option<Vec<Album>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub songs: Option<Vec<Song>>,
}

#[derive(Debug, Default, Serialize)]
pub struct SongsBody {
    pub songs: Vec<Song>,
}

#[derive(Debug, Default, Serialize)]
pub struct FoldersBody {
    pub folders: Vec<Folder>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subfolders: Option<Vec<Folder>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub songs: Option<Vec<Song>>,
}

#[derive(Debug, Default, Serialize)]
pub struct SearchBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artists: Option<Vec<Artist>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub albums: Option<Vec<Album>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub songs: Option<Vec<Song>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folders: Option<Vec<Folder>>,
}

/// `?limit=offset,count`.
pub fn parse_limit(raw: Option<&str>) -> Result<Option<(usize, usize)>, JsonError> {
    let raw = match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => raw,
        None => return Ok(None),
    };
    let pair = raw
        .split_once(',')
        .and_then(|(offset, count)| Some((offset.trim().parse().ok()?, count.trim().parse().ok()?)));
    match pair {
        Some(pair) => Ok(Some(pair)),
        None => Err(json_error(
            StatusCode::BAD_REQUEST,
            "invalid comma-separated integer pair for limit",
        )),
    }
}

fn list<T: Record>(catalog: &Catalog, limit: Option<(usize, usize)>) -> Result<Vec<T>, CatalogError> {
    match limit {
        Some((offset, count)) => catalog.limit::<T>(offset, count),
        None => catalog.all::<T>(),
    }
}

pub(crate) fn load_one<T: Record>(catalog: &Catalog, id: u64, kind: &str) -> Result<T, JsonError> {
    catalog.load::<T>(id).map_err(|err| match err {
        CatalogError::NotFound(_) => json_error(StatusCode::NOT_FOUND, format!("{} ID not found", kind)),
        other => catalog_error(other),
    })
}

pub async fn list_albums(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> JsonResult<AlbumsBody> {
    let limit = parse_limit(params.get("limit").map(String::as_str))?;
    let catalog = state.library.catalog().clone();
    let albums = blocking(move || list::<Album>(&catalog, limit).map_err(catalog_error)).await?;
    Ok(envelope(AlbumsBody { albums, songs: None }))
}

pub async fn get_album(
    State(state): State<AppState>,
    AxumPath(raw): AxumPath<String>,
) -> JsonResult<AlbumsBody> {
    let id = parse_id(&raw, "album")?;
    let catalog = state.library.catalog().clone();
    let body = blocking(move || {
        let album = load_one::<Album>(&catalog, id, "album")?;
        let songs = catalog
            .all_by::<Song>(Link::AlbumSongs, album.id)
            .map_err(catalog_error)?;
        Ok(AlbumsBody {
            albums: vec![album],
            songs: Some(songs),
        })
    })
    .await?;
    Ok(envelope(body))
}

pub async fn list_artists(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> JsonResult<ArtistsBody> {
    let limit = parse_limit(params.get("limit").map(String::as_str))?;
    let catalog = state.library.catalog().clone();
    let artists = blocking(move || list::<Artist>(&catalog, limit).map_err(catalog_error)).await?;
    Ok(envelope(ArtistsBody {
        artists,
        ..ArtistsBody::default()
    }))
}

pub async fn get_artist(
    State(state): State<AppState>,
    AxumPath(raw): AxumPath<String>,
    Query(params): Query<HashMap<String, String>>,
) -> JsonResult<ArtistsBody> {
    let id = parse_id(&raw, "artist")?;
    let with_songs = is_truthy(params.get("songs").map(String::as_str));
    let catalog = state.library.catalog().clone();
    let body = blocking(move || {
        let artist = load_one::<Artist>(&catalog, id, "artist")?;
        let albums = catalog
            .all_by::<Album>(Link::ArtistAlbums, artist.id)
            .map_err(catalog_error)?;
        let songs = if with_songs {
            Some(
                catalog
                    .all_by::<Song>(Link::ArtistSongs, artist.id)
                    .map_err(catalog_error)?,
            )
        } else {
            None
        };
        Ok(ArtistsBody {
            artists: vec![artist],
            albums: Some(albums),
            songs,
        })
    })
    .await?;
    Ok(envelope(body))
}

pub async fn list_songs(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> JsonResult<SongsBody> {
    let limit = parse_limit(params.get("limit").map(String::as_str))?;
    let catalog = state.library.catalog().clone();
    let songs = blocking(move || list::<Song>(&catalog, limit).map_err(catalog_error)).await?;
    Ok(envelope(SongsBody { songs }))
}

pub async fn get_song(
    State(state): State<AppState>,
    AxumPath(raw): AxumPath<String>,
) -> JsonResult<SongsBody> {
    let id = parse_id(&raw, "song")?;
    let catalog = state.library.catalog().clone();
    let song = blocking(move || load_one::<Song>(&catalog, id, "song")).await?;
    Ok(envelope(SongsBody { songs: vec![song] }))
}

pub async fn list_folders(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> JsonResult<FoldersBody> {
    let limit = parse_limit(params.get("limit").map(String::as_str))?;
    let catalog = state.library.catalog().clone();
    let folders = blocking(move || list::<Folder>(&catalog, limit).map_err(catalog_error)).await?;
    Ok(envelope(FoldersBody {
        folders,
        ..FoldersBody::default()
    }))
}

pub async fn get_folder(
    State(state): State<AppState>,
    AxumPath(raw): AxumPath<String>,
) -> JsonResult<FoldersBody> {
    let id = parse_id(&raw, "folder")?;
    let catalog = state.library.catalog().clone();
    let body = blocking(move || {
        let folder = load_one::<Folder>(&catalog, id, "folder")?;
        let subfolders = catalog
            .all_by::<Folder>(Link::FolderChildren, folder.id)
            .map_err(catalog_error)?;
        let songs = catalog
            .all_by::<Song>(Link::FolderSongs, folder.id)
            .map_err(catalog_error)?;
        Ok(FoldersBody {
            folders: vec![folder],
            subfolders: Some(subfolders),
            songs: Some(songs),
        })
    })
    .await?;
    Ok(envelope(body))
}

/// Which collections a search covers; unknown names are ignored and an
/// empty filter means all of them.
pub fn search_types(raw: Option<&str>) -> Vec<&'static str> {
    let requested: Vec<&str> = raw
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if requested.is_empty() {
        return SEARCH_TYPES.to_vec();
    }
    SEARCH_TYPES
        .into_iter()
        .filter(|kind| requested.contains(kind))
        .collect()
}

pub async fn search(
    State(state): State<AppState>,
    AxumPath(query): AxumPath<String>,
    Query(params): Query<HashMap<String, String>>,
) -> JsonResult<SearchBody> {
    let query = query.trim().to_string();
    if query.is_empty() {
        return Err(json_error(StatusCode::BAD_REQUEST, "no search query specified"));
    }
    let types = search_types(params.get("type").map(String::as_str));
    let catalog = state.library.catalog().clone();
    let body = blocking(move || {
        let mut body = SearchBody::default();
        for kind in types {
            match kind {
                "artists" => body.artists = Some(catalog.search::<Artist>(&query).map_err(catalog_error)?),
                "albums" => body.albums = Some(catalog.search::<Album>(&query).map_err(catalog_error)?),
                "songs" => body.songs = Some(catalog.search::<Song>(&query).map_err(catalog_error)?),
                "folders" => body.folders = Some(catalog.search::<Folder>(&query).map_err(catalog_error)?),
                _ => {}
            }
        }
        Ok(body)
    })
    .await?;
    Ok(envelope(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::{app_with_admin, call_json, get};

    #[test]
    fn limit_pairs() {
        assert_eq!(parse_limit(None).unwrap(), None);
        assert_eq!(parse_limit(Some("5,10")).unwrap(), Some((5, 10)));
        assert!(parse_limit(Some("5")).is_err());
        assert!(parse_limit(Some("a,b")).is_err());
    }

    #[test]
    fn search_type_filter() {
        assert_eq!(search_types(None), SEARCH_TYPES.to_vec());
        assert_eq!(search_types(Some("songs,bogus,artists")), vec!["artists", "songs"]);
        assert_eq!(search_types(Some("bogus")), Vec::<&str>::new());
    }

    #[tokio::test]
    async fn artists_list_and_detail() {
        let (_dir, app, _state, key) = app_with_admin().await;
        let (status, body) = call_json(&app, get(&format!("/api/v0/artists?s={}", key))).await;
        assert_eq!(status, StatusCode::OK);
        let artists = body["artists"].as_array().unwrap();
        assert_eq!(artists.len(), 2);
        let id = artists[0]["id"].as_u64().unwrap();

        let (status, body) =
            call_json(&app, get(&format!("/api/v0/artists/{}?s={}", id, key))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["albums"].as_array().unwrap().len(), 1);
        assert!(body.get("songs").is_none());

        let (_, body) =
            call_json(&app, get(&format!("/api/v0/artists/{}?songs=true&s={}", id, key))).await;
        assert_eq!(body["songs"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn album_detail_includes_songs() {
        let (_dir, app, _state, key) = app_with_admin().await;
        let (_, body) = call_json(&app, get(&format!("/api/v0/albums?s={}", key))).await;
        let id = body["albums"][0]["id"].as_u64().unwrap();

        let (status, body) = call_json(&app, get(&format!("/api/v0/albums/{}?s={}", id, key))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["songs"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bad_and_missing_ids() {
        let (_dir, app, _state, key) = app_with_admin().await;
        let (status, body) = call_json(&app, get(&format!("/api/v0/songs/abc?s={}", key))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["message"], "invalid integer song ID");

        let (status, body) = call_json(&app, get(&format!("/api/v0/songs/999?s={}", key))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["message"], "song ID not found");
    }

    #[tokio::test]
    async fn folder_detail_lists_children() {
        let (_dir, app, state, key) = app_with_admin().await;
        let root = state
            .library
            .catalog()
            .find::<Folder>(&state.library.root().to_string_lossy())
            .unwrap()
            .unwrap();

        let (status, body) =
            call_json(&app, get(&format!("/api/v0/folders/{}?s={}", root.id, key))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["subfolders"].as_array().unwrap().len(), 2);
        assert_eq!(body["songs"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn search_honors_the_type_filter() {
        let (_dir, app, _state, key) = app_with_admin().await;
        let (status, body) =
            call_json(&app, get(&format!("/api/v0/search/ArtistA?type=artists&s={}", key))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["artists"].as_array().unwrap().len(), 1);
        assert!(body.get("songs").is_none());
    }
}
