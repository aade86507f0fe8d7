use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::OffsetDateTime;

/// A directory under the media root. The root folder has no parent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: u64,
    pub parent_id: Option<u64>,
    pub title: String,
    pub path: String,
}

impl Folder {
    pub fn from_path(path: &Path, parent_id: Option<u64>) -> Self {
        let title = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        Self {
            id: 0,
            parent_id,
            title,
            path: path.to_string_lossy().to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artist {
    pub id: u64,
    pub title: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Album {
    pub id: u64,
    pub artist: String,
    pub artist_id: u64,
    pub title: String,
    pub year: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Song {
    pub id: u64,
    pub album: String,
    pub album_id: u64,
    pub artist: String,
    pub artist_id: u64,
    pub art_id: Option<u64>,
    pub bitrate: u32,
    pub channels: u32,
    pub comment: String,
    pub file_name: String,
    pub file_size: u64,
    pub file_type_id: u8,
    pub folder_id: u64,
    pub genre: String,
    pub last_modified: i64,
    pub length: u32,
    pub sample_rate: u32,
    pub title: String,
    pub track: u32,
    pub year: i32,
}

impl Song {
    pub fn file_type(&self) -> Option<FileType> {
        FileType::from_id(self.file_type_id)
    }

    /// `[#00042] Artist - Title [MP3 320kbps]`, used by stream logs.
    pub fn describe(&self) -> String {
        let codec = self
            .file_type()
            .map(|kind| kind.codec_name())
            .unwrap_or("unknown");
        format!(
            "[#{:05}] {} - {} [{} {}kbps]",
            self.id, self.artist, self.title, codec, self.bitrate
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Art {
    pub id: u64,
    pub file_name: String,
    pub file_size: u64,
    pub last_modified: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub username: String,
    pub password_hash: String,
    pub role_id: u8,
    pub external_token: Option<String>,
}

impl User {
    pub fn role(&self) -> Role {
        Role::from_id(self.role_id).unwrap_or(Role::Guest)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: u64,
    pub user_id: u64,
    pub key: String,
    pub expire: i64,
    pub client: String,
}

impl Session {
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expire
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    Guest,
    User,
    Admin,
}

impl Role {
    pub fn id(self) -> u8 {
        match self {
            Role::Guest => 0,
            Role::User => 1,
            Role::Admin => 2,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Role::Guest),
            1 => Some(Role::User),
            2 => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileType {
    Ape,
    Flac,
    M4a,
    Mp3,
    Mpc,
    Ogg,
    Wma,
    Wv,
}

impl FileType {
    pub const ALL: [FileType; 8] = [
        FileType::Ape,
        FileType::Flac,
        FileType::M4a,
        FileType::Mp3,
        FileType::Mpc,
        FileType::Ogg,
        FileType::Wma,
        FileType::Wv,
    ];

    pub fn id(self) -> u8 {
        match self {
            FileType::Ape => 0,
            FileType::Flac => 1,
            FileType::M4a => 2,
            FileType::Mp3 => 3,
            FileType::Mpc => 4,
            FileType::Ogg => 5,
            FileType::Wma => 6,
            FileType::Wv => 7,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.id() == id)
    }

    pub fn extension(self) -> &'static str {
        match self {
            FileType::Ape => "ape",
            FileType::Flac => "flac",
            FileType::M4a => "m4a",
            FileType::Mp3 => "mp3",
            FileType::Mpc => "mpc",
            FileType::Ogg => "ogg",
            FileType::Wma => "wma",
            FileType::Wv => "wv",
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
        Self::ALL.into_iter().find(|kind| kind.extension() == ext)
    }

    pub fn codec_name(self) -> &'static str {
        match self {
            FileType::Ape => "APE",
            FileType::Flac => "FLAC",
            FileType::M4a => "AAC",
            FileType::Mp3 => "MP3",
            FileType::Mpc => "MPC",
            FileType::Ogg => "Ogg Vorbis",
            FileType::Wma => "WMA",
            FileType::Wv => "WavPack",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            FileType::Ape => "audio/x-ape",
            FileType::Flac => "audio/flac",
            FileType::M4a => "audio/mp4",
            FileType::Mp3 => "audio/mpeg",
            FileType::Mpc => "audio/x-musepack",
            FileType::Ogg => "audio/ogg",
            FileType::Wma => "audio/x-ms-wma",
            FileType::Wv => "audio/x-wavpack",
        }
    }
}

pub fn now_unix() -> i64 {
    system_time_unix(SystemTime::now())
}

pub fn system_time_unix(value: SystemTime) -> i64 {
    match value.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs() as i64,
        Err(err) => -(err.duration().as_secs() as i64),
    }
}

/// RFC 1123 date in GMT, as sent in `Last-Modified`.
pub fn http_date(unix: i64) -> String {
    let date = OffsetDateTime::from_unix_timestamp(unix).unwrap_or(OffsetDateTime::UNIX_EPOCH);
    date.format(format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    ))
    .unwrap_or_default()
}

/// `2006-01-02T15:04:05`, the timestamp shape used by the XML protocol.
pub fn iso_timestamp(unix: i64) -> String {
    let date = OffsetDateTime::from_unix_timestamp(unix).unwrap_or(OffsetDateTime::UNIX_EPOCH);
    date.format(format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second]"
    ))
    .unwrap_or_default()
}
