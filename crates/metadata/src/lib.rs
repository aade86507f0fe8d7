use std::fmt;
use std::path::Path;

use lofty::error::LoftyError;
use lofty::prelude::{AudioFile, ItemKey, TaggedFileExt};

/// Tags and audio properties of one file. Numbers use the catalog's units:
/// bitrate in kbps, length in whole seconds.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub genre: String,
    pub comment: String,
    pub year: i32,
    pub track: u32,
    pub bitrate: u32,
    pub channels: u32,
    pub length: u32,
    pub sample_rate: u32,
}

impl FileInfo {
    /// Rejects files the catalog cannot index.
    pub fn validate(self) -> Result<Self, MetadataError> {
        if self.title.trim().is_empty() || self.artist.trim().is_empty() {
            return Err(MetadataError::TagsMissing);
        }
        if self.bitrate == 0 || self.channels == 0 || self.length == 0 || self.sample_rate == 0 {
            return Err(MetadataError::PropertiesMissing);
        }
        Ok(self)
    }
}

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Decode(LoftyError),
    TagsMissing,
    PropertiesMissing,
}

impl fmt::Display for MetadataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Decode(err) => write!(f, "decode error: {}", err),
            MetadataError::TagsMissing => write!(f, "missing title or artist tag"),
            MetadataError::PropertiesMissing => write!(f, "missing audio properties"),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<LoftyError> for MetadataError {
    fn from(err: LoftyError) -> Self {
        MetadataError::Decode(err)
    }
}

/// Reads tags and properties, failing on files without the required fields.
pub fn read_file(path: &Path) -> Result<FileInfo, MetadataError> {
    std::fs::metadata(path)?;
    let tagged_file = lofty::read_from_path(path)?;
    let properties = tagged_file.properties();

    let mut info = FileInfo {
        length: properties.duration().as_secs().min(u64::from(u32::MAX)) as u32,
        sample_rate: properties.sample_rate().unwrap_or(0),
        channels: properties.channels().map(u32::from).unwrap_or(0),
        bitrate: properties
            .audio_bitrate()
            .or(properties.overall_bitrate())
            .unwrap_or(0),
        ..FileInfo::default()
    };

    if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        let text = |key: &ItemKey| {
            tag.get_string(key)
                .map(|value| value.trim().to_string())
                .unwrap_or_default()
        };
        info.title = text(&ItemKey::TrackTitle);
        info.album = text(&ItemKey::AlbumTitle);
        info.artist = text(&ItemKey::TrackArtist);
        if info.artist.is_empty() {
            info.artist = text(&ItemKey::AlbumArtist);
        }
        info.genre = text(&ItemKey::Genre);
        info.comment = text(&ItemKey::Comment);
        info.track = tag
            .get_string(&ItemKey::TrackNumber)
            .and_then(parse_number)
            .unwrap_or(0);
        info.year = tag
            .get_string(&ItemKey::Year)
            .or_else(|| tag.get_string(&ItemKey::RecordingDate))
            .and_then(parse_year)
            .unwrap_or(0);
    }

    info.validate()
}

fn parse_number(text: &str) -> Option<u32> {
    let head = text.split('/').next().unwrap_or(text).trim();
    head.parse().ok()
}

fn parse_year(text: &str) -> Option<i32> {
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            if digits.len() == 4 {
                break;
            }
        } else if !digits.is_empty() {
            break;
        }
    }
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> FileInfo {
        FileInfo {
            title: "Song".to_string(),
            artist: "Artist".to_string(),
            bitrate: 320,
            channels: 2,
            length: 180,
            sample_rate: 44100,
            ..FileInfo::default()
        }
    }

    #[test]
    fn parses_track_numbers_and_years() {
        assert_eq!(parse_number("3/12"), Some(3));
        assert_eq!(parse_number(" 7 "), Some(7));
        assert_eq!(parse_number("x"), None);
        assert_eq!(parse_year("2020-05-01"), Some(2020));
        assert_eq!(parse_year("(1999)"), Some(1999));
        assert_eq!(parse_year("unknown"), None);
    }

    #[test]
    fn validate_requires_title_and_artist() {
        assert!(complete().validate().is_ok());
        let mut info = complete();
        info.artist = "  ".to_string();
        assert!(matches!(info.validate(), Err(MetadataError::TagsMissing)));
        let mut info = complete();
        info.title.clear();
        assert!(matches!(info.validate(), Err(MetadataError::TagsMissing)));
    }

    #[test]
    fn validate_requires_every_property() {
        let mut info = complete();
        info.length = 0;
        assert!(matches!(info.validate(), Err(MetadataError::PropertiesMissing)));
        let mut info = complete();
        info.sample_rate = 0;
        assert!(matches!(info.validate(), Err(MetadataError::PropertiesMissing)));
    }

    #[test]
    fn read_file_reports_io_and_decode_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.mp3");
        assert!(matches!(read_file(&missing), Err(MetadataError::Io(_))));

        let garbage = dir.path().join("garbage.flac");
        std::fs::write(&garbage, b"definitely not audio").unwrap();
        assert!(matches!(read_file(&garbage), Err(MetadataError::Decode(_))));
    }
}
