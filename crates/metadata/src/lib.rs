use std::collections::BTreeMap;
use std::path::Path;

use common::AudioProperties;
use lofty::error::LoftyError;
use lofty::file::FileType;
use lofty::picture::{Picture, PictureType};
use lofty::prelude::{AudioFile, TaggedFileExt};
use lofty::tag::{Tag, TagType};

mod fields;
mod id3;
mod release;

pub use fields::parse_tags;
pub use id3::parse_id3_genre_names;
pub use release::{ReleaseRefinement, ReleaseType};

/// Tag values keyed by field name, in the order the container stored them.
///
/// Keys are Vorbis comment names where lofty knows a mapping, otherwise the container's native
/// key. Everything except MP4 atoms is uppercased, since atoms are case sensitive.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RawTags {
    entries: BTreeMap<String, Vec<String>>,
}

impl RawTags {
    /// Adds one value under `key`. Null separated values become separate entries and blank
    /// values are dropped.
    pub fn insert(&mut self, key: impl Into<String>, value: &str) {
        let values: Vec<String> = value
            .split('\0')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect();
        if values.is_empty() {
            return;
        }
        self.entries.entry(key.into()).or_default().extend(values);
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    /// Values of the first key in `keys` that is present.
    pub fn first_of(&self, keys: &[&str]) -> Option<&[String]> {
        keys.iter().find_map(|key| self.get(key))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<K: Into<String>, V: AsRef<str>> FromIterator<(K, V)> for RawTags {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut tags = RawTags::default();
        for (key, value) in iter {
            tags.insert(key, value.as_ref());
        }
        tags
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoverArt {
    pub data: Vec<u8>,
    pub mime: Option<String>,
}

/// Everything decoded from one audio file.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub properties: AudioProperties,
    pub tags: RawTags,
    pub cover: Option<CoverArt>,
}

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Lofty(LoftyError),
    NoAudio,
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Lofty(err) => write!(f, "tag error: {}", err),
            MetadataError::NoAudio => write!(f, "no audio stream"),
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
        MetadataError::Lofty(err)
    }
}

/// Decodes properties, tags and the front cover of the file at `path`.
///
/// `fallback_mime` is used when the container type has no well known mime type.
pub fn read_metadata(path: &Path, fallback_mime: &str) -> Result<Metadata, MetadataError> {
    let tagged_file = lofty::read_from_path(path)?;
    let properties = tagged_file.properties();

    let duration_ms = properties.duration().as_millis();
    if duration_ms == 0 {
        return Err(MetadataError::NoAudio);
    }

    let mut metadata = Metadata {
        properties: AudioProperties {
            mime_type: file_type_mime(tagged_file.file_type())
                .unwrap_or(fallback_mime)
                .to_string(),
            duration_ms: duration_ms.min(u128::from(u64::MAX)) as u64,
            bitrate_kbps: properties.audio_bitrate().or(properties.overall_bitrate()),
            sample_rate_hz: properties.sample_rate(),
        },
        ..Metadata::default()
    };

    if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        metadata.tags = raw_tags(tag);
        metadata.cover = pick_picture(tag.pictures()).map(|picture| {
            let data = picture.data().to_vec();
            let mime = picture
                .mime_type()
                .map(|mime| mime.as_str().to_string())
                .or_else(|| guess_mime(&data));
            CoverArt { data, mime }
        });
    }

    Ok(metadata)
}

fn raw_tags(tag: &Tag) -> RawTags {
    let tag_type = tag.tag_type();
    let mut tags = RawTags::default();
    for item in tag.items() {
        let Some(value) = item.value().text() else {
            continue;
        };
        let key = match item.key().map_key(TagType::VorbisComments, true) {
            Some(key) => key.to_ascii_uppercase(),
            None => match item.key().map_key(tag_type, true) {
                Some(key) => normalize_native_key(key, tag_type),
                None => continue,
            },
        };
        tags.insert(key, value);
    }
    tags
}

fn normalize_native_key(key: &str, tag_type: TagType) -> String {
    if tag_type == TagType::Mp4Ilst && !key.starts_with("----:") {
        key.to_string()
    } else {
        key.to_uppercase()
    }
}

fn file_type_mime(file_type: FileType) -> Option<&'static str> {
    match file_type {
        FileType::Aac => Some("audio/aac"),
        FileType::Aiff => Some("audio/aiff"),
        FileType::Ape => Some("audio/ape"),
        FileType::Flac => Some("audio/flac"),
        FileType::Mpeg => Some("audio/mpeg"),
        FileType::Mp4 => Some("audio/mp4"),
        FileType::Opus => Some("audio/opus"),
        FileType::Vorbis => Some("audio/ogg"),
        FileType::Speex => Some("audio/speex"),
        FileType::Wav => Some("audio/wav"),
        FileType::WavPack => Some("audio/wavpack"),
        _ => None,
    }
}

fn pick_picture(pictures: &[Picture]) -> Option<&Picture> {
    for picture in pictures {
        if picture.pic_type() == PictureType::CoverFront {
            return Some(picture);
        }
    }
    pictures.first()
}

fn guess_mime(bytes: &[u8]) -> Option<String> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg".to_string())
    } else if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        Some("image/png".to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::{guess_mime, RawTags};

    #[test]
    fn raw_tags_split_and_trim_values() {
        let tags: RawTags = [("ARTIST", " A \0B"), ("ARTIST", "C"), ("TITLE", "   ")]
            .into_iter()
            .collect();
        assert_eq!(tags.get("ARTIST").unwrap(), ["A", "B", "C"]);
        assert!(tags.get("TITLE").is_none());
        assert_eq!(tags.len(), 1);
    }

    #[test]
    fn first_of_respects_order() {
        let tags: RawTags = [("DATE", "2001"), ("YEAR", "1999")].into_iter().collect();
        assert_eq!(
            tags.first_of(&["ORIGINALDATE", "DATE", "YEAR"]).unwrap(),
            ["2001"]
        );
        assert!(tags.first_of(&["TDRC"]).is_none());
    }

    #[test]
    fn sniffs_cover_mime() {
        assert_eq!(guess_mime(&[0xFF, 0xD8, 0xFF, 0x00]).as_deref(), Some("image/jpeg"));
        assert_eq!(guess_mime(b"GIF89a"), None);
    }
}
