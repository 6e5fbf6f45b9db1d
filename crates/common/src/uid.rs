use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::date::Date;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MusicKind {
    Song,
    Album,
    Artist,
    Genre,
    Playlist,
}

impl MusicKind {
    fn as_str(self) -> &'static str {
        match self {
            MusicKind::Song => "song",
            MusicKind::Album => "album",
            MusicKind::Artist => "artist",
            MusicKind::Genre => "genre",
            MusicKind::Playlist => "playlist",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UidFormat {
    /// Derived from a MusicBrainz identifier found in the tags.
    MusicBrainz,
    /// Derived from a hash of the item's raw tag fields.
    Hashed,
    /// Randomly generated, used for user-created playlists.
    Random,
}

impl UidFormat {
    fn as_str(self) -> &'static str {
        match self {
            UidFormat::MusicBrainz => "mb",
            UidFormat::Hashed => "hash",
            UidFormat::Random => "rand",
        }
    }
}

/// Stable identity of a music item. Survives rescans as long as the salient tag fields do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Uid {
    pub kind: MusicKind,
    pub format: UidFormat,
    pub uuid: Uuid,
}

impl Uid {
    pub fn music_brainz(kind: MusicKind, mbid: Uuid) -> Self {
        Self {
            kind,
            format: UidFormat::MusicBrainz,
            uuid: mbid,
        }
    }

    pub fn random(kind: MusicKind) -> Self {
        Self {
            kind,
            format: UidFormat::Random,
            uuid: Uuid::new_v4(),
        }
    }

    /// Hashes the fields fed into `build`, in order.
    pub fn hashed(kind: MusicKind, build: impl FnOnce(&mut UidHasher)) -> Self {
        let mut hasher = UidHasher::default();
        build(&mut hasher);
        Self {
            kind,
            format: UidFormat::Hashed,
            uuid: hasher.finish(),
        }
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.format.as_str(),
            self.kind.as_str(),
            self.uuid.hyphenated()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UidParseError(pub String);

impl fmt::Display for UidParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid uid: {}", self.0)
    }
}

impl std::error::Error for UidParseError {}

impl FromStr for Uid {
    type Err = UidParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || UidParseError(value.to_string());
        let mut parts = value.splitn(3, ':');
        let format = match parts.next().ok_or_else(invalid)? {
            "mb" => UidFormat::MusicBrainz,
            "hash" => UidFormat::Hashed,
            "rand" => UidFormat::Random,
            _ => return Err(invalid()),
        };
        let kind = match parts.next().ok_or_else(invalid)? {
            "song" => MusicKind::Song,
            "album" => MusicKind::Album,
            "artist" => MusicKind::Artist,
            "genre" => MusicKind::Genre,
            "playlist" => MusicKind::Playlist,
            _ => return Err(invalid()),
        };
        let uuid = parts
            .next()
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .ok_or_else(invalid)?;
        Ok(Self { kind, format, uuid })
    }
}

/// Accumulates raw fields into a uid hash.
///
/// Absent values contribute a single zero byte and present ones a one byte followed by the
/// value. Strings are folded to lowercase and length prefixed, lists are count prefixed and
/// integers are written as four little-endian bytes, so adjacent fields can't run together.
#[derive(Default)]
pub struct UidHasher {
    hasher: blake3::Hasher,
}

impl UidHasher {
    pub fn str(&mut self, value: Option<&str>) -> &mut Self {
        match value {
            Some(value) => {
                self.hasher.update(&[1]);
                self.text(&value.to_lowercase());
            }
            None => {
                self.hasher.update(&[0]);
            }
        }
        self
    }

    pub fn strs<S: AsRef<str>>(&mut self, values: &[S]) -> &mut Self {
        self.length(values.len());
        for value in values {
            self.str(Some(value.as_ref()));
        }
        self
    }

    pub fn int(&mut self, value: Option<u32>) -> &mut Self {
        match value {
            Some(value) => {
                self.hasher.update(&[1]);
                self.hasher.update(&value.to_le_bytes());
            }
            None => {
                self.hasher.update(&[0]);
            }
        }
        self
    }

    pub fn date(&mut self, value: Option<&Date>) -> &mut Self {
        match value {
            Some(date) => {
                self.hasher.update(&[1]);
                self.text(&date.to_string());
            }
            None => {
                self.hasher.update(&[0]);
            }
        }
        self
    }

    fn text(&mut self, value: &str) {
        self.length(value.len());
        self.hasher.update(value.as_bytes());
    }

    fn length(&mut self, len: usize) {
        let len = u32::try_from(len).unwrap_or(u32::MAX);
        self.hasher.update(&len.to_le_bytes());
    }

    fn finish(self) -> Uuid {
        let digest = self.hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest.as_bytes()[..16]);
        Uuid::from_bytes(bytes)
    }
}

/// Parses a MusicBrainz identifier, ignoring anything that isn't a well formed UUID.
pub fn parse_mbid(value: &str) -> Option<Uuid> {
    Uuid::parse_str(value.trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::{parse_mbid, MusicKind, Uid, UidFormat};
    use crate::date::Date;

    #[test]
    fn hashed_uid_is_case_insensitive() {
        let first = Uid::hashed(MusicKind::Artist, |h| {
            h.str(Some("Boards of Canada"));
        });
        let second = Uid::hashed(MusicKind::Artist, |h| {
            h.str(Some("boards OF canada"));
        });
        assert_eq!(first, second);
    }

    #[test]
    fn absent_and_empty_fields_differ_in_position() {
        let first = Uid::hashed(MusicKind::Song, |h| {
            h.str(None).str(Some("a"));
        });
        let second = Uid::hashed(MusicKind::Song, |h| {
            h.str(Some("a")).str(None);
        });
        assert_ne!(first, second);
    }

    #[test]
    fn list_boundaries_feed_the_hash() {
        let first = Uid::hashed(MusicKind::Song, |h| {
            h.strs(&["X"]).strs::<&str>(&[]);
        });
        let second = Uid::hashed(MusicKind::Song, |h| {
            h.strs::<&str>(&[]).strs(&["X"]);
        });
        assert_ne!(first, second);

        let split = Uid::hashed(MusicKind::Album, |h| {
            h.str(Some("ab")).str(Some("c"));
        });
        let joined = Uid::hashed(MusicKind::Album, |h| {
            h.str(Some("a")).str(Some("bc"));
        });
        assert_ne!(split, joined);
    }

    #[test]
    fn dates_and_numbers_feed_the_hash() {
        let date = Date::parse("2001-02").unwrap();
        let with_date = Uid::hashed(MusicKind::Song, |h| {
            h.date(Some(&date)).int(Some(3));
        });
        let without_date = Uid::hashed(MusicKind::Song, |h| {
            h.date(None).int(Some(3));
        });
        assert_ne!(with_date, without_date);
    }

    #[test]
    fn round_trips_through_text() {
        let uid = Uid::hashed(MusicKind::Genre, |h| {
            h.str(Some("Shoegaze"));
        });
        let text = uid.to_string();
        assert!(text.starts_with("hash:genre:"));
        assert_eq!(text.parse::<Uid>().unwrap(), uid);

        let mbid = parse_mbid("0c3bf5c1-5e39-4a0e-8c0f-8f9a2a3c2f11").unwrap();
        let uid = Uid::music_brainz(MusicKind::Album, mbid);
        assert_eq!(uid.format, UidFormat::MusicBrainz);
        assert_eq!(uid.to_string().parse::<Uid>().unwrap(), uid);
    }

    #[test]
    fn rejects_malformed_text() {
        assert!("hash:song".parse::<Uid>().is_err());
        assert!("md5:song:0c3bf5c1-5e39-4a0e-8c0f-8f9a2a3c2f11".parse::<Uid>().is_err());
        assert!(parse_mbid("not-a-uuid").is_none());
    }
}
