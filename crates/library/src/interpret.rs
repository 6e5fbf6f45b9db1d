use common::{parse_mbid, Date, DeviceFile, MusicKind, ReplayGainAdjustment, Uid};
use metadata::{parse_id3_genre_names, ReleaseType};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::extract::RawSong;
use crate::naming::{Name, Naming, Placeholder, Separators};
use crate::playlist::RawPlaylist;

/// User settings that change how tags are read into names and credits.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Interpretation {
    pub naming: Naming,
    pub separators: Separators,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreArtist {
    pub uid: Uid,
    pub music_brainz_id: Option<Uuid>,
    pub name: Name,
    pub raw_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreAlbum {
    pub uid: Uid,
    pub music_brainz_id: Option<Uuid>,
    pub name: Name,
    pub raw_name: String,
    pub release_type: ReleaseType,
    pub pre_artists: Vec<PreArtist>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreGenre {
    pub uid: Uid,
    pub name: Name,
    pub raw_name: Option<String>,
}

/// One song's view of itself and everything it is credited to, before linking.
#[derive(Clone, Debug, PartialEq)]
pub struct PreSong {
    pub uid: Uid,
    pub file: DeviceFile,
    pub music_brainz_id: Option<Uuid>,
    pub name: Name,
    pub raw_name: String,
    pub track: Option<u32>,
    pub disc: Option<u32>,
    pub disc_subtitle: Option<String>,
    pub date: Option<Date>,
    pub duration_ms: u64,
    pub mime_type: String,
    pub bitrate_kbps: Option<u32>,
    pub sample_rate_hz: Option<u32>,
    pub replay_gain: ReplayGainAdjustment,
    pub cover_id: Option<String>,
    pub added_ms: u64,
    pub pre_album: PreAlbum,
    pub pre_artists: Vec<PreArtist>,
    pub pre_genres: Vec<PreGenre>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrePlaylist {
    pub uid: Uid,
    pub name: String,
    pub file: DeviceFile,
    pub entries: Vec<String>,
}

/// Why a song could not be interpreted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InvalidSong {
    NoDuration,
    NoName,
}

impl std::fmt::Display for InvalidSong {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidSong::NoDuration => write!(f, "song has no duration"),
            InvalidSong::NoName => write!(f, "song has no name and no file name"),
        }
    }
}

impl std::error::Error for InvalidSong {}

/// Turns extracted records into pre-entities with stable identities.
#[derive(Clone, Debug, Default)]
pub struct TagInterpreter {
    interpretation: Interpretation,
}

impl TagInterpreter {
    pub fn new(interpretation: Interpretation) -> Self {
        Self { interpretation }
    }

    pub fn interpret(&self, song: &RawSong) -> Result<PreSong, InvalidSong> {
        let tags = &song.tags;
        let duration_ms = if tags.duration_ms > 0 {
            tags.duration_ms
        } else {
            song.properties.duration_ms
        };
        if duration_ms == 0 {
            return Err(InvalidSong::NoDuration);
        }
        let raw_name = match tags.name.as_deref() {
            Some(name) => name.to_string(),
            None => song.file.stem().to_string(),
        };
        if raw_name.is_empty() {
            return Err(InvalidSong::NoName);
        }
        let album_name = tags
            .album_name
            .clone()
            .unwrap_or_else(|| song.file.directory_name().to_string());

        let individual = self.pre_artists(
            &tags.artist_music_brainz_ids,
            &tags.artist_names,
            &tags.artist_sort_names,
        );
        let album_artists = self.pre_artists(
            &tags.album_artist_music_brainz_ids,
            &tags.album_artist_names,
            &tags.album_artist_sort_names,
        );
        let pre_album = self.pre_album(song, album_name.clone(), &individual, &album_artists);
        let pre_artists = first_non_empty(individual, album_artists);
        let pre_genres = self.pre_genres(&tags.genre_names);

        let music_brainz_id = tags.music_brainz_id.as_deref().and_then(parse_mbid);
        let uid = match music_brainz_id {
            Some(mbid) => Uid::music_brainz(MusicKind::Song, mbid),
            // Raw fields only, so naming settings never move a song's identity.
            None => Uid::hashed(MusicKind::Song, |h| {
                h.str(Some(raw_name.as_str()))
                    .str(Some(album_name.as_str()))
                    .date(tags.date.as_ref())
                    .int(tags.track)
                    .int(tags.disc)
                    .strs(&tags.artist_names)
                    .strs(&tags.album_artist_names);
            }),
        };

        Ok(PreSong {
            uid,
            file: song.file.clone(),
            music_brainz_id,
            name: self
                .interpretation
                .naming
                .name(&raw_name, tags.sort_name.as_deref()),
            raw_name,
            track: tags.track,
            disc: tags.disc,
            disc_subtitle: tags.disc.and(tags.subtitle.clone()),
            date: tags.date.clone(),
            duration_ms,
            mime_type: song.properties.mime_type.clone(),
            bitrate_kbps: song.properties.bitrate_kbps,
            sample_rate_hz: song.properties.sample_rate_hz,
            replay_gain: tags.replay_gain,
            cover_id: song.cover.as_ref().map(|cover| cover.id.clone()),
            added_ms: song.added_ms,
            pre_album,
            pre_artists,
            pre_genres,
        })
    }

    pub fn interpret_playlist(&self, playlist: &RawPlaylist) -> PrePlaylist {
        PrePlaylist {
            uid: Uid::hashed(MusicKind::Playlist, |h| {
                h.str(Some(playlist.file.uri.as_str()));
            }),
            name: playlist.name.clone(),
            file: playlist.file.clone(),
            entries: playlist.entries.clone(),
        }
    }

    fn pre_album(
        &self,
        song: &RawSong,
        raw_name: String,
        individual: &[PreArtist],
        album_artists: &[PreArtist],
    ) -> PreAlbum {
        let tags = &song.tags;
        let pre_artists = first_non_empty(album_artists.to_vec(), individual.to_vec());
        let music_brainz_id = tags.album_music_brainz_id.as_deref().and_then(parse_mbid);
        let uid = match music_brainz_id {
            Some(mbid) => Uid::music_brainz(MusicKind::Album, mbid),
            None => album_uid(&raw_name, &pre_artists),
        };
        let release_types = self.interpretation.separators.split(&tags.release_types);
        PreAlbum {
            uid,
            music_brainz_id,
            name: self
                .interpretation
                .naming
                .name(&raw_name, tags.album_sort_name.as_deref()),
            raw_name,
            release_type: ReleaseType::parse(&release_types).unwrap_or_default(),
            pre_artists,
        }
    }

    fn pre_artists(&self, mbids: &[String], names: &[String], sort_names: &[String]) -> Vec<PreArtist> {
        let separators = &self.interpretation.separators;
        let mbids = separators.split(mbids);
        let sort_names = separators.split(sort_names);
        separators
            .split(names)
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let music_brainz_id = mbids.get(i).and_then(|mbid| parse_mbid(mbid));
                let uid = match music_brainz_id {
                    Some(mbid) => Uid::music_brainz(MusicKind::Artist, mbid),
                    None => artist_uid(Some(name.as_str())),
                };
                PreArtist {
                    uid,
                    music_brainz_id,
                    name: self
                        .interpretation
                        .naming
                        .name(&name, sort_names.get(i).map(String::as_str)),
                    raw_name: Some(name),
                }
            })
            .collect()
    }

    fn pre_genres(&self, genre_names: &[String]) -> Vec<PreGenre> {
        let names = parse_id3_genre_names(genre_names)
            .unwrap_or_else(|| self.interpretation.separators.split(genre_names));
        if names.is_empty() {
            return vec![unknown_genre()];
        }
        names
            .into_iter()
            .map(|name| PreGenre {
                uid: genre_uid(Some(name.as_str())),
                name: self.interpretation.naming.name(&name, None),
                raw_name: Some(name),
            })
            .collect()
    }
}

fn first_non_empty(first: Vec<PreArtist>, second: Vec<PreArtist>) -> Vec<PreArtist> {
    if !first.is_empty() {
        first
    } else if !second.is_empty() {
        second
    } else {
        vec![unknown_artist()]
    }
}

pub(crate) fn artist_uid(raw_name: Option<&str>) -> Uid {
    Uid::hashed(MusicKind::Artist, |h| {
        h.str(raw_name);
    })
}

pub(crate) fn album_uid(raw_name: &str, pre_artists: &[PreArtist]) -> Uid {
    Uid::hashed(MusicKind::Album, |h| {
        h.str(Some(raw_name));
        for artist in pre_artists {
            h.str(artist.raw_name.as_deref());
        }
    })
}

fn genre_uid(raw_name: Option<&str>) -> Uid {
    Uid::hashed(MusicKind::Genre, |h| {
        h.str(raw_name);
    })
}

fn unknown_artist() -> PreArtist {
    PreArtist {
        uid: artist_uid(None),
        music_brainz_id: None,
        name: Name::Unknown(Placeholder::Artist),
        raw_name: None,
    }
}

fn unknown_genre() -> PreGenre {
    PreGenre {
        uid: genre_uid(None),
        name: Name::Unknown(Placeholder::Genre),
        raw_name: None,
    }
}
