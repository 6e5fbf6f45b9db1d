use common::{Date, ParsedTags, ReplayGainAdjustment};

use crate::{Metadata, RawTags};

// Each list is ordered by preference. Vorbis names come first since lofty maps most known
// items onto them; MP4 atoms and ID3v2 frames catch items it leaves native.

const MUSICBRAINZ_TRACK_ID: &[&str] = &[
    "MUSICBRAINZ_RELEASETRACKID",
    "MUSICBRAINZ RELEASE TRACK ID",
    "----:COM.APPLE.ITUNES:MUSICBRAINZ RELEASE TRACK ID",
    "----:COM.APPLE.ITUNES:MUSICBRAINZ_RELEASETRACKID",
    "TXXX:MUSICBRAINZ RELEASE TRACK ID",
    "TXXX:MUSICBRAINZ_RELEASETRACKID",
];

const TITLE: &[&str] = &["TITLE", "©nam", "©trk", "TIT2"];
const TITLE_SORT: &[&str] = &["TITLESORT", "sonm", "TSOT"];

const TRACK: &[&str] = &["TRACKNUMBER", "trkn", "TRCK"];
const DISC: &[&str] = &["DISCNUMBER", "disk", "TPOS"];
const DISC_SUBTITLE: &[&str] = &["DISCSUBTITLE", "TSST"];

// Original dates first, so a remaster still files under its first release.
const DATE: &[&str] = &[
    "ORIGINALDATE",
    "DATE",
    "YEAR",
    "©day",
    "TDOR",
    "TDRC",
    "TDRL",
];

const MUSICBRAINZ_ALBUM_ID: &[&str] = &[
    "MUSICBRAINZ_ALBUMID",
    "MUSICBRAINZ ALBUM ID",
    "----:COM.APPLE.ITUNES:MUSICBRAINZ ALBUM ID",
    "----:COM.APPLE.ITUNES:MUSICBRAINZ_ALBUMID",
    "TXXX:MUSICBRAINZ ALBUM ID",
    "TXXX:MUSICBRAINZ_ALBUMID",
];

const ALBUM: &[&str] = &["ALBUM", "©alb", "TALB"];
const ALBUM_SORT: &[&str] = &["ALBUMSORT", "soal", "TSOA"];

const RELEASE_TYPE: &[&str] = &[
    "RELEASETYPE",
    "MUSICBRAINZ ALBUM TYPE",
    "----:COM.APPLE.ITUNES:MUSICBRAINZ ALBUM TYPE",
    "----:COM.APPLE.ITUNES:RELEASETYPE",
    "©grp",
    "TXXX:MUSICBRAINZ ALBUM TYPE",
    "TXXX:RELEASETYPE",
    "GRP1",
];

const MUSICBRAINZ_ARTIST_ID: &[&str] = &[
    "MUSICBRAINZ_ARTISTID",
    "MUSICBRAINZ ARTIST ID",
    "----:COM.APPLE.ITUNES:MUSICBRAINZ ARTIST ID",
    "----:COM.APPLE.ITUNES:MUSICBRAINZ_ARTISTID",
    "TXXX:MUSICBRAINZ ARTIST ID",
    "TXXX:MUSICBRAINZ_ARTISTID",
];

const ARTIST: &[&str] = &[
    "ARTISTS",
    "ARTIST",
    "----:COM.APPLE.ITUNES:ARTISTS",
    "©ART",
    "----:COM.APPLE.ITUNES:ARTIST",
    "TXXX:ARTISTS",
    "TPE1",
    "TXXX:ARTIST",
];

const ARTIST_SORT: &[&str] = &[
    "ARTISTSSORT",
    "ARTISTS_SORT",
    "ARTISTS SORT",
    "ARTISTSORT",
    "ARTIST SORT",
    "----:COM.APPLE.ITUNES:ARTISTSSORT",
    "----:COM.APPLE.ITUNES:ARTISTS_SORT",
    "----:COM.APPLE.ITUNES:ARTISTS SORT",
    "soar",
    "----:COM.APPLE.ITUNES:ARTISTSORT",
    "----:COM.APPLE.ITUNES:ARTIST SORT",
    "TXXX:ARTISTSSORT",
    "TXXX:ARTISTS_SORT",
    "TXXX:ARTISTS SORT",
    "TSOP",
    "TXXX:ARTISTSORT",
    "TXXX:ARTIST SORT",
];

const MUSICBRAINZ_ALBUM_ARTIST_ID: &[&str] = &[
    "MUSICBRAINZ_ALBUMARTISTID",
    "MUSICBRAINZ ALBUM ARTIST ID",
    "----:COM.APPLE.ITUNES:MUSICBRAINZ ALBUM ARTIST ID",
    "----:COM.APPLE.ITUNES:MUSICBRAINZ_ALBUMARTISTID",
    "TXXX:MUSICBRAINZ ALBUM ARTIST ID",
    "TXXX:MUSICBRAINZ_ALBUMARTISTID",
];

const ALBUM_ARTIST: &[&str] = &[
    "ALBUMARTISTS",
    "ALBUM_ARTISTS",
    "ALBUM ARTISTS",
    "ALBUMARTIST",
    "ALBUM ARTIST",
    "----:COM.APPLE.ITUNES:ALBUMARTISTS",
    "----:COM.APPLE.ITUNES:ALBUM_ARTISTS",
    "----:COM.APPLE.ITUNES:ALBUM ARTISTS",
    "aART",
    "----:COM.APPLE.ITUNES:ALBUMARTIST",
    "----:COM.APPLE.ITUNES:ALBUM ARTIST",
    "TXXX:ALBUMARTISTS",
    "TXXX:ALBUM_ARTISTS",
    "TXXX:ALBUM ARTISTS",
    "TPE2",
    "TXXX:ALBUMARTIST",
    "TXXX:ALBUM ARTIST",
];

const ALBUM_ARTIST_SORT: &[&str] = &[
    "ALBUMARTISTSSORT",
    "ALBUMARTISTS_SORT",
    "ALBUMARTISTS SORT",
    "ALBUMARTISTSORT",
    "ALBUM ARTIST SORT",
    "----:COM.APPLE.ITUNES:ALBUMARTISTSSORT",
    "----:COM.APPLE.ITUNES:ALBUMARTISTS_SORT",
    "----:COM.APPLE.ITUNES:ALBUMARTISTS SORT",
    "----:COM.APPLE.ITUNES:ALBUMARTISTSORT",
    "soaa",
    "----:COM.APPLE.ITUNES:ALBUM ARTIST SORT",
    "TXXX:ALBUMARTISTSSORT",
    "TXXX:ALBUMARTISTS_SORT",
    "TXXX:ALBUMARTISTS SORT",
    "TXXX:ALBUMARTISTSORT",
    "TSO2",
    "TXXX:ALBUM ARTIST SORT",
];

const GENRE: &[&str] = &["GENRE", "©gen", "gnre", "TCON"];

const R128_TRACK_GAIN: &[&str] = &["R128_TRACK_GAIN"];
const R128_ALBUM_GAIN: &[&str] = &["R128_ALBUM_GAIN"];
const REPLAYGAIN_TRACK_GAIN: &[&str] = &[
    "REPLAYGAIN_TRACK_GAIN",
    "----:COM.APPLE.ITUNES:REPLAYGAIN_TRACK_GAIN",
    "TXXX:REPLAYGAIN_TRACK_GAIN",
];
const REPLAYGAIN_ALBUM_GAIN: &[&str] = &[
    "REPLAYGAIN_ALBUM_GAIN",
    "----:COM.APPLE.ITUNES:REPLAYGAIN_ALBUM_GAIN",
    "TXXX:REPLAYGAIN_ALBUM_GAIN",
];

/// Resolves the raw tag bundle into named fields. Never fails: anything unparseable is left
/// empty.
pub fn parse_tags(metadata: &Metadata) -> ParsedTags {
    let tags = &metadata.tags;
    ParsedTags {
        music_brainz_id: first(tags, MUSICBRAINZ_TRACK_ID),
        name: first(tags, TITLE),
        sort_name: first(tags, TITLE_SORT),
        duration_ms: metadata.properties.duration_ms,
        track: first(tags, TRACK).and_then(|value| parse_position(&value)),
        disc: first(tags, DISC).and_then(|value| parse_position(&value)),
        subtitle: first(tags, DISC_SUBTITLE),
        date: first(tags, DATE)
            .and_then(|value| Date::parse(&value))
            .or_else(|| id3v23_date(tags)),
        album_music_brainz_id: first(tags, MUSICBRAINZ_ALBUM_ID),
        album_name: first(tags, ALBUM),
        album_sort_name: first(tags, ALBUM_SORT),
        release_types: all(tags, RELEASE_TYPE),
        artist_music_brainz_ids: all(tags, MUSICBRAINZ_ARTIST_ID),
        artist_names: all(tags, ARTIST),
        artist_sort_names: all(tags, ARTIST_SORT),
        album_artist_music_brainz_ids: all(tags, MUSICBRAINZ_ALBUM_ARTIST_ID),
        album_artist_names: all(tags, ALBUM_ARTIST),
        album_artist_sort_names: all(tags, ALBUM_ARTIST_SORT),
        genre_names: all(tags, GENRE),
        replay_gain: ReplayGainAdjustment {
            track: r128_adjustment(tags, R128_TRACK_GAIN)
                .or_else(|| replay_gain_adjustment(tags, REPLAYGAIN_TRACK_GAIN)),
            album: r128_adjustment(tags, R128_ALBUM_GAIN)
                .or_else(|| replay_gain_adjustment(tags, REPLAYGAIN_ALBUM_GAIN)),
        },
    }
}

fn first(tags: &RawTags, keys: &[&str]) -> Option<String> {
    tags.first_of(keys)
        .and_then(|values| values.first())
        .cloned()
}

fn all(tags: &RawTags, keys: &[&str]) -> Vec<String> {
    tags.first_of(keys).map(<[String]>::to_vec).unwrap_or_default()
}

/// Reads `n` or `n/total`, rejecting zero.
fn parse_position(text: &str) -> Option<u32> {
    let head = text.split('/').next().unwrap_or(text).trim();
    head.parse::<u32>().ok().filter(|value| *value > 0)
}

fn gain_value(text: &str) -> Option<f32> {
    let filtered: String = text
        .chars()
        .filter(|ch| ch.is_ascii_digit() || *ch == '.' || *ch == '-')
        .collect();
    filtered
        .parse::<f32>()
        .ok()
        .filter(|value| *value != 0.0 && value.is_finite())
}

fn r128_adjustment(tags: &RawTags, keys: &[&str]) -> Option<f32> {
    // Q7.8 fixed point relative to -23 LUFS; shift onto the -18 LUFS ReplayGain reference.
    first(tags, keys)
        .and_then(|value| gain_value(&value))
        .map(|value| value / 256.0 + 5.0)
}

fn replay_gain_adjustment(tags: &RawTags, keys: &[&str]) -> Option<f32> {
    first(tags, keys).and_then(|value| gain_value(&value))
}

/// ID3v2.3 spreads a date over TORY/TYER (year), TDAT (DDMM) and TIME (HHMM).
fn id3v23_date(tags: &RawTags) -> Option<Date> {
    let year = first(tags, &["TORY"])
        .and_then(|value| value.parse::<u32>().ok())
        .or_else(|| first(tags, &["TYER"]).and_then(|value| value.parse::<u32>().ok()))?;

    let Some((day, month)) = first(tags, &["TDAT"]).and_then(|value| split_four_digits(&value))
    else {
        return Date::from_year(i64::from(year));
    };
    match first(tags, &["TIME"]).and_then(|value| split_four_digits(&value)) {
        Some((hour, minute)) => Date::from_ymdhm(year, month, day, hour, minute),
        None => Date::from_ymd(year, month, day),
    }
}

fn split_four_digits(text: &str) -> Option<(u32, u32)> {
    if text.len() != 4 || !text.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    Some((text[..2].parse().ok()?, text[2..].parse().ok()?))
}
