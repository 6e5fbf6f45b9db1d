use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod date;
mod uid;

pub use date::{Date, DateRange};
pub use uid::{parse_mbid, MusicKind, Uid, UidFormat, UidHasher, UidParseError};

/// A file found while exploring a music location.
///
/// `path` is the logical path: the location name followed by the slash separated path relative
/// to the location root.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceFile {
    pub uri: String,
    pub mime_type: String,
    pub path: String,
    pub size: u64,
    pub modified_ms: u64,
}

impl DeviceFile {
    /// Final component of the logical path, extension included.
    pub fn name(&self) -> &str {
        match self.path.rfind('/') {
            Some(idx) => &self.path[idx + 1..],
            None => &self.path,
        }
    }

    /// File name with only its last extension removed.
    pub fn stem(&self) -> &str {
        let name = self.name();
        match name.rfind('.') {
            Some(idx) if idx > 0 => &name[..idx],
            _ => name,
        }
    }

    /// Name of the directory holding the file, or the location name for top level files.
    pub fn directory_name(&self) -> &str {
        let parent = self.directory();
        match parent.rfind('/') {
            Some(idx) => &parent[idx + 1..],
            None => parent,
        }
    }

    /// Logical path of the containing directory.
    pub fn directory(&self) -> &str {
        match self.path.rfind('/') {
            Some(idx) => &self.path[..idx],
            None => "",
        }
    }

    /// Local filesystem path for `file://` uris.
    pub fn local_path(&self) -> Option<PathBuf> {
        self.uri.strip_prefix("file://").map(PathBuf::from)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioProperties {
    pub mime_type: String,
    pub duration_ms: u64,
    pub bitrate_kbps: Option<u32>,
    pub sample_rate_hz: Option<u32>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayGainAdjustment {
    pub track: Option<f32>,
    pub album: Option<f32>,
}

/// Tag fields resolved from whichever spelling the container happened to use.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedTags {
    pub music_brainz_id: Option<String>,
    pub name: Option<String>,
    pub sort_name: Option<String>,
    pub duration_ms: u64,
    pub track: Option<u32>,
    pub disc: Option<u32>,
    pub subtitle: Option<String>,
    pub date: Option<Date>,
    pub album_music_brainz_id: Option<String>,
    pub album_name: Option<String>,
    pub album_sort_name: Option<String>,
    pub release_types: Vec<String>,
    pub artist_music_brainz_ids: Vec<String>,
    pub artist_names: Vec<String>,
    pub artist_sort_names: Vec<String>,
    pub album_artist_music_brainz_ids: Vec<String>,
    pub album_artist_names: Vec<String>,
    pub album_artist_sort_names: Vec<String>,
    pub genre_names: Vec<String>,
    pub replay_gain: ReplayGainAdjustment,
}

pub fn stable_id(input: impl AsRef<[u8]>) -> String {
    blake3::hash(input.as_ref()).to_hex().to_string()
}

pub fn relpath_from(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    Some(path_to_slash_string(rel))
}

/// Resolves `relpath` against the logical directory `base`, collapsing `.` and `..` segments
/// and treating backslashes as separators. Returns `None` when `..` escapes the location.
pub fn resolve_relpath(base: &str, relpath: &str) -> Option<String> {
    let relpath = relpath.replace('\\', "/");
    let mut parts: Vec<&str> = base.split('/').filter(|part| !part.is_empty()).collect();
    for part in relpath.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                // The first segment is the location name and can't be left.
                if parts.len() <= 1 {
                    return None;
                }
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}

fn path_to_slash_string(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    parts.join("/")
}
