use common::{resolve_relpath, DeviceFile};
use tracing::debug;
use urlencoding::decode;

/// Mime types treated as M3U playlists.
pub const PLAYLIST_MIME_TYPES: [&str; 4] = [
    "audio/x-mpegurl",
    "audio/mpegurl",
    "application/x-mpegurl",
    "application/vnd.apple.mpegurl",
];

pub fn is_playlist_mime(mime: &str) -> bool {
    PLAYLIST_MIME_TYPES
        .iter()
        .any(|known| mime.eq_ignore_ascii_case(known))
}

/// A playlist file read from disk, before its entries are matched to songs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawPlaylist {
    pub file: DeviceFile,
    pub name: String,
    /// Logical paths of the entries, in playlist order.
    pub entries: Vec<String>,
}

/// Parses M3U/M3U8 text. Relative entries are resolved against the playlist's own directory.
/// Absolute paths and `file://` urls are mapped onto the playlist's music location, and entries
/// outside of it or with any other scheme are skipped.
pub fn parse_m3u(file: &DeviceFile, text: &str) -> RawPlaylist {
    let mut name = None;
    let mut entries = Vec::new();
    let base = file.directory();
    let location = location_root(file);

    for line in text.lines() {
        let line = line.trim_start_matches('\u{feff}').trim();
        if line.is_empty() {
            continue;
        }
        if let Some(title) = line.strip_prefix("#PLAYLIST:") {
            let title = title.trim();
            if !title.is_empty() {
                name = Some(title.to_string());
            }
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        let Some(entry) = local_entry(line) else {
            debug!("Skipping unresolvable entry {:?} in {}", line, file.uri);
            continue;
        };
        let resolved = if is_absolute(&entry) {
            location
                .as_ref()
                .and_then(|(root, name)| absolute_entry(root, name, &entry))
        } else {
            resolve_relpath(base, &entry)
        };
        match resolved {
            Some(path) => entries.push(path),
            None => debug!("Entry {:?} is outside the location of {}", line, file.uri),
        }
    }

    RawPlaylist {
        file: file.clone(),
        name: name.unwrap_or_else(|| file.stem().to_string()),
        entries,
    }
}

/// Local directory of the location holding `file`, and that location's logical name.
fn location_root(file: &DeviceFile) -> Option<(String, &str)> {
    let local = file.uri.strip_prefix("file://")?.replace('\\', "/");
    let (name, rel) = file.path.split_once('/')?;
    let root = local.strip_suffix(rel)?.strip_suffix('/')?;
    Some((root.to_string(), name))
}

/// Turns a line into a filesystem path, decoding `file://` urls. Other urls yield `None`.
fn local_entry(line: &str) -> Option<String> {
    if let Some(rest) = line.strip_prefix("file://") {
        let rest = rest.strip_prefix("localhost").unwrap_or(rest);
        return decode(rest).ok().map(|path| path.into_owned());
    }
    if line.contains("://") {
        return None;
    }
    Some(line.to_string())
}

fn is_absolute(entry: &str) -> bool {
    entry.starts_with('/') || entry.starts_with('\\') || entry.get(1..2) == Some(":")
}

fn absolute_entry(root: &str, name: &str, entry: &str) -> Option<String> {
    let entry = entry.replace('\\', "/");
    let rel = entry.strip_prefix(root)?.strip_prefix('/')?;
    resolve_relpath(name, rel)
}
