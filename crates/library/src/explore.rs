use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use common::{relpath_from, DeviceFile};
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::playlist::{is_playlist_mime, parse_m3u, RawPlaylist};

/// A directory tree the user granted access to. `name` prefixes the logical path of every
/// file found under `root`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MusicLocation {
    pub name: String,
    pub root: PathBuf,
}

impl MusicLocation {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }

    pub fn uri(&self) -> String {
        file_uri(&self.root)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FsEntry {
    File(DeviceFile),
    Directory(String),
}

/// Tree traversal over music locations.
pub trait Storage: Send + Sync {
    /// Lists every entry under `locations`. Nothing is walked until the stream is polled.
    fn explore(&self, locations: Vec<MusicLocation>) -> BoxStream<'static, FsEntry>;

    /// Reads a text file found by `explore`.
    fn read_text(&self, file: &DeviceFile) -> std::io::Result<String> {
        match file.local_path() {
            Some(path) => std::fs::read_to_string(path),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("not a local file: {}", file.uri),
            )),
        }
    }
}

/// Local filesystem storage backed by walkdir.
#[derive(Debug, Default, Clone, Copy)]
pub struct WalkDirStorage;

impl Storage for WalkDirStorage {
    fn explore(&self, locations: Vec<MusicLocation>) -> BoxStream<'static, FsEntry> {
        stream::once(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::task::spawn_blocking(move || {
                for location in &locations {
                    if !walk_location(location, &tx) {
                        break;
                    }
                }
            });
            UnboundedReceiverStream::new(rx)
        })
        .flatten()
        .boxed()
    }
}

/// Returns false once the receiving side has gone away.
fn walk_location(location: &MusicLocation, tx: &mpsc::UnboundedSender<FsEntry>) -> bool {
    for entry in WalkDir::new(&location.root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!("Skipping unreadable entry under {:?}: {}", location.root, err);
                continue;
            }
        };
        let Some(relpath) = relpath_from(&location.root, entry.path()) else {
            continue;
        };
        let path = if relpath.is_empty() {
            location.name.clone()
        } else {
            format!("{}/{}", location.name, relpath)
        };

        let item = if entry.file_type().is_dir() {
            FsEntry::Directory(path)
        } else if entry.file_type().is_file() {
            match device_file(entry.path(), path) {
                Some(file) => FsEntry::File(file),
                None => continue,
            }
        } else {
            continue;
        };
        if tx.send(item).is_err() {
            return false;
        }
    }
    true
}

fn device_file(local: &Path, path: String) -> Option<DeviceFile> {
    let meta = match local.metadata() {
        Ok(meta) => meta,
        Err(err) => {
            debug!("Failed to stat {:?}: {}", local, err);
            return None;
        }
    };
    let modified_ms = meta
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0);
    Some(DeviceFile {
        uri: file_uri(local),
        mime_type: mime_guess::from_path(local)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
        path,
        size: meta.len(),
        modified_ms,
    })
}

fn file_uri(path: &Path) -> String {
    let absolute = path
        .canonicalize()
        .unwrap_or_else(|_| path.to_path_buf());
    format!("file://{}", absolute.to_string_lossy())
}

/// A discovered file routed to its extraction path.
#[derive(Clone, Debug, PartialEq)]
pub enum Explored {
    Audio(DeviceFile),
    /// Playlists are fully read here; they have no cache layer.
    Playlist(RawPlaylist),
}

/// Turns raw traversal output into audio files and parsed playlists. Everything else is
/// dropped.
pub struct ExploreStep {
    storage: Arc<dyn Storage>,
}

impl ExploreStep {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn explore(&self, locations: Vec<MusicLocation>) -> BoxStream<'static, Explored> {
        let storage = self.storage.clone();
        self.storage
            .explore(locations)
            .filter_map(move |entry| {
                let storage = storage.clone();
                async move {
                    let FsEntry::File(file) = entry else {
                        return None;
                    };
                    // Playlist mimes first: audio/x-mpegurl also carries the audio prefix.
                    if is_playlist_mime(&file.mime_type) {
                        read_playlist(storage, file).await.map(Explored::Playlist)
                    } else if file.mime_type.starts_with("audio/") {
                        Some(Explored::Audio(file))
                    } else {
                        None
                    }
                }
            })
            .boxed()
    }
}

async fn read_playlist(storage: Arc<dyn Storage>, file: DeviceFile) -> Option<RawPlaylist> {
    let result = tokio::task::spawn_blocking(move || {
        let text = storage.read_text(&file);
        (file, text)
    })
    .await;
    match result {
        Ok((file, Ok(text))) => Some(parse_m3u(&file, &text)),
        Ok((file, Err(err))) => {
            warn!("Failed to read playlist {}: {}", file.uri, err);
            None
        }
        Err(err) => {
            warn!("Playlist read task failed: {}", err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ExploreStep, Explored, FsEntry, MusicLocation, Storage, WalkDirStorage};
    use common::DeviceFile;
    use futures_util::stream::{self, BoxStream, StreamExt};
    use std::sync::Arc;

    struct FixedStorage {
        entries: Vec<FsEntry>,
    }

    impl Storage for FixedStorage {
        fn explore(&self, _locations: Vec<MusicLocation>) -> BoxStream<'static, FsEntry> {
            stream::iter(self.entries.clone()).boxed()
        }

        fn read_text(&self, _file: &DeviceFile) -> std::io::Result<String> {
            Ok("#EXTM3U\nA.mp3\n".to_string())
        }
    }

    fn file(path: &str, mime: &str) -> DeviceFile {
        DeviceFile {
            uri: format!("file:///music/{}", path),
            mime_type: mime.to_string(),
            path: format!("Music/{}", path),
            size: 1,
            modified_ms: 1,
        }
    }

    #[tokio::test]
    async fn routes_audio_and_playlists_and_drops_the_rest() {
        let storage = FixedStorage {
            entries: vec![
                FsEntry::Directory("Music".to_string()),
                FsEntry::File(file("A.mp3", "audio/mpeg")),
                FsEntry::File(file("cover.jpg", "image/jpeg")),
                FsEntry::File(file("mix.m3u", "audio/x-mpegurl")),
            ],
        };
        let step = ExploreStep::new(Arc::new(storage));
        let explored: Vec<Explored> = step.explore(Vec::new()).collect().await;

        assert_eq!(explored.len(), 2);
        assert_eq!(explored[0], Explored::Audio(file("A.mp3", "audio/mpeg")));
        match &explored[1] {
            Explored::Playlist(playlist) => {
                assert_eq!(playlist.name, "mix");
                assert_eq!(playlist.entries, ["Music/A.mp3"]);
            }
            other => panic!("expected playlist, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn walks_local_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Alpha")).unwrap();
        std::fs::write(dir.path().join("Alpha/A.mp3"), b"not really audio").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hi").unwrap();

        let location = MusicLocation::new("Music", dir.path());
        let entries: Vec<FsEntry> = WalkDirStorage.explore(vec![location]).collect().await;

        let files: Vec<&DeviceFile> = entries
            .iter()
            .filter_map(|entry| match entry {
                FsEntry::File(file) => Some(file),
                FsEntry::Directory(_) => None,
            })
            .collect();
        let song = files
            .iter()
            .find(|file| file.path == "Music/Alpha/A.mp3")
            .unwrap();
        assert_eq!(song.mime_type, "audio/mpeg");
        assert_eq!(song.size, 16);
        assert!(song.uri.starts_with("file://"));
        assert!(entries.contains(&FsEntry::Directory("Music/Alpha".to_string())));
        assert_eq!(files.len(), 2);
    }
}
