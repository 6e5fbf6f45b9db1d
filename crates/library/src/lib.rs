use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod cache;
mod covers;
mod explore;
mod extract;
mod fanout;
mod graph;
mod interpret;
mod model;
mod naming;
mod playlist;

pub use cache::{next_added_ms, Cache, CacheError, CacheResult, CachedSong, CACHE_VERSION};
pub use covers::{image_ext_from_mime, Cover, CoverError, CoverResult, Covers, NoCovers, StoredCovers};
pub use explore::{ExploreStep, Explored, FsEntry, MusicLocation, Storage, WalkDirStorage};
pub use extract::{Extracted, ExtractStep, LoftyExtractor, MetadataExtractor, RawSong, DEFAULT_LANES};
pub use fanout::{distribute, divert, drive, Distributed, Divert, Diverted};
pub use graph::GraphBuilder;
pub use interpret::{
    Interpretation, InvalidSong, PreAlbum, PreArtist, PreGenre, PrePlaylist, PreSong,
    TagInterpreter,
};
pub use model::{Album, Artist, Genre, Library, Playlist, PlaylistError, Song};
pub use naming::{Name, Naming, Placeholder, Separators};
pub use playlist::{is_playlist_mime, parse_m3u, RawPlaylist, PLAYLIST_MIME_TYPES};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Number of extraction lanes.
    pub lanes: usize,
    /// Cache namespace. Changing it invalidates every cached entry.
    pub silo: String,
    pub interpretation: Interpretation,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            lanes: DEFAULT_LANES,
            silo: "default".to_string(),
            interpretation: Interpretation::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexingProgress {
    /// Songs linked so far out of the files discovered so far.
    Songs { loaded: usize, explored: usize },
    /// Discovery and extraction are done and the graph is being finalized.
    Indeterminate,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub uri: String,
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    /// Audio and playlist files discovered.
    pub explored: usize,
    /// Songs that came out of extraction, cached or not.
    pub extracted: usize,
    pub cached_hits: usize,
    pub skipped: Vec<SkippedFile>,
}

#[derive(Clone, Debug)]
pub struct IndexResult {
    pub library: Library,
    pub report: IndexReport,
}

/// Runs discovery, extraction and graph building over a set of music locations.
pub struct Indexer {
    explore: ExploreStep,
    extract: ExtractStep,
    interpreter: TagInterpreter,
}

impl Indexer {
    pub fn new(
        storage: Arc<dyn Storage>,
        extractor: Arc<dyn MetadataExtractor>,
        cache: Cache,
        covers: Arc<dyn Covers>,
        config: IndexerConfig,
    ) -> Self {
        Self {
            explore: ExploreStep::new(storage),
            extract: ExtractStep::new(extractor, cache, covers, config.lanes),
            interpreter: TagInterpreter::new(config.interpretation),
        }
    }

    /// Local filesystem indexer. Cover art is dropped when `covers_dir` is `None`.
    pub fn open(
        cache_path: &Path,
        covers_dir: Option<&Path>,
        config: IndexerConfig,
    ) -> Result<Self, IndexError> {
        let cache = Cache::open(cache_path, &config.silo)?;
        let covers: Arc<dyn Covers> = match covers_dir {
            Some(dir) => Arc::new(StoredCovers::open(dir)?),
            None => Arc::new(NoCovers),
        };
        Ok(Self::new(
            Arc::new(WalkDirStorage),
            Arc::new(LoftyExtractor),
            cache,
            covers,
            config,
        ))
    }

    /// Indexes `locations` into a fresh library.
    ///
    /// Per-file failures never fail the run; they end up in the report. When `cancel` fires the
    /// run stops with [`IndexError::Cancelled`] and the cache is left unpruned.
    pub async fn run<F>(
        &self,
        locations: Vec<MusicLocation>,
        cancel: &CancellationToken,
        mut progress: F,
    ) -> Result<IndexResult, IndexError>
    where
        F: FnMut(IndexingProgress) + Send,
    {
        info!("Indexing {} locations", locations.len());
        let explored_count = Arc::new(AtomicUsize::new(0));
        let counter = explored_count.clone();
        let explored = self
            .explore
            .explore(locations)
            .inspect(move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            })
            .boxed();
        let mut extracted = self.extract.extract(explored, cancel.clone());

        let mut graph = GraphBuilder::new();
        let mut report = IndexReport::default();
        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => return Err(IndexError::Cancelled),
                item = extracted.next() => item,
            };
            let Some(item) = item else {
                break;
            };
            match item {
                Extracted::Song(song) => {
                    report.extracted += 1;
                    if song.from_cache {
                        report.cached_hits += 1;
                    }
                    match self.interpreter.interpret(&song) {
                        Ok(pre) => {
                            graph.add_song(pre);
                        }
                        Err(reason) => {
                            warn!("Skipping {}: {}", song.file.path, reason);
                            report.skipped.push(SkippedFile {
                                uri: song.file.uri,
                                reason: reason.to_string(),
                            });
                        }
                    }
                    progress(IndexingProgress::Songs {
                        loaded: graph.song_count(),
                        explored: explored_count.load(Ordering::Relaxed),
                    });
                }
                Extracted::Playlist(playlist) => {
                    graph.add_playlist(self.interpreter.interpret_playlist(&playlist));
                }
                Extracted::Invalid { file, reason } => {
                    report.skipped.push(SkippedFile {
                        uri: file.uri,
                        reason,
                    });
                }
            }
        }
        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }

        report.explored = explored_count.load(Ordering::Relaxed);
        progress(IndexingProgress::Indeterminate);
        let library = tokio::task::spawn_blocking(move || graph.build()).await?;
        info!(
            "Indexed {} songs ({} cached, {} skipped)",
            library.songs().len(),
            report.cached_hits,
            report.skipped.len()
        );
        Ok(IndexResult { library, report })
    }
}

#[derive(Debug)]
pub enum IndexError {
    Cache(CacheError),
    Covers(CoverError),
    Join(tokio::task::JoinError),
    Cancelled,
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexError::Cache(err) => write!(f, "cache error: {}", err),
            IndexError::Covers(err) => write!(f, "cover error: {}", err),
            IndexError::Join(err) => write!(f, "task error: {}", err),
            IndexError::Cancelled => write!(f, "indexing cancelled"),
        }
    }
}

impl std::error::Error for IndexError {}

impl From<CacheError> for IndexError {
    fn from(err: CacheError) -> Self {
        IndexError::Cache(err)
    }
}

impl From<CoverError> for IndexError {
    fn from(err: CoverError) -> Self {
        IndexError::Covers(err)
    }
}

impl From<tokio::task::JoinError> for IndexError {
    fn from(err: tokio::task::JoinError) -> Self {
        IndexError::Join(err)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Cache, CacheResult, FsEntry, IndexError, Indexer, IndexerConfig, IndexingProgress,
        MetadataExtractor, MusicLocation, NoCovers, Storage,
    };
    use common::{AudioProperties, DeviceFile};
    use futures_util::stream::{self, BoxStream, StreamExt};
    use metadata::{Metadata, MetadataError, RawTags};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    /// Serves whatever files the test put in it.
    #[derive(Default)]
    struct MemoryStorage {
        files: Mutex<Vec<DeviceFile>>,
        texts: HashMap<String, String>,
    }

    impl MemoryStorage {
        fn set(&self, files: &[DeviceFile]) {
            *self.files.lock() = files.to_vec();
        }
    }

    impl Storage for MemoryStorage {
        fn explore(&self, _locations: Vec<MusicLocation>) -> BoxStream<'static, FsEntry> {
            let entries: Vec<FsEntry> = self.files.lock().iter().cloned().map(FsEntry::File).collect();
            stream::iter(entries).boxed()
        }

        fn read_text(&self, file: &DeviceFile) -> std::io::Result<String> {
            self.texts
                .get(&file.uri)
                .cloned()
                .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotFound))
        }
    }

    /// Tags keyed by uri. Files without an entry fail to decode.
    #[derive(Default)]
    struct TagTable {
        tags: HashMap<String, Vec<(&'static str, &'static str)>>,
    }

    impl MetadataExtractor for TagTable {
        fn extract(&self, file: &DeviceFile) -> Result<Metadata, MetadataError> {
            let tags = self.tags.get(&file.uri).ok_or(MetadataError::NoAudio)?;
            Ok(Metadata {
                properties: AudioProperties {
                    mime_type: file.mime_type.clone(),
                    duration_ms: 1000,
                    bitrate_kbps: Some(256),
                    sample_rate_hz: Some(48_000),
                },
                tags: tags.iter().copied().collect::<RawTags>(),
                cover: None,
            })
        }
    }

    fn file(path: &str, mime: &str) -> DeviceFile {
        DeviceFile {
            uri: format!("file:///{}", path),
            mime_type: mime.to_string(),
            path: path.to_string(),
            size: 1,
            modified_ms: 1,
        }
    }

    fn scenario() -> (DeviceFile, DeviceFile, TagTable) {
        let a = file("Music/Alpha/A.mp3", "audio/mpeg");
        let b = file("Music/Alpha/B.mp3", "audio/mpeg");
        let mut table = TagTable::default();
        table.tags.insert(
            a.uri.clone(),
            vec![("TITLE", "Song1"), ("ALBUM", "Alpha"), ("ARTIST", "X")],
        );
        table.tags.insert(
            b.uri.clone(),
            vec![("TITLE", "Song2"), ("ALBUM", "Alpha"), ("ARTIST", "X")],
        );
        (a, b, table)
    }

    fn indexer(cache_path: &Path, storage: Arc<MemoryStorage>, table: TagTable) -> (Indexer, Cache) {
        let cache = Cache::open(cache_path, "default").unwrap();
        let indexer = Indexer::new(
            storage,
            Arc::new(table),
            cache.clone(),
            Arc::new(NoCovers),
            IndexerConfig::default(),
        );
        (indexer, cache)
    }

    #[tokio::test]
    async fn indexes_one_album_by_one_artist() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b, table) = scenario();
        let storage = Arc::new(MemoryStorage::default());
        storage.set(&[a, b]);
        let (indexer, _cache) = indexer(&dir.path().join("cache.redb"), storage, table);

        let mut updates = Vec::new();
        let result = indexer
            .run(Vec::new(), &CancellationToken::new(), |update| updates.push(update))
            .await
            .unwrap();

        let library = result.library;
        assert_eq!(library.songs().len(), 2);
        assert_eq!(library.albums().len(), 1);
        let album = &library.albums()[0];
        assert_eq!(album.name.to_string(), "Alpha");
        assert_eq!(album.songs.len(), 2);
        assert_eq!(library.artists().len(), 1);
        assert_eq!(library.artists()[0].name.to_string(), "X");
        assert_eq!(library.artists()[0].explicit_albums, [album.uid]);

        assert_eq!(result.report.explored, 2);
        assert_eq!(result.report.extracted, 2);
        assert_eq!(result.report.cached_hits, 0);
        assert_eq!(updates.last(), Some(&IndexingProgress::Indeterminate));
        assert!(updates.contains(&IndexingProgress::Songs {
            loaded: 2,
            explored: 2
        }));
    }

    #[tokio::test]
    async fn rescans_are_served_from_cache_with_stable_identities() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b, table) = scenario();
        let storage = Arc::new(MemoryStorage::default());
        storage.set(&[a, b]);
        let (indexer, _cache) = indexer(&dir.path().join("cache.redb"), storage, table);

        let cancel = CancellationToken::new();
        let first = indexer.run(Vec::new(), &cancel, |_| {}).await.unwrap();
        let second = indexer.run(Vec::new(), &cancel, |_| {}).await.unwrap();

        assert_eq!(second.report.cached_hits, 2);
        let uids = |library: &super::Library| {
            library.songs().iter().map(|song| song.uid).collect::<Vec<_>>()
        };
        assert_eq!(uids(&first.library), uids(&second.library));
        assert_eq!(first.library.albums()[0].uid, second.library.albums()[0].uid);
    }

    #[tokio::test]
    async fn files_gone_from_discovery_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b, table) = scenario();
        let storage = Arc::new(MemoryStorage::default());
        storage.set(&[a.clone(), b.clone()]);
        let (indexer, cache) = indexer(&dir.path().join("cache.redb"), storage.clone(), table);
        let cancel = CancellationToken::new();
        indexer.run(Vec::new(), &cancel, |_| {}).await.unwrap();

        storage.set(&[a.clone()]);
        let result = indexer.run(Vec::new(), &cancel, |_| {}).await.unwrap();

        assert_eq!(result.library.songs().len(), 1);
        assert!(matches!(cache.read(&a), CacheResult::Hit(_)));
        assert_eq!(cache.read(&b), CacheResult::Miss(b));
    }

    #[tokio::test]
    async fn expands_id3_genres() {
        let dir = tempfile::tempdir().unwrap();
        let c = file("Music/Beta/C.mp3", "audio/mpeg");
        let mut table = TagTable::default();
        table.tags.insert(
            c.uri.clone(),
            vec![("TITLE", "Drift"), ("ARTIST", "Y"), ("GENRE", "(176)(178)(RX)")],
        );
        let storage = Arc::new(MemoryStorage::default());
        storage.set(&[c]);
        let (indexer, _cache) = indexer(&dir.path().join("cache.redb"), storage, table);

        let result = indexer
            .run(Vec::new(), &CancellationToken::new(), |_| {})
            .await
            .unwrap();
        let library = result.library;
        let song = &library.songs()[0];
        let genres: Vec<String> = song
            .genres
            .iter()
            .map(|uid| library.find_genre(uid).unwrap().name.to_string())
            .collect();
        assert_eq!(genres, ["Post-Rock", "Shoegaze", "Remix"]);
        assert_eq!(library.find_album(&song.album).unwrap().name.to_string(), "Beta");
    }

    #[tokio::test]
    async fn reports_skipped_files_and_imports_playlists() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b, table) = scenario();
        let broken = file("Music/Alpha/broken.mp3", "audio/mpeg");
        let mix = file("Music/mix.m3u", "audio/x-mpegurl");
        let cover = file("Music/Alpha/cover.jpg", "image/jpeg");
        let mut storage = MemoryStorage::default();
        storage.texts.insert(
            mix.uri.clone(),
            "#EXTM3U\nAlpha/B.mp3\nAlpha/broken.mp3\n".to_string(),
        );
        storage.set(&[a, b.clone(), broken.clone(), mix, cover]);
        let (indexer, _cache) = indexer(&dir.path().join("cache.redb"), Arc::new(storage), table);

        let result = indexer
            .run(Vec::new(), &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(result.report.explored, 4);
        assert_eq!(result.report.skipped.len(), 1);
        assert_eq!(result.report.skipped[0].uri, broken.uri);
        let playlist = result.library.find_playlist_by_name("mix").unwrap();
        let song_b = result.library.find_song_by_path(&b.path).unwrap();
        assert_eq!(playlist.songs, [song_b.uid]);
    }

    #[tokio::test]
    async fn cancelled_runs_fail_and_keep_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b, table) = scenario();
        let storage = Arc::new(MemoryStorage::default());
        storage.set(&[a.clone(), b]);
        let (indexer, cache) = indexer(&dir.path().join("cache.redb"), storage.clone(), table);
        indexer
            .run(Vec::new(), &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        storage.set(&[]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = indexer.run(Vec::new(), &cancel, |_| {}).await;

        assert!(matches!(result, Err(IndexError::Cancelled)));
        assert!(matches!(cache.read(&a), CacheResult::Hit(_)));
    }
}
