use std::collections::HashSet;
use std::sync::Arc;

use common::{AudioProperties, DeviceFile, ParsedTags};
use futures_util::stream::{self, BoxStream, StreamExt};
use metadata::{parse_tags, read_metadata, Metadata, MetadataError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{next_added_ms, Cache, CacheResult, CachedSong};
use crate::covers::{Cover, CoverResult, Covers};
use crate::explore::Explored;
use crate::fanout::{distribute, divert, drive, Divert};
use crate::playlist::RawPlaylist;

pub const DEFAULT_LANES: usize = 8;

/// Decodes audio properties and tags.
pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, file: &DeviceFile) -> Result<Metadata, MetadataError>;
}

/// Reads local files with lofty.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoftyExtractor;

impl MetadataExtractor for LoftyExtractor {
    fn extract(&self, file: &DeviceFile) -> Result<Metadata, MetadataError> {
        let path = file.local_path().ok_or_else(|| {
            MetadataError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("not a local file: {}", file.uri),
            ))
        })?;
        read_metadata(&path, &file.mime_type)
    }
}

/// A song with everything known about its file, whether freshly decoded or cached.
#[derive(Clone, Debug, PartialEq)]
pub struct RawSong {
    pub file: DeviceFile,
    pub properties: AudioProperties,
    pub tags: ParsedTags,
    pub cover: Option<Cover>,
    pub added_ms: u64,
    pub from_cache: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Extracted {
    Song(RawSong),
    Playlist(RawPlaylist),
    /// A file that couldn't be decoded. It is left out of the library and the cache.
    Invalid { file: DeviceFile, reason: String },
}

#[derive(Clone)]
struct LaneContext {
    extractor: Arc<dyn MetadataExtractor>,
    cache: Cache,
    covers: Arc<dyn Covers>,
}

/// Resolves discovered files into songs, consulting the cache and decoding on misses.
pub struct ExtractStep {
    context: LaneContext,
    lanes: usize,
}

impl ExtractStep {
    pub fn new(
        extractor: Arc<dyn MetadataExtractor>,
        cache: Cache,
        covers: Arc<dyn Covers>,
        lanes: usize,
    ) -> Self {
        Self {
            context: LaneContext {
                extractor,
                cache,
                covers,
            },
            lanes,
        }
    }

    /// Extracts every explored item. Audio is spread over the configured number of lanes, so
    /// output order is unspecified.
    ///
    /// Once the input is exhausted the cache and cover store are pruned down to what this run
    /// produced, unless `cancel` fired.
    pub fn extract(
        &self,
        explored: BoxStream<'static, Explored>,
        cancel: CancellationToken,
    ) -> BoxStream<'static, Extracted> {
        let by_kind = divert(explored, |item| match item {
            Explored::Playlist(playlist) => Divert::Left(playlist),
            Explored::Audio(file) => Divert::Right(file),
        });
        let playlists = by_kind
            .left
            .map(|playlist| Processed {
                extracted: Extracted::Playlist(playlist),
                retained: false,
            });

        let distributed = distribute(by_kind.right, self.lanes);
        let lanes = distributed.lanes.into_iter().map(|lane| {
            let context = self.context.clone();
            let cancel = cancel.clone();
            lane.filter_map(move |file| {
                let context = context.clone();
                let cancel = cancel.clone();
                async move { process_on_blocking(context, file, cancel).await }
            })
            .boxed()
        });
        let songs = stream::select_all(lanes);

        let merged = drive(
            by_kind.manager,
            drive(distributed.manager, stream::select(songs, playlists)),
        );

        let finisher = Finisher {
            inner: merged,
            context: self.context.clone(),
            cancel,
            retained: HashSet::new(),
            cover_ids: HashSet::new(),
        };
        stream::unfold(finisher, |mut finisher| async move {
            if finisher.cancel.is_cancelled() {
                return None;
            }
            match finisher.inner.next().await {
                Some(processed) => {
                    finisher.track(&processed);
                    Some((processed.extracted, finisher))
                }
                None => {
                    finisher.finish().await;
                    None
                }
            }
        })
        .boxed()
    }
}

/// Lane output. `retained` marks songs whose cache entry is current after this run.
struct Processed {
    extracted: Extracted,
    retained: bool,
}

struct Finisher {
    inner: BoxStream<'static, Processed>,
    context: LaneContext,
    cancel: CancellationToken,
    retained: HashSet<String>,
    cover_ids: HashSet<String>,
}

impl Finisher {
    fn track(&mut self, processed: &Processed) {
        let Extracted::Song(song) = &processed.extracted else {
            return;
        };
        if processed.retained {
            self.retained.insert(song.file.uri.clone());
        }
        if let Some(cover) = &song.cover {
            self.cover_ids.insert(cover.id.clone());
        }
    }

    async fn finish(self) {
        if self.cancel.is_cancelled() {
            return;
        }
        let Finisher {
            context,
            retained,
            cover_ids,
            ..
        } = self;
        let result = tokio::task::spawn_blocking(move || {
            match context.cache.cleanup(&retained) {
                Ok(removed) => debug!("Cache cleanup removed {} entries", removed),
                Err(err) => warn!("Failed to clean up cache: {}", err),
            }
            match context.covers.cleanup(&cover_ids) {
                Ok(removed) => debug!("Cover cleanup removed {} files", removed),
                Err(err) => warn!("Failed to clean up covers: {}", err),
            }
            info!(
                "Extraction finished with {} cached songs and {} covers",
                retained.len(),
                cover_ids.len()
            );
        })
        .await;
        if let Err(err) = result {
            warn!("Cleanup task failed: {}", err);
        }
    }
}

async fn process_on_blocking(
    context: LaneContext,
    file: DeviceFile,
    cancel: CancellationToken,
) -> Option<Processed> {
    let uri = file.uri.clone();
    match tokio::task::spawn_blocking(move || process(&context, file, &cancel)).await {
        Ok(processed) => processed,
        Err(err) => {
            warn!("Extraction task for {} failed: {}", uri, err);
            None
        }
    }
}

/// Cache lookup, then decode on a miss. Returns `None` only when cancelled before the cache
/// write, so no partial entry is ever stored.
fn process(context: &LaneContext, file: DeviceFile, cancel: &CancellationToken) -> Option<Processed> {
    if cancel.is_cancelled() {
        return None;
    }

    let added_ms = match context.cache.read(&file) {
        CacheResult::Hit(cached) => match reuse_cached(context, &file, cached) {
            Ok(song) => {
                return Some(Processed {
                    extracted: Extracted::Song(song),
                    retained: true,
                })
            }
            Err(added_ms) => added_ms,
        },
        CacheResult::Stale { added_ms, .. } => added_ms,
        CacheResult::Miss(_) => next_added_ms(),
    };

    let metadata = match context.extractor.extract(&file) {
        Ok(metadata) => metadata,
        Err(err) => {
            warn!("Failed to read tags for {:?}: {}", file.path, err);
            return Some(Processed {
                extracted: Extracted::Invalid {
                    file,
                    reason: err.to_string(),
                },
                retained: false,
            });
        }
    };
    let tags = parse_tags(&metadata);
    let cover = match context.covers.create(&file, &metadata) {
        Ok(result) => result.cover(),
        Err(err) => {
            warn!("Failed to store cover for {:?}: {}", file.path, err);
            None
        }
    };

    if cancel.is_cancelled() {
        return None;
    }
    let cached = CachedSong {
        file,
        properties: metadata.properties,
        tags,
        cover_id: cover.as_ref().map(|cover| cover.id.clone()),
        added_ms,
    };
    let retained = match context.cache.write(&cached) {
        Ok(()) => true,
        Err(err) => {
            warn!("Failed to cache {}: {}", cached.file.uri, err);
            false
        }
    };

    Some(Processed {
        extracted: Extracted::Song(RawSong {
            file: cached.file,
            properties: cached.properties,
            tags: cached.tags,
            cover,
            added_ms,
            from_cache: false,
        }),
        retained,
    })
}

/// Rebuilds a song from its cache entry. Fails with the entry's added time when the cover it
/// refers to is gone, in which case the file is decoded again.
fn reuse_cached(context: &LaneContext, file: &DeviceFile, cached: CachedSong) -> Result<RawSong, u64> {
    let cover = match cached.cover_id.as_deref() {
        None => None,
        Some(id) => match context.covers.obtain(id) {
            Ok(CoverResult::Hit(cover)) => Some(cover),
            Ok(CoverResult::Miss) => {
                debug!("Cover {} for {} vanished; re-extracting", id, file.uri);
                return Err(cached.added_ms);
            }
            Err(err) => {
                warn!("Failed to look up cover {}: {}", id, err);
                return Err(cached.added_ms);
            }
        },
    };
    Ok(RawSong {
        file: file.clone(),
        properties: cached.properties,
        tags: cached.tags,
        cover,
        added_ms: cached.added_ms,
        from_cache: true,
    })
}

#[cfg(test)]
mod tests {
    use super::{Extracted, ExtractStep, MetadataExtractor};
    use crate::cache::{Cache, CacheResult};
    use crate::covers::{NoCovers, StoredCovers};
    use crate::explore::Explored;
    use crate::playlist::RawPlaylist;
    use common::{AudioProperties, DeviceFile};
    use futures_util::stream::{self, StreamExt};
    use metadata::{CoverArt, Metadata, MetadataError, RawTags};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    /// Serves canned tags and counts decodes per uri.
    #[derive(Default)]
    struct FakeExtractor {
        titles: HashMap<String, String>,
        decodes: Mutex<HashMap<String, usize>>,
    }

    impl FakeExtractor {
        fn with(titles: &[(&DeviceFile, &str)]) -> Self {
            Self {
                titles: titles
                    .iter()
                    .map(|(file, title)| (file.uri.clone(), title.to_string()))
                    .collect(),
                decodes: Mutex::new(HashMap::new()),
            }
        }

        fn decodes(&self, file: &DeviceFile) -> usize {
            self.decodes.lock().get(&file.uri).copied().unwrap_or(0)
        }
    }

    impl MetadataExtractor for FakeExtractor {
        fn extract(&self, file: &DeviceFile) -> Result<Metadata, MetadataError> {
            *self.decodes.lock().entry(file.uri.clone()).or_default() += 1;
            let title = self.titles.get(&file.uri).ok_or(MetadataError::NoAudio)?;
            Ok(Metadata {
                properties: AudioProperties {
                    mime_type: "audio/mpeg".to_string(),
                    duration_ms: 1000,
                    bitrate_kbps: Some(320),
                    sample_rate_hz: Some(44_100),
                },
                tags: [("TITLE", title.as_str()), ("ALBUM", "Alpha"), ("ARTIST", "X")]
                    .into_iter()
                    .collect::<RawTags>(),
                cover: Some(CoverArt {
                    data: format!("cover of {}", title).into_bytes(),
                    mime: Some("image/png".to_string()),
                }),
            })
        }
    }

    fn file(name: &str, modified_ms: u64) -> DeviceFile {
        DeviceFile {
            uri: format!("file:///music/{}", name),
            mime_type: "audio/mpeg".to_string(),
            path: format!("Music/{}", name),
            size: 10,
            modified_ms,
        }
    }

    async fn run(step: &ExtractStep, files: Vec<DeviceFile>) -> Vec<Extracted> {
        let explored = stream::iter(files.into_iter().map(Explored::Audio)).boxed();
        step.extract(explored, CancellationToken::new()).collect().await
    }

    fn songs(extracted: &[Extracted]) -> Vec<(String, bool)> {
        let mut out: Vec<(String, bool)> = extracted
            .iter()
            .filter_map(|item| match item {
                Extracted::Song(song) => Some((song.tags.name.clone().unwrap(), song.from_cache)),
                _ => None,
            })
            .collect();
        out.sort();
        out
    }

    #[tokio::test]
    async fn second_run_is_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(&dir.path().join("cache.redb"), "default").unwrap();
        let covers = Arc::new(StoredCovers::open(dir.path().join("covers")).unwrap());
        let (a, b) = (file("A.mp3", 1), file("B.mp3", 1));
        let extractor = Arc::new(FakeExtractor::with(&[(&a, "Song1"), (&b, "Song2")]));
        let step = ExtractStep::new(extractor.clone(), cache.clone(), covers, 8);

        let first = run(&step, vec![a.clone(), b.clone()]).await;
        assert_eq!(
            songs(&first),
            [("Song1".to_string(), false), ("Song2".to_string(), false)]
        );

        let second = run(&step, vec![a.clone(), b.clone()]).await;
        assert_eq!(
            songs(&second),
            [("Song1".to_string(), true), ("Song2".to_string(), true)]
        );
        assert_eq!(extractor.decodes(&a), 1);
        assert!(matches!(cache.read(&a), CacheResult::Hit(_)));
    }

    #[tokio::test]
    async fn unreadable_cache_entry_is_decoded_again() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(&dir.path().join("cache.redb"), "default").unwrap();
        let a = file("A.mp3", 1);
        cache.insert_raw(&a.uri, b"not bincode").unwrap();
        let extractor = Arc::new(FakeExtractor::with(&[(&a, "Song1")]));
        let step = ExtractStep::new(extractor.clone(), cache.clone(), Arc::new(NoCovers), 2);

        let extracted = run(&step, vec![a.clone()]).await;
        assert_eq!(songs(&extracted), [("Song1".to_string(), false)]);
        assert_eq!(extractor.decodes(&a), 1);
        match cache.read(&a) {
            CacheResult::Hit(song) => assert_eq!(song.tags.name.as_deref(), Some("Song1")),
            other => panic!("expected rewritten entry, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn stale_entry_keeps_added_time() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(&dir.path().join("cache.redb"), "default").unwrap();
        let a = file("A.mp3", 1);
        let touched = file("A.mp3", 2);
        let extractor = Arc::new(FakeExtractor::with(&[(&a, "Song1")]));
        let step = ExtractStep::new(extractor.clone(), cache.clone(), Arc::new(NoCovers), 2);

        let first = run(&step, vec![a.clone()]).await;
        let second = run(&step, vec![touched.clone()]).await;
        let added = |items: &[Extracted]| match &items[0] {
            Extracted::Song(song) => song.added_ms,
            other => panic!("expected song, got {:?}", other),
        };
        assert_eq!(added(&first), added(&second));
        assert_eq!(extractor.decodes(&a), 2);
    }

    #[tokio::test]
    async fn undecodable_files_are_reported_and_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(&dir.path().join("cache.redb"), "default").unwrap();
        let broken = file("broken.mp3", 1);
        let step = ExtractStep::new(Arc::new(FakeExtractor::default()), cache.clone(), Arc::new(NoCovers), 4);

        let extracted = run(&step, vec![broken.clone()]).await;
        assert!(matches!(&extracted[..], [Extracted::Invalid { file, .. }] if *file == broken));
        assert_eq!(cache.read(&broken), CacheResult::Miss(broken));
    }

    #[tokio::test]
    async fn files_missing_from_a_run_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(&dir.path().join("cache.redb"), "default").unwrap();
        let covers = Arc::new(StoredCovers::open(dir.path().join("covers")).unwrap());
        let (a, b) = (file("A.mp3", 1), file("B.mp3", 1));
        let extractor = Arc::new(FakeExtractor::with(&[(&a, "Song1"), (&b, "Song2")]));
        let step = ExtractStep::new(extractor, cache.clone(), covers.clone(), 8);

        run(&step, vec![a.clone(), b.clone()]).await;
        run(&step, vec![a.clone()]).await;

        assert!(matches!(cache.read(&a), CacheResult::Hit(_)));
        assert_eq!(cache.read(&b), CacheResult::Miss(b));
        assert_eq!(std::fs::read_dir(covers.dir()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn playlists_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(&dir.path().join("cache.redb"), "default").unwrap();
        let step = ExtractStep::new(Arc::new(FakeExtractor::default()), cache, Arc::new(NoCovers), 8);
        let playlist = RawPlaylist {
            file: file("mix.m3u", 1),
            name: "mix".to_string(),
            entries: vec!["Music/A.mp3".to_string()],
        };
        let explored = stream::iter([Explored::Playlist(playlist.clone())]).boxed();
        let extracted: Vec<Extracted> = step.extract(explored, CancellationToken::new()).collect().await;
        assert_eq!(extracted, [Extracted::Playlist(playlist)]);
    }

    #[tokio::test]
    async fn cancelled_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(&dir.path().join("cache.redb"), "default").unwrap();
        let a = file("A.mp3", 1);
        let extractor = Arc::new(FakeExtractor::with(&[(&a, "Song1")]));
        let step = ExtractStep::new(extractor, cache.clone(), Arc::new(NoCovers), 8);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let explored = stream::iter([Explored::Audio(a.clone())]).boxed();
        let extracted: Vec<Extracted> = step.extract(explored, cancel).collect().await;

        assert!(extracted.is_empty());
        assert_eq!(cache.read(&a), CacheResult::Miss(a));
    }
}
