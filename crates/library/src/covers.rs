use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use common::{stable_id, DeviceFile};
use metadata::Metadata;
use parking_lot::Mutex;
use tracing::{debug, info};

const COVER_EXTS: [&str; 4] = ["jpg", "png", "webp", "gif"];

/// A stored cover image. The indexer only ever passes the id around.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Cover {
    pub id: String,
    pub path: PathBuf,
    pub mime: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CoverResult {
    Hit(Cover),
    Miss,
}

impl CoverResult {
    pub fn cover(self) -> Option<Cover> {
        match self {
            CoverResult::Hit(cover) => Some(cover),
            CoverResult::Miss => None,
        }
    }
}

/// Cover storage used during extraction.
pub trait Covers: Send + Sync {
    /// Looks up a previously created cover.
    fn obtain(&self, id: &str) -> Result<CoverResult, CoverError>;

    /// Stores the cover embedded in `metadata`, if any, under a content derived id.
    fn create(&self, file: &DeviceFile, metadata: &Metadata) -> Result<CoverResult, CoverError>;

    /// Deletes every cover whose id isn't in `excluding`. Returns how many were removed.
    fn cleanup(&self, excluding: &HashSet<String>) -> Result<usize, CoverError>;
}

/// Covers kept as `<id>.<ext>` files in one directory.
pub struct StoredCovers {
    dir: PathBuf,
    written: Mutex<HashSet<String>>,
}

impl StoredCovers {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CoverError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            written: Mutex::new(HashSet::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn find(&self, id: &str) -> Option<Cover> {
        for ext in COVER_EXTS {
            let path = self.dir.join(format!("{}.{}", id, ext));
            if path.exists() {
                let mime = mime_guess::from_path(&path)
                    .first_or_octet_stream()
                    .to_string();
                return Some(Cover {
                    id: id.to_string(),
                    path,
                    mime,
                });
            }
        }
        None
    }
}

impl Covers for StoredCovers {
    fn obtain(&self, id: &str) -> Result<CoverResult, CoverError> {
        Ok(match self.find(id) {
            Some(cover) => CoverResult::Hit(cover),
            None => CoverResult::Miss,
        })
    }

    fn create(&self, file: &DeviceFile, metadata: &Metadata) -> Result<CoverResult, CoverError> {
        let Some(art) = metadata.cover.as_ref() else {
            return Ok(CoverResult::Miss);
        };
        let mime = art.mime.as_deref().unwrap_or("image/jpeg");
        let Some(ext) = image_ext_from_mime(mime) else {
            debug!("Skipping {} cover for {}", mime, file.uri);
            return Ok(CoverResult::Miss);
        };

        let id = stable_id(&art.data);
        let path = self.dir.join(format!("{}.{}", id, ext));
        // Held across the write so no lane sees the id before its file exists.
        let mut written = self.written.lock();
        if !written.contains(&id) {
            if !path.exists() {
                let tmp = self.dir.join(format!("{}.{}.tmp", id, ext));
                fs::write(&tmp, &art.data)?;
                fs::rename(&tmp, &path)?;
            }
            written.insert(id.clone());
        }
        drop(written);
        Ok(CoverResult::Hit(Cover {
            id,
            path,
            mime: mime.to_string(),
        }))
    }

    fn cleanup(&self, excluding: &HashSet<String>) -> Result<usize, CoverError> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let id = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.split('.').next())
                .unwrap_or_default();
            if excluding.contains(id) {
                continue;
            }
            fs::remove_file(&path)?;
            self.written.lock().remove(id);
            removed += 1;
        }
        if removed > 0 {
            info!("Removed {} unused covers", removed);
        }
        Ok(removed)
    }
}

/// Discards every cover. Used when cover art is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCovers;

impl Covers for NoCovers {
    fn obtain(&self, _id: &str) -> Result<CoverResult, CoverError> {
        Ok(CoverResult::Miss)
    }

    fn create(&self, _file: &DeviceFile, _metadata: &Metadata) -> Result<CoverResult, CoverError> {
        Ok(CoverResult::Miss)
    }

    fn cleanup(&self, _excluding: &HashSet<String>) -> Result<usize, CoverError> {
        Ok(0)
    }
}

pub fn image_ext_from_mime(mime: &str) -> Option<&'static str> {
    match mime {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

#[derive(Debug)]
pub enum CoverError {
    Io(std::io::Error),
}

impl std::fmt::Display for CoverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoverError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for CoverError {}

impl From<std::io::Error> for CoverError {
    fn from(err: std::io::Error) -> Self {
        CoverError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::{CoverResult, Covers, NoCovers, StoredCovers};
    use common::DeviceFile;
    use metadata::{CoverArt, Metadata};
    use std::collections::HashSet;

    fn file() -> DeviceFile {
        DeviceFile {
            uri: "file:///music/A.mp3".to_string(),
            mime_type: "audio/mpeg".to_string(),
            path: "Music/A.mp3".to_string(),
            size: 1,
            modified_ms: 1,
        }
    }

    fn with_cover(data: &[u8], mime: &str) -> Metadata {
        Metadata {
            cover: Some(CoverArt {
                data: data.to_vec(),
                mime: Some(mime.to_string()),
            }),
            ..Metadata::default()
        }
    }

    #[test]
    fn identical_art_shares_an_id() {
        let dir = tempfile::tempdir().unwrap();
        let covers = StoredCovers::open(dir.path()).unwrap();
        let first = covers.create(&file(), &with_cover(b"art", "image/png")).unwrap();
        let second = covers.create(&file(), &with_cover(b"art", "image/png")).unwrap();
        assert_eq!(first, second);

        let cover = first.cover().unwrap();
        assert!(cover.path.ends_with(format!("{}.png", cover.id)));
        assert_eq!(covers.obtain(&cover.id).unwrap(), CoverResult::Hit(cover));
    }

    #[test]
    fn concurrent_creates_only_hit_written_files() {
        let dir = tempfile::tempdir().unwrap();
        let covers = StoredCovers::open(dir.path()).unwrap();
        let results: Vec<CoverResult> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        let result = covers
                            .create(&file(), &with_cover(b"shared", "image/jpeg"))
                            .unwrap();
                        let cover = result.clone().cover().unwrap();
                        assert!(cover.path.exists());
                        result
                    })
                })
                .collect();
            handles.into_iter().map(|handle| handle.join().unwrap()).collect()
        });
        assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn failed_write_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("covers");
        let covers = StoredCovers::open(&root).unwrap();
        std::fs::remove_dir_all(&root).unwrap();
        assert!(covers.create(&file(), &with_cover(b"art", "image/png")).is_err());

        std::fs::create_dir_all(&root).unwrap();
        let cover = covers
            .create(&file(), &with_cover(b"art", "image/png"))
            .unwrap()
            .cover()
            .unwrap();
        assert!(cover.path.exists());
        assert_eq!(covers.obtain(&cover.id).unwrap(), CoverResult::Hit(cover));
    }

    #[test]
    fn missing_or_unknown_art_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let covers = StoredCovers::open(dir.path()).unwrap();
        assert_eq!(
            covers.create(&file(), &Metadata::default()).unwrap(),
            CoverResult::Miss
        );
        assert_eq!(
            covers.create(&file(), &with_cover(b"art", "image/bmp")).unwrap(),
            CoverResult::Miss
        );
        assert_eq!(covers.obtain("nope").unwrap(), CoverResult::Miss);
    }

    #[test]
    fn cleanup_keeps_excluded_ids() {
        let dir = tempfile::tempdir().unwrap();
        let covers = StoredCovers::open(dir.path()).unwrap();
        let kept = covers
            .create(&file(), &with_cover(b"one", "image/jpeg"))
            .unwrap()
            .cover()
            .unwrap();
        let dropped = covers
            .create(&file(), &with_cover(b"two", "image/jpeg"))
            .unwrap()
            .cover()
            .unwrap();

        let excluding: HashSet<String> = [kept.id.clone()].into_iter().collect();
        assert_eq!(covers.cleanup(&excluding).unwrap(), 1);
        assert_eq!(covers.cleanup(&excluding).unwrap(), 0);
        assert!(matches!(covers.obtain(&kept.id).unwrap(), CoverResult::Hit(_)));
        assert_eq!(covers.obtain(&dropped.id).unwrap(), CoverResult::Miss);
    }

    #[test]
    fn no_covers_never_hits() {
        let covers = NoCovers;
        assert_eq!(
            covers.create(&file(), &with_cover(b"art", "image/png")).unwrap(),
            CoverResult::Miss
        );
    }
}
