use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use common::{AudioProperties, DeviceFile, ParsedTags};
use redb::{
    CommitError, Database, DatabaseError, ReadableTable, StorageError, TableDefinition, TableError,
    TransactionError, WriteTransaction,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const CACHE_VERSION: u32 = 1;

const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
const SONGS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("songs");

const META_VERSION_KEY: &str = "version";
const META_SILO_KEY: &str = "silo";

/// Everything needed to rebuild a song without decoding its file again.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CachedSong {
    pub file: DeviceFile,
    pub properties: AudioProperties,
    pub tags: ParsedTags,
    pub cover_id: Option<String>,
    pub added_ms: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CacheResult {
    /// Cached entry with a matching modification time.
    Hit(CachedSong),
    /// The file changed since it was cached. `added_ms` is the time it was first seen.
    Stale { file: DeviceFile, added_ms: u64 },
    Miss(DeviceFile),
}

/// Persistent per-file extraction cache keyed by file uri.
///
/// Entries belong to a silo. Opening with a different silo, or after a schema change, drops
/// every entry.
#[derive(Clone)]
pub struct Cache {
    db: Arc<Database>,
}

impl Cache {
    pub fn open(path: &Path, silo: &str) -> Result<Self, CacheError> {
        let db = open_or_create_db(path)?;
        let cache = Self { db: Arc::new(db) };

        match read_meta(&cache.db)? {
            Some((version, stored_silo)) if version == CACHE_VERSION && stored_silo == silo => {
                info!("Loaded cache from {:?}", path);
            }
            Some((version, stored_silo)) => {
                warn!(
                    "Cache generation changed (version {}, silo {:?}); clearing",
                    version, stored_silo
                );
                cache.reset(silo)?;
            }
            None => {
                info!("Creating cache at {:?}", path);
                cache.reset(silo)?;
            }
        }

        Ok(cache)
    }

    /// Looks up `file`, treating any storage failure as a miss.
    pub fn read(&self, file: &DeviceFile) -> CacheResult {
        match self.try_read(file) {
            Ok(result) => result,
            Err(err) => {
                warn!("Failed to read cache entry for {}: {}", file.uri, err);
                CacheResult::Miss(file.clone())
            }
        }
    }

    pub fn try_read(&self, file: &DeviceFile) -> Result<CacheResult, CacheError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(SONGS_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(CacheResult::Miss(file.clone())),
            Err(err) => return Err(err.into()),
        };
        let song: CachedSong = match table.get(file.uri.as_str())? {
            Some(value) => decode_value(value.value())?,
            None => return Ok(CacheResult::Miss(file.clone())),
        };
        if song.file.modified_ms == file.modified_ms {
            Ok(CacheResult::Hit(song))
        } else {
            Ok(CacheResult::Stale {
                file: file.clone(),
                added_ms: song.added_ms,
            })
        }
    }

    /// Inserts or replaces the entry for `song.file.uri`.
    pub fn write(&self, song: &CachedSong) -> Result<(), CacheError> {
        let bytes = encode_value(song)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SONGS_TABLE)?;
            table.insert(song.file.uri.as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Removes every entry whose uri isn't in `retained`. Returns how many were removed.
    pub fn cleanup(&self, retained: &HashSet<String>) -> Result<usize, CacheError> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(SONGS_TABLE)?;
            let mut doomed = Vec::new();
            for entry in table.iter()? {
                let (key, _) = entry?;
                if !retained.contains(key.value()) {
                    doomed.push(key.value().to_string());
                }
            }
            for uri in &doomed {
                table.remove(uri.as_str())?;
            }
            doomed.len()
        };
        write_txn.commit()?;
        if removed > 0 {
            info!("Pruned {} stale cache entries", removed);
        }
        Ok(removed)
    }

    pub fn len(&self) -> Result<usize, CacheError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(SONGS_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        Ok(table.len()? as usize)
    }

    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len()? == 0)
    }

    /// Stores `bytes` under `uri` as is, bypassing encoding.
    #[cfg(test)]
    pub(crate) fn insert_raw(&self, uri: &str, bytes: &[u8]) -> Result<(), CacheError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SONGS_TABLE)?;
            table.insert(uri, bytes)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn reset(&self, silo: &str) -> Result<(), CacheError> {
        let write_txn = self.db.begin_write()?;
        clear_table(&write_txn, SONGS_TABLE)?;
        clear_table(&write_txn, META_TABLE)?;
        {
            let mut meta = write_txn.open_table(META_TABLE)?;
            meta.insert(META_VERSION_KEY, encode_value(&CACHE_VERSION)?.as_slice())?;
            meta.insert(META_SILO_KEY, encode_value(&silo)?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

static LAST_ADDED_MS: AtomicU64 = AtomicU64::new(0);

/// Wall clock milliseconds, bumped so that no two calls in a process return the same value.
pub fn next_added_ms() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0);
    let mut last = LAST_ADDED_MS.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_ADDED_MS.compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed)
        {
            Ok(_) => return next,
            Err(current) => last = current,
        }
    }
}

#[derive(Debug)]
pub enum CacheError {
    Io(std::io::Error),
    Redb(redb::Error),
    Bincode(Box<bincode::ErrorKind>),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::Io(err) => write!(f, "io error: {}", err),
            CacheError::Redb(err) => write!(f, "db error: {}", err),
            CacheError::Bincode(err) => write!(f, "bincode error: {}", err),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(err)
    }
}

impl From<redb::Error> for CacheError {
    fn from(err: redb::Error) -> Self {
        CacheError::Redb(err)
    }
}

impl From<DatabaseError> for CacheError {
    fn from(err: DatabaseError) -> Self {
        CacheError::Redb(err.into())
    }
}

impl From<TableError> for CacheError {
    fn from(err: TableError) -> Self {
        CacheError::Redb(err.into())
    }
}

impl From<TransactionError> for CacheError {
    fn from(err: TransactionError) -> Self {
        CacheError::Redb(err.into())
    }
}

impl From<StorageError> for CacheError {
    fn from(err: StorageError) -> Self {
        CacheError::Redb(err.into())
    }
}

impl From<CommitError> for CacheError {
    fn from(err: CommitError) -> Self {
        CacheError::Redb(err.into())
    }
}

impl From<Box<bincode::ErrorKind>> for CacheError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        CacheError::Bincode(err)
    }
}

fn open_or_create_db(path: &Path) -> Result<Database, CacheError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if path.exists() {
        Ok(Database::open(path)?)
    } else {
        Ok(Database::create(path)?)
    }
}

fn read_meta(db: &Database) -> Result<Option<(u32, String)>, CacheError> {
    let read_txn = db.begin_read()?;
    let table = match read_txn.open_table(META_TABLE) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let version: u32 = match table.get(META_VERSION_KEY)? {
        Some(value) => decode_value(value.value())?,
        None => return Ok(None),
    };
    let silo: String = match table.get(META_SILO_KEY)? {
        Some(value) => decode_value(value.value())?,
        None => return Ok(None),
    };
    Ok(Some((version, silo)))
}

fn clear_table(
    txn: &WriteTransaction,
    table: TableDefinition<&str, &[u8]>,
) -> Result<(), CacheError> {
    match txn.delete_table(table) {
        Ok(_) => Ok(()),
        Err(TableError::TableDoesNotExist(_)) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, CacheError> {
    Ok(bincode::serialize(value)?)
}

fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, CacheError> {
    Ok(bincode::deserialize(bytes)?)
}
