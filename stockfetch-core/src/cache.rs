//! File-backed response cache.
//!
//! Layout: `{cache_dir}/{key}.json`, one self-describing entry per query.
//!
//! - Atomic writes (write to a hidden `.tmp`, rename into place)
//! - Freshness is computed on read from the entry's own timestamp and TTL
//! - Unreadable or unparsable entries are reported as corrupt, never as errors

use crate::key::CacheKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const ENTRY_EXT: &str = "json";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to create cache dir {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("failed to serialize entry: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("atomic rename to {path} failed: {source}")]
    Rename { path: PathBuf, source: io::Error },

    #[error("cache i/o error: {0}")]
    Io(#[from] io::Error),
}

/// One persisted response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    /// Raw provider body, stored verbatim.
    pub payload: String,
    pub stored_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

impl CacheEntry {
    /// `now - stored_at < ttl`. A zero TTL is never fresh.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        // chrono durations top out at i64::MAX milliseconds
        let secs = i64::try_from(self.ttl_seconds)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 1000);
        now.signed_duration_since(self.stored_at) < chrono::Duration::seconds(secs)
    }
}

/// Result of reading one key.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(CacheEntry),
    Miss,
    /// File exists but could not be read or parsed.
    Corrupt(String),
}

/// Summary of cache contents for operator commands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub fresh: usize,
    pub stale: usize,
    pub corrupt: usize,
    pub total_bytes: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// The response cache.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    /// The directory is created lazily on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{ENTRY_EXT}"))
    }

    /// Hidden, per-process temp name so a crashed write never looks like an entry.
    fn temp_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!(".{key}.{}.tmp", std::process::id()))
    }

    /// Read the entry for `key`, regardless of freshness.
    pub fn lookup(&self, key: &CacheKey) -> CacheLookup {
        let path = self.entry_path(key.as_str());
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return CacheLookup::Miss,
            Err(e) => return CacheLookup::Corrupt(format!("read {}: {e}", path.display())),
        };
        match serde_json::from_str::<CacheEntry>(&content) {
            Ok(entry) if entry.key == key.as_str() => CacheLookup::Hit(entry),
            Ok(entry) => CacheLookup::Corrupt(format!(
                "entry at {} belongs to key {}",
                path.display(),
                entry.key
            )),
            Err(e) => CacheLookup::Corrupt(format!("parse {}: {e}", path.display())),
        }
    }

    /// The entry for `key`, or `None` on a miss. Corrupt entries are logged
    /// and treated as absent.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        match self.lookup(key) {
            CacheLookup::Hit(entry) => Some(entry),
            CacheLookup::Miss => None,
            CacheLookup::Corrupt(reason) => {
                warn!(key = %key, %reason, "ignoring corrupt cache entry");
                None
            }
        }
    }

    /// Freshness of `entry` at `now`.
    pub fn is_fresh(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        entry.is_fresh(now)
    }

    /// Store `payload` under `key`, stamped with the current time.
    pub fn put(&self, key: &CacheKey, payload: &str, ttl: Duration) -> Result<(), CacheError> {
        self.put_with_timestamp(key, payload, ttl, Utc::now())
    }

    /// Store `payload` under `key` with an explicit `stored_at`.
    ///
    /// Readers see either the previous entry or the new one, never a partial file.
    pub fn put_with_timestamp(
        &self,
        key: &CacheKey,
        payload: &str,
        ttl: Duration,
        stored_at: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let key = key.as_str();
        fs::create_dir_all(&self.dir).map_err(|source| CacheError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;

        let entry = CacheEntry {
            key: key.to_string(),
            payload: payload.to_string(),
            stored_at,
            ttl_seconds: ttl.as_secs(),
        };
        let body = serde_json::to_vec(&entry)?;

        let path = self.entry_path(key);
        let tmp_path = self.temp_path(key);
        write_synced(&tmp_path, &body).map_err(|source| {
            let _ = fs::remove_file(&tmp_path);
            CacheError::Write {
                path: tmp_path.clone(),
                source,
            }
        })?;

        fs::rename(&tmp_path, &path).map_err(|source| {
            let _ = fs::remove_file(&tmp_path);
            CacheError::Rename {
                path: path.clone(),
                source,
            }
        })?;

        debug!(key, bytes = body.len(), "cache entry written");
        Ok(())
    }

    /// Keys of every entry file currently in the cache directory.
    pub fn keys(&self) -> Result<Vec<String>, CacheError> {
        let mut keys: Vec<String> = self
            .entry_files()?
            .into_iter()
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Count and size entries, classifying each at `now`.
    pub fn stats(&self, now: DateTime<Utc>) -> Result<CacheStats, CacheError> {
        let mut stats = CacheStats::default();
        for path in self.entry_files()? {
            stats.entries += 1;
            stats.total_bytes += fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            match read_entry(&path) {
                Some(entry) => {
                    if entry.is_fresh(now) {
                        stats.fresh += 1;
                    } else {
                        stats.stale += 1;
                    }
                    let at = entry.stored_at;
                    stats.oldest = Some(stats.oldest.map_or(at, |t| t.min(at)));
                    stats.newest = Some(stats.newest.map_or(at, |t| t.max(at)));
                }
                None => stats.corrupt += 1,
            }
        }
        Ok(stats)
    }

    /// Delete stale and corrupt entries. Returns the number removed.
    pub fn remove_stale(&self, now: DateTime<Utc>) -> Result<usize, CacheError> {
        let mut removed = 0;
        for path in self.entry_files()? {
            let keep = read_entry(&path).is_some_and(|e| e.is_fresh(now));
            if !keep {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        debug!(removed, "removed stale cache entries");
        Ok(removed)
    }

    /// Delete every entry. Returns the number removed.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let files = self.entry_files()?;
        for path in &files {
            fs::remove_file(path)?;
        }
        Ok(files.len())
    }

    /// Entry files, excluding hidden temp files. A missing directory is empty.
    fn entry_files(&self) -> Result<Vec<PathBuf>, CacheError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_entry = path.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXT)
                && !path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with('.'));
            if is_entry && path.is_file() {
                files.push(path);
            }
        }
        Ok(files)
    }
}

fn write_synced(path: &Path, body: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(body)?;
    file.sync_all()
}

fn read_entry(path: &Path) -> Option<CacheEntry> {
    let content = fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::derive;
    use crate::query::{Query, SeriesFunction};
    use chrono::TimeZone;
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(86_400);

    fn key(symbol: &str) -> CacheKey {
        derive(&Query::new(symbol, SeriesFunction::Daily)).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap()
    }

    #[test]
    fn missing_dir_is_a_miss() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path().join("nope"));
        assert_eq!(store.lookup(&key("AAPL")), CacheLookup::Miss);
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn put_then_get_returns_payload() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path().join("cache"));
        let k = key("AAPL");

        store.put_with_timestamp(&k, "{\"a\":1}", DAY, t0()).unwrap();
        let entry = store.get(&k).unwrap();
        assert_eq!(entry.payload, "{\"a\":1}");
        assert_eq!(entry.stored_at, t0());
        assert_eq!(entry.ttl_seconds, 86_400);
        assert_eq!(store.keys().unwrap(), vec![k.to_string()]);
    }

    #[test]
    fn put_overwrites_and_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        let k = key("AAPL");

        store.put(&k, "old", DAY).unwrap();
        store.put(&k, "new", DAY).unwrap();
        assert_eq!(store.get(&k).unwrap().payload, "new");

        let names: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names.len(), 1, "unexpected files: {names:?}");
    }

    #[test]
    fn freshness_boundary() {
        let entry = CacheEntry {
            key: "k".into(),
            payload: String::new(),
            stored_at: t0(),
            ttl_seconds: 60,
        };
        assert!(entry.is_fresh(t0()));
        assert!(entry.is_fresh(t0() + chrono::Duration::seconds(59)));
        assert!(!entry.is_fresh(t0() + chrono::Duration::seconds(60)));
        // Future-dated entries stay fresh.
        assert!(entry.is_fresh(t0() - chrono::Duration::hours(1)));

        let zero = CacheEntry { ttl_seconds: 0, ..entry };
        assert!(!zero.is_fresh(t0()));
    }

    #[test]
    fn garbage_file_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        let k = key("AAPL");
        fs::write(tmp.path().join(format!("{k}.json")), "not json").unwrap();

        assert!(matches!(store.lookup(&k), CacheLookup::Corrupt(_)));
        assert!(store.get(&k).is_none());
    }

    #[test]
    fn entry_for_other_key_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        let (a, b) = (key("AAPL"), key("MSFT"));
        store.put(&a, "x", DAY).unwrap();
        fs::rename(
            tmp.path().join(format!("{a}.json")),
            tmp.path().join(format!("{b}.json")),
        )
        .unwrap();

        assert!(matches!(store.lookup(&b), CacheLookup::Corrupt(_)));
    }

    #[test]
    fn stats_and_remove_stale() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        let (fresh, stale) = (key("AAPL"), key("MSFT"));
        store.put_with_timestamp(&fresh, "f", DAY, t0()).unwrap();
        store
            .put_with_timestamp(&stale, "s", DAY, t0() - chrono::Duration::days(2))
            .unwrap();
        fs::write(tmp.path().join("broken.json"), "{").unwrap();

        let stats = store.stats(t0()).unwrap();
        assert_eq!(stats.entries, 3);
        assert_eq!(stats.fresh, 1);
        assert_eq!(stats.stale, 1);
        assert_eq!(stats.corrupt, 1);
        assert!(stats.total_bytes > 0);
        assert_eq!(stats.newest, Some(t0()));

        assert_eq!(store.remove_stale(t0()).unwrap(), 2);
        assert_eq!(store.keys().unwrap(), vec![fresh.to_string()]);
    }

    #[test]
    fn clear_removes_everything() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        store.put(&key("AAPL"), "a", DAY).unwrap();
        store.put(&key("MSFT"), "b", DAY).unwrap();
        assert_eq!(store.clear().unwrap(), 2);
        assert!(store.keys().unwrap().is_empty());
    }
}
