//! L0 Cache - Memory-Mapped Region
//!
//! Sub-millisecond tier backed by a single fixed-size memory-mapped file.
//!
//! # Design
//!
//! - Forward-only allocation cursor; records are written back to back
//! - In-memory `key -> (offset, length, expiry)` index, never persisted
//! - Records written with a TTL read as misses once it lapses; the expired
//!   index entry is dropped on that read
//! - When a record does not fit behind the cursor the whole index is dropped
//!   and the cursor returns to zero (reset-on-overflow, not LRU)
//! - One mutex covers mapping, index and cursor
//!
//! # Known limitations
//!
//! - A record that fails to decode is reported as a miss but its index entry is
//!   kept, so the key keeps missing until it is overwritten.
//! - Prior file contents are unreachable after a restart since the index
//!   starts empty.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use memmap2::{MmapMut, MmapOptions};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::codec;
use crate::error::{Error, Result};

/// Location of a record inside the region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    /// Byte offset of the record
    pub offset: usize,
    /// Record length in bytes
    pub len: usize,
}

impl Slot {
    /// Offset one past the last byte of the record
    #[inline]
    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    slot: Slot,
    /// `None` never expires
    expires_at: Option<Instant>,
}

impl IndexEntry {
    fn is_live_at(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now <= at)
    }
}

struct RegionState {
    /// `None` once the region is closed
    mmap: Option<MmapMut>,
    index: HashMap<String, IndexEntry>,
    cursor: usize,
}

/// Memory-mapped L0 store
pub struct MappedRegion {
    path: PathBuf,
    capacity: usize,
    state: Mutex<RegionState>,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    resets: AtomicU64,
    expirations: AtomicU64,
    corrupt_reads: AtomicU64,
}

impl MappedRegion {
    /// Create (or resize) the backing file to exactly `capacity` bytes and map it
    pub fn open(path: impl AsRef<Path>, capacity: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if capacity == 0 {
            return Err(Error::Config("L0 capacity must be positive".into()));
        }

        let init_err = |source: std::io::Error| Error::StorageInit {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(init_err)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(init_err)?;

        let current_len = file.metadata().map_err(init_err)?.len();
        if current_len != capacity as u64 {
            // Extension zero-fills
            file.set_len(capacity as u64).map_err(init_err)?;
        }

        // SAFETY: the region owns the only mapping of this file for its lifetime
        // and every access goes through bounds-checked slices below.
        let mmap =
            unsafe { MmapOptions::new().len(capacity).map_mut(&file) }.map_err(init_err)?;

        info!("Mapped L0 region {} ({} bytes)", path.display(), capacity);

        Ok(Self {
            path,
            capacity,
            state: Mutex::new(RegionState {
                mmap: Some(mmap),
                index: HashMap::new(),
                cursor: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            resets: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            corrupt_reads: AtomicU64::new(0),
        })
    }

    /// Copy out the raw record for `key`, dropping it if expired
    fn read_raw(&self, key: &str) -> Option<Bytes> {
        let mut state = self.state.lock();
        let entry = *state.index.get(key)?;
        if !entry.is_live_at(Instant::now()) {
            state.index.remove(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            debug!(key, "L0 record expired");
            return None;
        }

        let slot = entry.slot;
        let mmap = state.mmap.as_ref()?;
        match mmap.get(slot.offset..slot.end()) {
            Some(bytes) => Some(Bytes::copy_from_slice(bytes)),
            None => {
                warn!(key, ?slot, "L0 index entry outside mapped region");
                None
            }
        }
    }

    /// Get the raw record for `key`
    pub fn get_bytes(&self, key: &str) -> Option<Bytes> {
        let bytes = self.read_raw(key);
        if bytes.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        bytes
    }

    /// Get and decode the value for `key`; undecodable records count as misses
    pub fn get<V: DeserializeOwned>(&self, key: &str) -> Option<V> {
        let Some(bytes) = self.read_raw(key) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        match codec::decode(&bytes) {
            Ok(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Err(e) => {
                self.corrupt_reads.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                warn!(key, error = %e, "Corrupt L0 record treated as miss");
                None
            }
        }
    }

    /// Write a raw record without expiry
    pub fn set_bytes(&self, key: &str, bytes: &[u8]) -> Result<Slot> {
        self.write(&mut self.state.lock(), key, bytes, None)
    }

    /// Write a raw record that reads as a miss once `ttl` has elapsed
    pub fn set_bytes_with_ttl(&self, key: &str, bytes: &[u8], ttl: Duration) -> Result<Slot> {
        self.write(&mut self.state.lock(), key, bytes, deadline(ttl))
    }

    /// Write a raw record only if `key` has no live record.
    ///
    /// The check and the write happen under one lock; `Ok(None)` means the
    /// existing record was kept.
    pub fn set_bytes_if_absent(
        &self,
        key: &str,
        bytes: &[u8],
        ttl: Duration,
    ) -> Result<Option<Slot>> {
        let mut state = self.state.lock();
        let now = Instant::now();
        if state.index.get(key).is_some_and(|entry| entry.is_live_at(now)) {
            return Ok(None);
        }
        self.write(&mut state, key, bytes, deadline(ttl)).map(Some)
    }

    /// Write a raw record, resetting the region first if it does not fit
    fn write(
        &self,
        state: &mut RegionState,
        key: &str,
        bytes: &[u8],
        expires_at: Option<Instant>,
    ) -> Result<Slot> {
        let len = bytes.len();
        if len > self.capacity {
            return Err(Error::EntryTooLarge {
                size: len,
                capacity: self.capacity,
            });
        }

        let mmap = state.mmap.as_mut().ok_or(Error::RegionClosed)?;

        if state.cursor + len > self.capacity {
            let dropped = state.index.len();
            state.index.clear();
            state.cursor = 0;
            self.resets.fetch_add(1, Ordering::Relaxed);
            info!(
                dropped,
                needed = len,
                capacity = self.capacity,
                "L0 region full, index reset"
            );
        }

        let slot = Slot {
            offset: state.cursor,
            len,
        };
        mmap[slot.offset..slot.end()].copy_from_slice(bytes);
        state.index.insert(key.to_string(), IndexEntry { slot, expires_at });
        state.cursor = slot.end();
        self.writes.fetch_add(1, Ordering::Relaxed);

        debug!(key, offset = slot.offset, len, "L0 write");
        Ok(slot)
    }

    /// Encode and write a value
    pub fn set<V: Serialize>(&self, key: &str, value: &V) -> Result<Slot> {
        let bytes = codec::encode(value)?;
        self.set_bytes(key, &bytes)
    }

    /// Encode and write a value with a TTL
    pub fn set_with_ttl<V: Serialize>(
        &self,
        key: &str,
        value: &V,
        ttl: Duration,
    ) -> Result<Slot> {
        let bytes = codec::encode(value)?;
        self.set_bytes_with_ttl(key, &bytes, ttl)
    }

    /// Location of the live record for `key`
    pub fn slot(&self, key: &str) -> Option<Slot> {
        let now = Instant::now();
        self.state
            .lock()
            .index
            .get(key)
            .filter(|entry| entry.is_live_at(now))
            .map(|entry| entry.slot)
    }

    /// Check if key is indexed and not expired
    pub fn contains(&self, key: &str) -> bool {
        self.slot(key).is_some()
    }

    /// Drop the index entry for `key`; the bytes stay until overwritten
    pub fn remove(&self, key: &str) -> bool {
        self.state.lock().index.remove(key).is_some()
    }

    /// Live keys containing `fragment`
    pub fn keys_matching(&self, fragment: &str) -> Vec<String> {
        let now = Instant::now();
        self.state
            .lock()
            .index
            .iter()
            .filter(|(k, entry)| k.contains(fragment) && entry.is_live_at(now))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Bytes used so far (cursor position)
    pub fn size_bytes(&self) -> usize {
        self.state.lock().cursor
    }

    /// Region capacity in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of indexed records, including expired ones not yet read
    pub fn len(&self) -> usize {
        self.state.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().index.is_empty()
    }

    /// Backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// False after [`close`](Self::close)
    pub fn is_open(&self) -> bool {
        self.state.lock().mmap.is_some()
    }

    /// Drop every record and rewind the cursor
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.index.clear();
        state.cursor = 0;
    }

    /// Flush dirty pages to the backing file
    pub fn flush(&self) -> Result<()> {
        let state = self.state.lock();
        match state.mmap.as_ref() {
            Some(mmap) => Ok(mmap.flush()?),
            None => Ok(()),
        }
    }

    /// Flush and unmap; further calls are no-ops
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(mmap) = state.mmap.take() {
            state.index.clear();
            state.cursor = 0;
            mmap.flush()?;
            info!("Closed L0 region {}", self.path.display());
        }
        Ok(())
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Number of reset-on-overflow evictions
    pub fn resets(&self) -> u64 {
        self.resets.load(Ordering::Relaxed)
    }

    /// Get cache statistics
    pub fn stats(&self) -> L0Stats {
        let state = self.state.lock();
        L0Stats {
            size_bytes: state.cursor,
            capacity: self.capacity,
            entries: state.index.len(),
            hits: self.hits(),
            misses: self.misses(),
            writes: self.writes.load(Ordering::Relaxed),
            resets: self.resets(),
            expirations: self.expirations.load(Ordering::Relaxed),
            corrupt_reads: self.corrupt_reads.load(Ordering::Relaxed),
            open: state.mmap.is_some(),
        }
    }
}

/// Expiry instant for `ttl`; an unrepresentable deadline never expires
fn deadline(ttl: Duration) -> Option<Instant> {
    Instant::now().checked_add(ttl)
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        if let Some(mmap) = self.state.get_mut().mmap.take() {
            if let Err(e) = mmap.flush() {
                warn!(error = %e, "Failed to flush L0 region on drop");
            }
        }
    }
}

/// L0 statistics
#[derive(Debug, Clone)]
pub struct L0Stats {
    /// Cursor position in bytes
    pub size_bytes: usize,
    /// Capacity in bytes
    pub capacity: usize,
    /// Number of indexed records
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    /// Reset-on-overflow count
    pub resets: u64,
    /// Records dropped on read after their TTL
    pub expirations: u64,
    /// Records that failed to decode
    pub corrupt_reads: u64,
    /// Whether the mapping is still live
    pub open: bool,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_region(dir: &TempDir, capacity: usize) -> MappedRegion {
        MappedRegion::open(dir.path().join("l0.bin"), capacity).unwrap()
    }

    #[test]
    fn test_open_creates_file_of_capacity() {
        let dir = TempDir::new().unwrap();
        let region = open_region(&dir, 4096);

        let len = std::fs::metadata(dir.path().join("l0.bin")).unwrap().len();
        assert_eq!(len, 4096);
        assert_eq!(region.capacity(), 4096);
        assert_eq!(region.size_bytes(), 0);
        assert!(region.is_empty());
        assert!(region.is_open());
    }

    #[test]
    fn test_open_extends_undersized_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("l0.bin");
        std::fs::write(&path, b"short").unwrap();

        let _region = MappedRegion::open(&path, 1024).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 1024);
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/deeper/l0.bin");
        let region = MappedRegion::open(&path, 512).unwrap();
        assert_eq!(region.path(), path.as_path());
    }

    #[test]
    fn test_open_on_directory_fails_with_storage_init() {
        let dir = TempDir::new().unwrap();
        let result = MappedRegion::open(dir.path(), 1024);
        assert!(matches!(result, Err(Error::StorageInit { .. })));
    }

    #[test]
    fn test_set_get_round_trip() {
        let dir = TempDir::new().unwrap();
        let region = open_region(&dir, 4096);

        region.set("lead_1", &"score=87".to_string()).unwrap();
        let value: Option<String> = region.get("lead_1");
        assert_eq!(value.as_deref(), Some("score=87"));
        assert_eq!(region.hits(), 1);
    }

    #[test]
    fn test_missing_key_is_absent() {
        let dir = TempDir::new().unwrap();
        let region = open_region(&dir, 4096);

        assert_eq!(region.get::<String>("nope"), None);
        assert_eq!(region.misses(), 1);
    }

    #[test]
    fn test_cursor_advances_with_disjoint_slots() {
        let dir = TempDir::new().unwrap();
        let region = open_region(&dir, 4096);

        let a = region.set_bytes("a", &[1u8; 100]).unwrap();
        let b = region.set_bytes("b", &[2u8; 50]).unwrap();

        assert_eq!(a, Slot { offset: 0, len: 100 });
        assert_eq!(b, Slot { offset: 100, len: 50 });
        assert_eq!(region.size_bytes(), 150);
        assert_eq!(region.get_bytes("a").unwrap().as_ref(), &[1u8; 100][..]);
        assert_eq!(region.get_bytes("b").unwrap().as_ref(), &[2u8; 50][..]);
    }

    #[test]
    fn test_overwrite_appends_new_slot() {
        let dir = TempDir::new().unwrap();
        let region = open_region(&dir, 4096);

        region.set_bytes("k", &[1u8; 10]).unwrap();
        let second = region.set_bytes("k", &[2u8; 20]).unwrap();

        assert_eq!(second.offset, 10);
        assert_eq!(region.len(), 1);
        assert_eq!(region.get_bytes("k").unwrap().as_ref(), &[2u8; 20][..]);
    }

    #[test]
    fn test_overflow_resets_entire_index() {
        let dir = TempDir::new().unwrap();
        let region = open_region(&dir, 256);

        for i in 0..4 {
            region.set_bytes(&format!("k{}", i), &[i as u8; 60]).unwrap();
        }
        assert_eq!(region.size_bytes(), 240);

        // 240 + 60 > 256
        let slot = region.set_bytes("k4", &[9u8; 60]).unwrap();
        assert_eq!(slot.offset, 0);
        assert_eq!(region.resets(), 1);
        assert_eq!(region.len(), 1);
        assert_eq!(region.size_bytes(), 60);
        for i in 0..4 {
            assert!(region.get_bytes(&format!("k{}", i)).is_none());
        }
        assert_eq!(region.get_bytes("k4").unwrap().as_ref(), &[9u8; 60][..]);
    }

    #[test]
    fn test_exact_fit_does_not_reset() {
        let dir = TempDir::new().unwrap();
        let region = open_region(&dir, 100);

        region.set_bytes("a", &[0u8; 50]).unwrap();
        region.set_bytes("b", &[0u8; 50]).unwrap();
        assert_eq!(region.resets(), 0);
        assert_eq!(region.size_bytes(), 100);
    }

    #[test]
    fn test_entry_larger_than_region_rejected() {
        let dir = TempDir::new().unwrap();
        let region = open_region(&dir, 64);

        region.set_bytes("small", &[0u8; 8]).unwrap();
        let err = region.set_bytes("big", &[0u8; 65]).unwrap_err();
        assert!(matches!(err, Error::EntryTooLarge { size: 65, capacity: 64 }));
        // Existing records untouched
        assert!(region.contains("small"));
    }

    #[test]
    fn test_corrupt_record_is_miss_and_index_kept() {
        let dir = TempDir::new().unwrap();
        let region = open_region(&dir, 1024);

        region.set_bytes("bad", &[0xff, 0xff, 0xff]).unwrap();
        assert_eq!(region.get::<String>("bad"), None);
        assert!(region.contains("bad"));
        assert_eq!(region.stats().corrupt_reads, 1);

        // Overwriting repairs the key
        region.set("bad", &"fixed".to_string()).unwrap();
        assert_eq!(region.get::<String>("bad").as_deref(), Some("fixed"));
    }

    #[test]
    fn test_ttl_record_expires_on_read() {
        let dir = TempDir::new().unwrap();
        let region = open_region(&dir, 1024);

        region
            .set_with_ttl("session", &"abc".to_string(), Duration::from_millis(20))
            .unwrap();
        region.set("pinned", &"forever".to_string()).unwrap();
        assert!(region.contains("session"));
        assert_eq!(region.keys_matching("s").len(), 1);

        std::thread::sleep(Duration::from_millis(40));
        assert!(!region.contains("session"));
        assert!(region.keys_matching("session").is_empty());
        assert_eq!(region.get::<String>("session"), None);
        assert_eq!(region.get::<String>("pinned").as_deref(), Some("forever"));

        let stats = region.stats();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_rewrite_refreshes_expiry() {
        let dir = TempDir::new().unwrap();
        let region = open_region(&dir, 1024);

        region
            .set_bytes_with_ttl("k", &[1u8; 4], Duration::from_millis(10))
            .unwrap();
        region
            .set_bytes_with_ttl("k", &[2u8; 4], Duration::from_secs(60))
            .unwrap();
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(region.get_bytes("k").unwrap().as_ref(), &[2u8; 4][..]);
    }

    #[test]
    fn test_set_if_absent_keeps_live_record() {
        let dir = TempDir::new().unwrap();
        let region = open_region(&dir, 1024);
        let ttl = Duration::from_secs(60);

        assert!(region.set_bytes_if_absent("k", &[1u8; 4], ttl).unwrap().is_some());
        assert!(region.set_bytes_if_absent("k", &[2u8; 4], ttl).unwrap().is_none());
        assert_eq!(region.get_bytes("k").unwrap().as_ref(), &[1u8; 4][..]);

        region
            .set_bytes_with_ttl("short", &[3u8; 4], Duration::from_millis(10))
            .unwrap();
        std::thread::sleep(Duration::from_millis(25));
        assert!(region
            .set_bytes_if_absent("short", &[4u8; 4], ttl)
            .unwrap()
            .is_some());
        assert_eq!(region.get_bytes("short").unwrap().as_ref(), &[4u8; 4][..]);
    }

    #[test]
    fn test_remove_and_keys_matching() {
        let dir = TempDir::new().unwrap();
        let region = open_region(&dir, 1024);

        region.set("tenant:a:1", &1u32).unwrap();
        region.set("tenant:a:2", &2u32).unwrap();
        region.set("tenant:b:1", &3u32).unwrap();

        let mut keys = region.keys_matching("tenant:a");
        keys.sort();
        assert_eq!(keys, vec!["tenant:a:1", "tenant:a:2"]);

        assert!(region.remove("tenant:a:1"));
        assert!(!region.remove("tenant:a:1"));
        assert_eq!(region.len(), 2);
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let region = open_region(&dir, 1024);
        region.set("k", &1u64).unwrap();

        region.close().unwrap();
        region.close().unwrap();

        assert!(!region.is_open());
        assert_eq!(region.get::<u64>("k"), None);
        assert!(matches!(region.set("k", &2u64), Err(Error::RegionClosed)));
    }

    #[test]
    fn test_reopen_starts_with_empty_index() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("l0.bin");
        {
            let region = MappedRegion::open(&path, 1024).unwrap();
            region.set("k", &"persisted bytes".to_string()).unwrap();
            region.close().unwrap();
        }

        let region = MappedRegion::open(&path, 1024).unwrap();
        assert!(region.is_empty());
        assert_eq!(region.get::<String>("k"), None);
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        use std::sync::Arc;
        use std::thread;

        let dir = TempDir::new().unwrap();
        let region = Arc::new(open_region(&dir, 1024 * 1024));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let region = Arc::clone(&region);
                thread::spawn(move || {
                    for i in 0..100 {
                        let key = format!("t{}-{}", t, i);
                        region.set(&key, &key).unwrap();
                        assert_eq!(region.get::<String>(&key).as_deref(), Some(key.as_str()));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(region.len(), 800);
    }
}
