//! Append-only key-value log with an ordered index
//!
//! # Binary Format (per record, little endian)
//! ```text
//! [body_len:  u32]
//! [key_len:   u16][key: utf-8 bytes]
//! [value_len: u32][value: bytes]
//! [checksum:  u32]  // CRC32C over key + value
//! ```
//!
//! Records are never rewritten or removed. On open the whole file is replayed
//! into a `BTreeMap`, which serves every read; the file is only read again on
//! the next open.
//!
//! Every value stays resident for the life of the store, so memory grows with
//! the log, as does the buffer used to replay it on open.

use crc32c::crc32c;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use oracle_core::{ReadResult, StorageReadError, StorageWriteError, WriteResult};

/// Log file name inside the data directory
pub const LOG_FILE: &str = "entries.log";

/// Ownership marker inside the data directory
pub const LOCK_FILE: &str = "LOCK";

// key_len (2) + value_len (4) + checksum (4)
const MIN_BODY_LEN: usize = 10;

// Anything larger is treated as corruption rather than allocated
const MAX_BODY_LEN: usize = 64 * 1024 * 1024;

type Index = BTreeMap<String, Arc<[u8]>>;

/// Exclusive claim on a data directory, released on drop
#[derive(Debug)]
struct DirLock {
    path: PathBuf,
}

impl DirLock {
    fn acquire(dir: &Path) -> ReadResult<Self> {
        let path = dir.join(LOCK_FILE);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                Ok(Self { path })
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(StorageReadError::Locked(
                format!(
                    "{} (remove {} if no other node is running)",
                    dir.display(),
                    path.display()
                ),
            )),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to release {}: {}", self.path.display(), e);
        }
    }
}

#[derive(Debug)]
struct Writer {
    file: File,
    /// Length of the valid prefix of the file
    len: u64,
    /// Set when a failed append could not be rolled back; the file may end
    /// in junk, so no further records are written to it
    poisoned: bool,
}

/// Durable, ordered, insert-only key-value log.
///
/// Single writer, many readers: inserts serialize on the file handle while
/// readers only take the index lock for the duration of one lookup.
#[derive(Debug)]
pub struct LogStore {
    path: PathBuf,
    writer: Mutex<Writer>,
    index: RwLock<Index>,
    _lock: DirLock,
}

impl LogStore {
    /// Open (or create) the log in `dir`, replaying existing records.
    pub fn open(dir: impl AsRef<Path>) -> ReadResult<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let lock = DirLock::acquire(dir)?;
        let path = dir.join(LOG_FILE);

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let (index, valid_len) = replay(&data)?;

        if (valid_len as usize) < data.len() {
            warn!(
                "Dropping torn record at end of {}: {} trailing bytes",
                path.display(),
                data.len() - valid_len as usize
            );
            file.set_len(valid_len)?;
            file.sync_data()?;
        }

        info!("Opened {} with {} records", path.display(), index.len());

        Ok(Self {
            path,
            writer: Mutex::new(Writer {
                file,
                len: valid_len,
                poisoned: false,
            }),
            index: RwLock::new(index),
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist `value` under a key that has never been written.
    ///
    /// The record is synced to disk before it becomes visible to readers.
    pub fn insert(&self, key: &str, value: &[u8]) -> WriteResult<()> {
        if key.len() > u16::MAX as usize {
            return Err(StorageWriteError::KeyTooLong(key.len()));
        }
        if value.len() > MAX_BODY_LEN - MIN_BODY_LEN - key.len() {
            return Err(StorageWriteError::Encode(format!(
                "value of {} bytes exceeds record limit",
                value.len()
            )));
        }

        let mut writer = self.writer.lock();

        if writer.poisoned {
            return Err(StorageWriteError::Io(io::Error::other(format!(
                "{} has an unrecovered partial record; reopen the store",
                self.path.display()
            ))));
        }

        if self.index.read().contains_key(key) {
            return Err(StorageWriteError::KeyExists(key.to_string()));
        }

        let record = encode_record(key, value);
        if let Err(e) = write_synced(&mut writer.file, &record) {
            // Cut off whatever part of the record made it to disk
            let valid = writer.len;
            if let Err(trunc) = writer.file.set_len(valid) {
                warn!("Failed to roll back partial record in {}: {}", self.path.display(), trunc);
                writer.poisoned = true;
            }
            return Err(e.into());
        }

        writer.len += record.len() as u64;
        self.index.write().insert(key.to_string(), Arc::from(value));
        debug!("Appended {} ({} bytes)", key, value.len());

        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<Arc<[u8]>> {
        self.index.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// Entries whose key starts with `prefix`, greatest key first.
    ///
    /// The iterator is lazy: each step looks up the next entry below the last
    /// one it returned, so entries inserted meanwhile may or may not be seen.
    /// Calling this again restarts from the top.
    pub fn scan_prefix_rev(&self, prefix: &str) -> PrefixScanRev<'_> {
        PrefixScanRev {
            store: self,
            prefix: prefix.to_string(),
            upper: prefix_successor(prefix),
            cursor: None,
            done: false,
        }
    }

    /// Entries with `start <= key <= end`, in ascending key order
    pub fn range(&self, start: &str, end: &str) -> Vec<(String, Arc<[u8]>)> {
        if start > end {
            return Vec::new();
        }

        self.index
            .read()
            .range::<str, _>((Bound::Included(start), Bound::Included(end)))
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect()
    }
}

/// Reverse prefix scan over a [`LogStore`]
pub struct PrefixScanRev<'a> {
    store: &'a LogStore,
    prefix: String,
    /// Smallest string greater than every key with the prefix
    upper: Option<String>,
    /// Last key returned
    cursor: Option<String>,
    done: bool,
}

impl Iterator for PrefixScanRev<'_> {
    type Item = (String, Arc<[u8]>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let upper = match (&self.cursor, &self.upper) {
            (Some(cursor), _) => Bound::Excluded(cursor.as_str()),
            (None, Some(upper)) => Bound::Excluded(upper.as_str()),
            (None, None) => Bound::Unbounded,
        };

        let next = {
            let index = self.store.index.read();
            index
                .range::<str, _>((Bound::Included(self.prefix.as_str()), upper))
                .next_back()
                .filter(|(k, _)| k.starts_with(&self.prefix))
                .map(|(k, v)| (k.clone(), Arc::clone(v)))
        };

        match next {
            Some((key, value)) => {
                self.cursor = Some(key.clone());
                Some((key, value))
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

/// Smallest string that sorts after every string starting with `prefix`
fn prefix_successor(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        let mut code = last as u32 + 1;
        while code <= char::MAX as u32 {
            if let Some(next) = char::from_u32(code) {
                chars.push(next);
                return Some(chars.into_iter().collect());
            }
            code += 1;
        }
    }
    None
}

fn write_synced(file: &mut File, record: &[u8]) -> io::Result<()> {
    file.write_all(record)?;
    file.sync_data()
}

fn encode_record(key: &str, value: &[u8]) -> Vec<u8> {
    let key_bytes = key.as_bytes();
    let body_len = MIN_BODY_LEN + key_bytes.len() + value.len();

    let mut checked = Vec::with_capacity(key_bytes.len() + value.len());
    checked.extend_from_slice(key_bytes);
    checked.extend_from_slice(value);
    let checksum = crc32c(&checked);

    let mut buf = Vec::with_capacity(4 + body_len);
    buf.extend_from_slice(&(body_len as u32).to_le_bytes());
    buf.extend_from_slice(&(key_bytes.len() as u16).to_le_bytes());
    buf.extend_from_slice(key_bytes);
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(value);
    buf.extend_from_slice(&checksum.to_le_bytes());
    buf
}

enum Frame<'a> {
    Complete {
        key: &'a str,
        value: &'a [u8],
        len: usize,
    },
    /// The data ends before the record does
    Torn,
}

fn parse_frame(data: &[u8]) -> Result<Frame<'_>, String> {
    if data.len() < 4 {
        return Ok(Frame::Torn);
    }

    let body_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if body_len < MIN_BODY_LEN {
        return Err(format!("body too small: {} bytes", body_len));
    }
    if body_len > MAX_BODY_LEN {
        return Err(format!("implausible body length: {}", body_len));
    }

    let total = 4 + body_len;
    if data.len() < total {
        return Ok(Frame::Torn);
    }

    let body = &data[4..total];
    let key_len = u16::from_le_bytes([body[0], body[1]]) as usize;
    let key_end = 2 + key_len;
    if key_end + 8 > body.len() {
        return Err(format!("key length {} exceeds body", key_len));
    }

    let key = std::str::from_utf8(&body[2..key_end]).map_err(|e| format!("key not utf-8: {}", e))?;

    let value_len = u32::from_le_bytes([
        body[key_end],
        body[key_end + 1],
        body[key_end + 2],
        body[key_end + 3],
    ]) as usize;
    let value_start = key_end + 4;
    if value_start + value_len + 4 != body.len() {
        return Err(format!("value length {} does not match body", value_len));
    }

    let value = &body[value_start..value_start + value_len];
    let stored = u32::from_le_bytes([
        body[body.len() - 4],
        body[body.len() - 3],
        body[body.len() - 2],
        body[body.len() - 1],
    ]);

    let mut checked = Vec::with_capacity(key_len + value_len);
    checked.extend_from_slice(key.as_bytes());
    checked.extend_from_slice(value);
    if crc32c(&checked) != stored {
        return Err(format!("checksum mismatch for {}", key));
    }

    Ok(Frame::Complete {
        key,
        value,
        len: total,
    })
}

/// Rebuild the index, returning it with the length of the valid prefix
fn replay(data: &[u8]) -> ReadResult<(Index, u64)> {
    let mut index = Index::new();
    let mut pos = 0usize;

    while pos < data.len() {
        match parse_frame(&data[pos..]) {
            Ok(Frame::Complete { key, value, len }) => {
                index.insert(key.to_string(), Arc::from(value));
                pos += len;
            }
            Ok(Frame::Torn) => break,
            Err(detail) => {
                return Err(StorageReadError::Corrupt {
                    offset: pos as u64,
                    detail,
                })
            }
        }
    }

    Ok((index, pos as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn keys(entries: impl IntoIterator<Item = (String, Arc<[u8]>)>) -> Vec<String> {
        entries.into_iter().map(|(k, _)| k).collect()
    }

    #[test]
    fn test_insert_and_get() {
        let tmp = TempDir::new().unwrap();
        let store = LogStore::open(tmp.path()).unwrap();

        store.insert("a", b"one").unwrap();
        assert_eq!(store.get("a").as_deref(), Some(&b"one"[..]));
        assert!(store.get("b").is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_existing_key_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = LogStore::open(tmp.path()).unwrap();

        store.insert("a", b"one").unwrap();
        let err = store.insert("a", b"two").unwrap_err();

        assert!(matches!(err, StorageWriteError::KeyExists(ref k) if k == "a"));
        assert_eq!(store.get("a").as_deref(), Some(&b"one"[..]));
    }

    #[test]
    fn test_reopen_replays_records() {
        let tmp = TempDir::new().unwrap();
        {
            let store = LogStore::open(tmp.path()).unwrap();
            store.insert("b", b"2").unwrap();
            store.insert("a", b"1").unwrap();
            store.insert("c", b"").unwrap();
        }

        let store = LogStore::open(tmp.path()).unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.get("a").as_deref(), Some(&b"1"[..]));
        assert_eq!(store.get("c").as_deref(), Some(&b""[..]));
        assert_eq!(keys(store.range("a", "z")), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let tmp = TempDir::new().unwrap();
        let log_path = tmp.path().join(LOG_FILE);
        {
            let store = LogStore::open(tmp.path()).unwrap();
            store.insert("a", b"1").unwrap();
        }
        let valid_len = fs::metadata(&log_path).unwrap().len();

        // Half of a second record, as left by a crash mid-write
        let partial = encode_record("b", b"2");
        let mut file = OpenOptions::new().append(true).open(&log_path).unwrap();
        file.write_all(&partial[..partial.len() / 2]).unwrap();
        drop(file);

        let store = LogStore::open(tmp.path()).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(fs::metadata(&log_path).unwrap().len(), valid_len);

        store.insert("b", b"2").unwrap();
        drop(store);

        let store = LogStore::open(tmp.path()).unwrap();
        assert_eq!(keys(store.range("a", "z")), vec!["a", "b"]);
    }

    #[test]
    fn test_checksum_mismatch_is_corruption() {
        let tmp = TempDir::new().unwrap();
        let log_path = tmp.path().join(LOG_FILE);
        {
            let store = LogStore::open(tmp.path()).unwrap();
            store.insert("a", b"hello").unwrap();
        }

        let mut data = fs::read(&log_path).unwrap();
        // Flip a byte inside the value
        let value_pos = 4 + 2 + 1 + 4;
        data[value_pos] ^= 0xFF;
        fs::write(&log_path, &data).unwrap();

        let err = LogStore::open(tmp.path()).unwrap_err();
        assert!(matches!(err, StorageReadError::Corrupt { offset: 0, .. }));
    }

    #[test]
    fn test_poisoned_writer_refuses_inserts() {
        let tmp = TempDir::new().unwrap();
        {
            let store = LogStore::open(tmp.path()).unwrap();
            store.insert("a", b"1").unwrap();

            store.writer.lock().poisoned = true;
            assert!(matches!(store.insert("b", b"2"), Err(StorageWriteError::Io(_))));
            assert!(!store.contains("b"));
            assert_eq!(store.get("a").as_deref(), Some(&b"1"[..]));
        }

        let store = LogStore::open(tmp.path()).unwrap();
        store.insert("b", b"2").unwrap();
        assert_eq!(keys(store.range("a", "z")), vec!["a", "b"]);
    }

    #[test]
    fn test_directory_lock() {
        let tmp = TempDir::new().unwrap();
        let store = LogStore::open(tmp.path()).unwrap();

        let err = LogStore::open(tmp.path()).unwrap_err();
        assert!(matches!(err, StorageReadError::Locked(_)));

        drop(store);
        assert!(LogStore::open(tmp.path()).is_ok());
    }

    #[test]
    fn test_scan_prefix_rev() {
        let tmp = TempDir::new().unwrap();
        let store = LogStore::open(tmp.path()).unwrap();

        for key in ["btc-1", "btc-3", "btc-2", "btd-9", "bta-9", "btc"] {
            store.insert(key, key.as_bytes()).unwrap();
        }

        assert_eq!(keys(store.scan_prefix_rev("btc-")), vec!["btc-3", "btc-2", "btc-1"]);
        assert!(store.scan_prefix_rev("eth-").next().is_none());
    }

    #[test]
    fn test_scan_is_lazy() {
        let tmp = TempDir::new().unwrap();
        let store = LogStore::open(tmp.path()).unwrap();
        store.insert("p-2", b"").unwrap();
        store.insert("p-4", b"").unwrap();

        let mut scan = store.scan_prefix_rev("p-");
        assert_eq!(scan.next().map(|(k, _)| k).as_deref(), Some("p-4"));

        // Inserted below the cursor while the scan is paused
        store.insert("p-3", b"").unwrap();
        assert_eq!(keys(scan), vec!["p-3", "p-2"]);
    }

    #[test]
    fn test_range_bounds() {
        let tmp = TempDir::new().unwrap();
        let store = LogStore::open(tmp.path()).unwrap();
        for key in ["k1", "k2", "k3", "k4"] {
            store.insert(key, b"").unwrap();
        }

        assert_eq!(keys(store.range("k2", "k3")), vec!["k2", "k3"]);
        assert!(store.range("k3", "k2").is_empty());
        assert_eq!(keys(store.range("k4", "k4")), vec!["k4"]);
    }

    #[test]
    fn test_prefix_successor() {
        assert_eq!(prefix_successor("btc-").as_deref(), Some("btc."));
        assert_eq!(prefix_successor("a\u{10FFFF}").as_deref(), Some("b"));
        assert_eq!(prefix_successor(""), None);
    }
}
