//! File-backed session provider.
//!
//! Directory layout:
//!
//! ```text
//! <dir>/
//! ├─ LOCK            # Advisory lock for single-process access
//! └─ store.cbor      # Committed rows, rewritten on every commit
//! ```
//!
//! Sessions work exactly as with [`InMemoryProvider`]; every successful commit
//! additionally writes the full committed state to `store.cbor` using
//! write-then-rename, so a crash leaves either the old or the new snapshot.

use crate::error::{StorageError, StorageResult};
use crate::memory::{InMemoryProvider, PersistFn, SharedState, Tables};
use crate::record::Record;
use crate::session::{Session, SessionProvider};
use crate::stats::ProviderStats;
use fs2::FileExt;
use idstore_codec::{from_cbor_reader, to_cbor_writer};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const LOCK_FILE: &str = "LOCK";
const SNAPSHOT_FILE: &str = "store.cbor";
const SNAPSHOT_TEMP: &str = "store.cbor.tmp";

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u16 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u16,
    next_key: i64,
    records: Vec<Record>,
}

/// A session provider persisting committed state to a directory.
///
/// Holds an exclusive lock on the directory for its whole lifetime; opening the
/// same directory twice fails with [`StorageError::Locked`].
#[derive(Debug)]
pub struct FileProvider {
    inner: InMemoryProvider,
    path: PathBuf,
    _lock_file: File,
}

impl FileProvider {
    /// Opens or creates a store directory.
    ///
    /// # Errors
    ///
    /// Returns `Locked` if another provider holds the directory, `Corrupted` if
    /// the snapshot cannot be read, or an I/O error.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        fs::create_dir_all(path)?;
        if !path.is_dir() {
            return Err(StorageError::Corrupted(format!(
                "not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        let snapshot = load_snapshot(&path.join(SNAPSHOT_FILE))?;
        let (tables, next_key) = match snapshot {
            Some(s) => {
                info!(path = %path.display(), records = s.records.len(), "loaded store snapshot");
                (Tables::from_records(s.records), s.next_key)
            }
            None => (Tables::default(), 1),
        };

        let dir = path.to_path_buf();
        let persist: PersistFn =
            Box::new(move |tables, next_key| save_snapshot(&dir, tables, next_key));
        let shared = SharedState::new(tables, Some(persist)).with_next_key(next_key);

        Ok(Self {
            inner: InMemoryProvider::from_shared(shared),
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns every committed row.
    #[must_use]
    pub fn committed_all(&self) -> Vec<Record> {
        self.inner.committed_all()
    }
}

impl SessionProvider for FileProvider {
    fn acquire(&self, transactional: bool) -> StorageResult<Box<dyn Session>> {
        self.inner.acquire(transactional)
    }

    fn release(&self, session: Box<dyn Session>) -> StorageResult<()> {
        self.inner.release(session)
    }

    fn stats(&self) -> ProviderStats {
        self.inner.stats()
    }
}

fn load_snapshot(path: &Path) -> StorageResult<Option<Snapshot>> {
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(None);
    }
    let snapshot: Snapshot = from_cbor_reader(BufReader::new(file))
        .map_err(|e| StorageError::Corrupted(format!("unreadable snapshot: {e}")))?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(StorageError::Corrupted(format!(
            "unsupported snapshot version {}",
            snapshot.version
        )));
    }
    Ok(Some(snapshot))
}

fn save_snapshot(dir: &Path, tables: &Tables, next_key: i64) -> StorageResult<()> {
    let snapshot = Snapshot {
        version: SNAPSHOT_VERSION,
        next_key,
        records: tables.records().cloned().collect(),
    };

    let temp_path = dir.join(SNAPSHOT_TEMP);
    let file = File::create(&temp_path)?;
    let mut writer = BufWriter::new(file);
    to_cbor_writer(&snapshot, &mut writer).map_err(|e| StorageError::Encoding(e.to_string()))?;
    writer.flush()?;
    writer
        .into_inner()
        .map_err(|e| StorageError::Io(e.into_error()))?
        .sync_all()?;

    fs::rename(&temp_path, dir.join(SNAPSHOT_FILE))?;
    sync_directory(dir)?;
    debug!(records = snapshot.records.len(), "snapshot written");
    Ok(())
}

#[cfg(unix)]
fn sync_directory(dir: &Path) -> StorageResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) -> StorageResult<()> {
    Ok(())
}
