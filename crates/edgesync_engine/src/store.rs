//! Persistence of engine state.
//!
//! The journal, checkpoints, audit log and (for self-contained nodes) the
//! local records are saved together as one JSON snapshot.

use crate::audit::AuditSnapshot;
use crate::checkpoint::SyncCheckpoint;
use crate::error::{SyncError, SyncResult};
use crate::journal::JournalSnapshot;
use crate::record::LocalRecord;
use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Everything a node needs to resume after a restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Journal contents.
    #[serde(default)]
    pub journal: JournalSnapshot,
    /// Per-peer checkpoints.
    #[serde(default)]
    pub checkpoints: Vec<SyncCheckpoint>,
    /// Audit log.
    #[serde(default)]
    pub audit: AuditSnapshot,
    /// Local records.
    #[serde(default)]
    pub records: Vec<LocalRecord>,
}

/// Loads and saves state snapshots.
pub trait StateStore: Send + Sync {
    /// Loads the last saved snapshot, if any.
    fn load(&self) -> SyncResult<Option<StateSnapshot>>;

    /// Saves a snapshot, replacing the previous one.
    fn save(&self, snapshot: &StateSnapshot) -> SyncResult<()>;
}

/// Keeps the last snapshot in memory.
#[derive(Default)]
pub struct MemoryStateStore {
    saved: Mutex<Option<StateSnapshot>>,
    saves: Mutex<usize>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of saves so far.
    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }

    /// The last saved snapshot.
    pub fn last(&self) -> Option<StateSnapshot> {
        self.saved.lock().clone()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> SyncResult<Option<StateSnapshot>> {
        Ok(self.saved.lock().clone())
    }

    fn save(&self, snapshot: &StateSnapshot) -> SyncResult<()> {
        *self.saved.lock() = Some(snapshot.clone());
        *self.saves.lock() += 1;
        Ok(())
    }
}

/// Stores the snapshot as a JSON file.
///
/// Saves write a temporary file next to the target, fsync it and rename it
/// over the target, so a crash leaves either the old or the new state.
///
/// The store holds an exclusive lock on `<file>.lock` from
/// [`FileStateStore::open`] until it is dropped: a second store over the
/// same file, in this process or another, fails to open.
pub struct FileStateStore {
    path: PathBuf,
    write_lock: Mutex<()>,
    _lock_file: File,
}

impl FileStateStore {
    /// Opens a store for the given file path and locks it.
    pub fn open(path: impl Into<PathBuf>) -> SyncResult<Self> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(sibling(&path, ".lock"))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(SyncError::StateLocked(path.display().to_string()));
        }

        Ok(Self {
            path,
            write_lock: Mutex::new(()),
            _lock_file: lock_file,
        })
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> SyncResult<()> {
        if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            File::open(dir)?.sync_all()?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> SyncResult<()> {
        Ok(())
    }
}

/// `path` with `suffix` appended to its file name.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

impl StateStore for FileStateStore {
    fn load(&self) -> SyncResult<Option<StateSnapshot>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, snapshot: &StateSnapshot) -> SyncResult<()> {
        let _guard = self.write_lock.lock();
        if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let temp_path = sibling(&self.path, ".tmp");
        let data = serde_json::to_vec_pretty(snapshot)?;
        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &self.path)?;
        self.sync_directory()
    }
}
