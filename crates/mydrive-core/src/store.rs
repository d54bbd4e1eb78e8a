//! Persistence collaborators: the committed snapshot and where it lives.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FsError, FsResult};
use crate::tree::Tree;
use crate::user::UserRegistry;

/// Everything that survives a restart: the tree and the users.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub(crate) tree: Tree,
    pub(crate) users: UserRegistry,
}

impl Snapshot {
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn users(&self) -> &UserRegistry {
        &self.users
    }
}

/// Transactional store: `commit` makes a whole snapshot durable or fails
/// without effect; `load` returns the last committed one.
pub trait PersistentStore: Send + Sync {
    fn load(&self) -> FsResult<Option<Snapshot>>;
    fn commit(&self, snapshot: &Snapshot) -> FsResult<()>;
}

/// Keeps the last committed snapshot in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    committed: Mutex<Option<Snapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a committed snapshot
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            committed: Mutex::new(Some(snapshot)),
        }
    }

    pub fn last_committed(&self) -> Option<Snapshot> {
        self.committed.lock().ok().and_then(|s| s.clone())
    }
}

impl PersistentStore for MemoryStore {
    fn load(&self) -> FsResult<Option<Snapshot>> {
        let committed = self.committed.lock().map_err(|_| FsError::LockPoisoned)?;
        Ok(committed.clone())
    }

    fn commit(&self, snapshot: &Snapshot) -> FsResult<()> {
        let mut committed = self.committed.lock().map_err(|_| FsError::LockPoisoned)?;
        *committed = Some(snapshot.clone());
        Ok(())
    }
}

/// Snapshot stored as one JSON document. Commits write a sibling temp file
/// and rename it over the target.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn open<P: AsRef<Path>>(path: P) -> FsResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "snapshot".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl PersistentStore for JsonFileStore {
    fn load(&self) -> FsResult<Option<Snapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&self.path)?;
        let snapshot = serde_json::from_slice(&bytes)?;
        debug!(path = %self.path.display(), "snapshot loaded");
        Ok(Some(snapshot))
    }

    fn commit(&self, snapshot: &Snapshot) -> FsResult<()> {
        let temp = self.temp_path();
        let json = serde_json::to_vec_pretty(snapshot)?;
        {
            let mut file = fs::File::create(&temp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&temp);
            FsError::Store(format!("rename {} failed: {e}", temp.display()))
        })?;
        debug!(path = %self.path.display(), bytes = json.len(), "snapshot committed");
        Ok(())
    }
}
