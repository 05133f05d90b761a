//! Seam to the external content-addressed sync engine.
//!
//! The login core only ever hands the engine a directory and the
//! hex-encoded repo access key; everything inside the sync directory is
//! opaque to this crate.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::LoginResult;

/// External synchronization engine for account and wallet repositories.
pub trait SyncEngine: Send + Sync {
    /// Initializes an empty repository at `dir`.
    fn make_repo(&self, dir: &Path) -> LoginResult<()>;

    /// Synchronizes `dir` against the remote repository addressed by
    /// `sync_key_hex`. Returns `true` if local files changed.
    fn sync(&self, dir: &Path, sync_key_hex: &str) -> LoginResult<bool>;
}

impl<T: SyncEngine + ?Sized> SyncEngine for std::sync::Arc<T> {
    fn make_repo(&self, dir: &Path) -> LoginResult<()> {
        (**self).make_repo(dir)
    }

    fn sync(&self, dir: &Path, sync_key_hex: &str) -> LoginResult<bool> {
        (**self).sync(dir, sync_key_hex)
    }
}

/// In-memory sync engine for testing.
///
/// **FOR TESTING ONLY** — performs no real synchronization; it records
/// each call so tests can assert the orchestrator drove the engine at the
/// right points.
#[derive(Default)]
pub struct MemorySyncEngine {
    repos: Mutex<Vec<PathBuf>>,
    syncs: Mutex<Vec<(PathBuf, String)>>,
}

impl MemorySyncEngine {
    /// Creates a new engine with no recorded activity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the directories passed to [`SyncEngine::make_repo`].
    #[must_use]
    pub fn repos(&self) -> Vec<PathBuf> {
        self.repos.lock().unwrap().clone()
    }

    /// Returns the number of [`SyncEngine::sync`] calls so far.
    #[must_use]
    pub fn sync_count(&self) -> usize {
        self.syncs.lock().unwrap().len()
    }

    /// Returns the sync key used by the most recent sync, if any.
    #[must_use]
    pub fn last_sync_key(&self) -> Option<String> {
        self.syncs.lock().unwrap().last().map(|(_, key)| key.clone())
    }
}

impl SyncEngine for MemorySyncEngine {
    fn make_repo(&self, dir: &Path) -> LoginResult<()> {
        self.repos.lock().unwrap().push(dir.to_path_buf());
        Ok(())
    }

    fn sync(&self, dir: &Path, sync_key_hex: &str) -> LoginResult<bool> {
        self.syncs
            .lock()
            .unwrap()
            .push((dir.to_path_buf(), sync_key_hex.to_string()));
        Ok(false)
    }
}
