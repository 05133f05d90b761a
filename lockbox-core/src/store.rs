//! On-disk account directory store.
//!
//! The store root holds numbered slot directories `Account_0`, `Account_1`,
//! and so on. Each slot contains `UserName.json`, `CarePackage.json`,
//! `LoginPackage.json`, and a `sync/` subdirectory owned by the external
//! sync engine. Slot indices are opaque and reused after deletion.
//!
//! This component is the source of truth for "is there a local account" —
//! it is never shadowed by in-memory state.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LoginError, LoginResult};

/// Local numeric handle for an on-disk account directory.
pub type SlotId = u32;

const SLOT_PREFIX: &str = "Account_";
const USERNAME_FILE: &str = "UserName.json";
const CARE_PACKAGE_FILE: &str = "CarePackage.json";
const LOGIN_PACKAGE_FILE: &str = "LoginPackage.json";
const SYNC_DIR: &str = "sync";

/// Which of the two package files an operation targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PackageKind {
    /// `CarePackage.json`.
    Care,
    /// `LoginPackage.json`.
    Login,
}

impl PackageKind {
    const fn filename(self) -> &'static str {
        match self {
            Self::Care => CARE_PACKAGE_FILE,
            Self::Login => LOGIN_PACKAGE_FILE,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct UserNameFile {
    #[serde(rename = "userName")]
    user_name: String,
}

/// Store mapping usernames to numbered local account slots.
pub struct AccountStore {
    root: PathBuf,
}

impl AccountStore {
    /// Creates a store rooted at `root`. The directory is created lazily
    /// on the first slot allocation.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Finds the slot holding an account for `username`, if one exists.
    ///
    /// Linear scan over the slot directories, matching on the contents of
    /// each `UserName.json`.
    pub fn slot_for_username(&self, username: &str) -> LoginResult<Option<SlotId>> {
        for slot in self.existing_slots()? {
            let name_path = self.slot_dir(slot).join(USERNAME_FILE);
            let Ok(text) = fs::read_to_string(&name_path) else {
                continue; // half-created slot; skip rather than fail the scan
            };
            let parsed: UserNameFile = serde_json::from_str(&text)
                .map_err(|e| LoginError::parse(format!("{USERNAME_FILE}: {e}")))?;
            if parsed.user_name == username {
                return Ok(Some(slot));
            }
        }
        Ok(None)
    }

    /// Allocates the lowest unused slot index, creates its directory, and
    /// writes the name file.
    pub fn allocate_slot(&self, username: &str) -> LoginResult<SlotId> {
        fs::create_dir_all(&self.root)
            .map_err(|e| LoginError::io("creating store root", e))?;

        let taken = self.existing_slots()?;
        let slot = (0..).find(|n| !taken.contains(n)).unwrap_or(0);

        let dir = self.slot_dir(slot);
        fs::create_dir(&dir).map_err(|e| LoginError::io("creating account slot", e))?;

        let name = serde_json::to_string_pretty(&UserNameFile {
            user_name: username.to_string(),
        })?;
        write_atomic(&dir.join(USERNAME_FILE), name.as_bytes())?;

        log::debug!("allocated account slot {slot}");
        Ok(slot)
    }

    /// Atomically replaces one of the package files in a slot.
    ///
    /// Writes to a temp file in the same directory, syncs it, then renames
    /// over the target, so no partial file is ever observable.
    pub fn write_package(&self, slot: SlotId, kind: PackageKind, text: &str) -> LoginResult<()> {
        let path = self.slot_dir(slot).join(kind.filename());
        write_atomic(&path, text.as_bytes())
    }

    /// Reads one of the package files from a slot, or `None` if the file
    /// does not exist.
    pub fn read_package(&self, slot: SlotId, kind: PackageKind) -> LoginResult<Option<String>> {
        let path = self.slot_dir(slot).join(kind.filename());
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LoginError::io("reading package file", e)),
        }
    }

    /// Returns the path of the sync subdirectory for a slot.
    #[must_use]
    pub fn sync_dir(&self, slot: SlotId) -> PathBuf {
        self.slot_dir(slot).join(SYNC_DIR)
    }

    /// Creates the sync subdirectory for a slot; the external sync engine
    /// owns its contents.
    pub fn create_sync_dir(&self, slot: SlotId) -> LoginResult<PathBuf> {
        let dir = self.sync_dir(slot);
        fs::create_dir_all(&dir).map_err(|e| LoginError::io("creating sync directory", e))?;
        Ok(dir)
    }

    /// Recursively removes a slot directory. Idempotent: removing a slot
    /// that does not exist succeeds.
    pub fn delete_slot(&self, slot: SlotId) -> LoginResult<()> {
        let dir = self.slot_dir(slot);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                log::debug!("deleted account slot {slot}");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LoginError::io("deleting account slot", e)),
        }
    }

    fn slot_dir(&self, slot: SlotId) -> PathBuf {
        self.root.join(format!("{SLOT_PREFIX}{slot}"))
    }

    /// Lists the slot indices present on disk, in no particular order.
    fn existing_slots(&self) -> LoginResult<Vec<SlotId>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(LoginError::io("scanning store root", e)),
        };

        let mut slots = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| LoginError::io("scanning store root", e))?;
            let name = entry.file_name();
            let Some(index) = name
                .to_str()
                .and_then(|n| n.strip_prefix(SLOT_PREFIX))
                .and_then(|n| n.parse::<SlotId>().ok())
            else {
                continue;
            };
            slots.push(index);
        }
        Ok(slots)
    }
}

/// Write-to-temp-then-rename in the target's own directory, with an fsync
/// before the rename so the file is either the old or the new content.
fn write_atomic(path: &Path, bytes: &[u8]) -> LoginResult<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file =
            fs::File::create(&tmp).map_err(|e| LoginError::io("creating temp file", e))?;
        file.write_all(bytes)
            .map_err(|e| LoginError::io("writing temp file", e))?;
        file.sync_all()
            .map_err(|e| LoginError::io("syncing temp file", e))?;
    }
    fs::rename(&tmp, path).map_err(|e| LoginError::io("renaming temp file", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, AccountStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = AccountStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn test_empty_store_has_no_slots() {
        let (_dir, store) = store();
        assert_eq!(store.slot_for_username("alice").unwrap(), None);
    }

    #[test]
    fn test_allocate_and_find() {
        let (_dir, store) = store();
        let slot = store.allocate_slot("alice").unwrap();
        assert_eq!(slot, 0);
        assert_eq!(store.slot_for_username("alice").unwrap(), Some(0));
        assert_eq!(store.slot_for_username("bob").unwrap(), None);
    }

    #[test]
    fn test_lowest_unused_slot_is_reused() {
        let (_dir, store) = store();
        assert_eq!(store.allocate_slot("alice").unwrap(), 0);
        assert_eq!(store.allocate_slot("bob").unwrap(), 1);
        assert_eq!(store.allocate_slot("carol").unwrap(), 2);

        store.delete_slot(1).unwrap();
        assert_eq!(store.allocate_slot("dave").unwrap(), 1);
    }

    #[test]
    fn test_delete_does_not_perturb_other_slots() {
        let (_dir, store) = store();
        let alice = store.allocate_slot("alice").unwrap();
        let bob = store.allocate_slot("bob").unwrap();

        store.delete_slot(alice).unwrap();
        assert_eq!(store.slot_for_username("alice").unwrap(), None);
        assert_eq!(store.slot_for_username("bob").unwrap(), Some(bob));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (_dir, store) = store();
        let slot = store.allocate_slot("alice").unwrap();
        store.delete_slot(slot).unwrap();
        store.delete_slot(slot).unwrap();
        store.delete_slot(99).unwrap();
    }

    #[test]
    fn test_package_write_read() {
        let (_dir, store) = store();
        let slot = store.allocate_slot("alice").unwrap();

        assert_eq!(store.read_package(slot, PackageKind::Care).unwrap(), None);

        store
            .write_package(slot, PackageKind::Care, "{\"care\": 1}")
            .unwrap();
        assert_eq!(
            store.read_package(slot, PackageKind::Care).unwrap().as_deref(),
            Some("{\"care\": 1}")
        );

        // Replacing leaves no temp file behind.
        store
            .write_package(slot, PackageKind::Care, "{\"care\": 2}")
            .unwrap();
        assert_eq!(
            store.read_package(slot, PackageKind::Care).unwrap().as_deref(),
            Some("{\"care\": 2}")
        );
        let leftovers: Vec<_> = fs::read_dir(store.slot_dir(slot))
            .unwrap()
            .filter_map(|e| e.unwrap().file_name().into_string().ok())
            .filter(|n| n.ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_sync_dir() {
        let (_dir, store) = store();
        let slot = store.allocate_slot("alice").unwrap();
        let sync = store.create_sync_dir(slot).unwrap();
        assert!(sync.is_dir());
        assert_eq!(sync, store.sync_dir(slot));
    }
}
