//! Persistence of the saved subscription handle.

use crate::error::{SyncError, SyncResult};
use parking_lot::RwLock;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use sublist_sync_protocol::SubscriptionHandle;
use tracing::warn;

/// Remembers which subscription was last saved remotely.
pub trait SubscriptionStore: Send + Sync {
    /// Returns the persisted handle, if any.
    fn load(&self) -> SyncResult<Option<SubscriptionHandle>>;

    /// Persists a handle, replacing any previous one.
    fn save(&self, handle: &SubscriptionHandle) -> SyncResult<()>;
}

/// Keeps the handle for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemorySubscriptionStore {
    handle: RwLock<Option<SubscriptionHandle>>,
}

impl MemorySubscriptionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SubscriptionStore for MemorySubscriptionStore {
    fn load(&self) -> SyncResult<Option<SubscriptionHandle>> {
        Ok(self.handle.read().clone())
    }

    fn save(&self, handle: &SubscriptionHandle) -> SyncResult<()> {
        *self.handle.write() = Some(handle.clone());
        Ok(())
    }
}

/// Keeps the handle in a JSON file.
#[derive(Debug, Clone)]
pub struct FileSubscriptionStore {
    path: PathBuf,
}

impl FileSubscriptionStore {
    /// Uses the file at `path`. The file is created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SubscriptionStore for FileSubscriptionStore {
    fn load(&self) -> SyncResult<Option<SubscriptionHandle>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(SyncError::Subscription(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )))
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(handle) => Ok(Some(handle)),
            Err(error) => {
                // Treated as never saved; the next ensure saves again.
                warn!(path = %self.path.display(), %error, "ignoring unreadable subscription file");
                Ok(None)
            }
        }
    }

    fn save(&self, handle: &SubscriptionHandle) -> SyncResult<()> {
        let json = serde_json::to_vec_pretty(handle)
            .map_err(|e| SyncError::Subscription(format!("failed to encode handle: {e}")))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    SyncError::Subscription(format!("failed to create {}: {e}", parent.display()))
                })?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)
            .and_then(|()| fs::rename(&tmp, &self.path))
            .map_err(|e| {
                SyncError::Subscription(format!("failed to write {}: {e}", self.path.display()))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sublist_sync_protocol::SubscriptionSpec;
    use tempfile::tempdir;

    #[test]
    fn memory_store_roundtrip() {
        let store = MemorySubscriptionStore::new();
        assert!(store.load().unwrap().is_none());

        let handle = SubscriptionHandle::for_spec(SubscriptionSpec::default());
        store.save(&handle).unwrap();
        assert_eq!(store.load().unwrap(), Some(handle));
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("subscription.json");
        let handle = SubscriptionHandle::for_spec(SubscriptionSpec::default());

        assert!(FileSubscriptionStore::new(&path).load().unwrap().is_none());
        FileSubscriptionStore::new(&path).save(&handle).unwrap();

        let reopened = FileSubscriptionStore::new(&path);
        assert_eq!(reopened.load().unwrap(), Some(handle));
        assert_eq!(reopened.path(), path);
    }

    #[test]
    fn unreadable_file_counts_as_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("subscription.json");
        fs::write(&path, b"{ half").unwrap();

        assert!(FileSubscriptionStore::new(&path).load().unwrap().is_none());
    }
}
