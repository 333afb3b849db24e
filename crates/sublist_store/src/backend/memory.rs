//! In-memory journal backend.

use super::JournalBackend;
use crate::error::{StoreError, StoreResult};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// An ephemeral journal backend.
///
/// Used for tests, for `--ephemeral` runs, and as the degraded-mode fallback
/// when the durable medium cannot be opened.
///
/// Clones share the same buffer, so a test can keep a handle to inspect or
/// sabotage the journal after handing the backend to a store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
    refuse_writes: Arc<AtomicBool>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend preloaded with journal bytes.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
            refuse_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns a copy of the journal bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Makes every subsequent append fail with [`StoreError::Unavailable`].
    ///
    /// Simulates a medium that went read-only or full mid-session.
    pub fn set_refuse_writes(&self, refuse: bool) {
        self.refuse_writes.store(refuse, Ordering::SeqCst);
    }
}

impl JournalBackend for InMemoryBackend {
    fn read_all(&self) -> StoreResult<Vec<u8>> {
        Ok(self.data.read().clone())
    }

    fn append(&mut self, bytes: &[u8]) -> StoreResult<u64> {
        if self.refuse_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("medium refuses writes".into()));
        }
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn sync(&mut self) -> StoreResult<()> {
        Ok(())
    }

    fn size(&self) -> StoreResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> StoreResult<()> {
        let mut data = self.data.write();
        if new_size > data.len() as u64 {
            return Err(StoreError::corrupted(format!(
                "cannot truncate journal of {} bytes to {new_size}",
                data.len()
            )));
        }
        data.truncate(new_size as usize);
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }
}
