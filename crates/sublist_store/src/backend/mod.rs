//! Byte-level media the event journal is written to.
//!
//! Backends are opaque, append-only byte stores. They know nothing about
//! frames or events; [`crate::journal`] owns the format.

mod file;
mod memory;

pub use file::FileBackend;
pub use memory::InMemoryBackend;

use crate::error::StoreResult;

/// An append-only medium for the event journal.
///
/// # Invariants
///
/// - `append` returns the offset the data was written at
/// - `read_all` returns every byte appended and not truncated
/// - after `sync` returns, appended data survives process termination
///   (for durable backends)
pub trait JournalBackend: Send {
    /// Reads the whole journal.
    fn read_all(&self) -> StoreResult<Vec<u8>>;

    /// Appends data and returns the offset it starts at.
    fn append(&mut self, data: &[u8]) -> StoreResult<u64>;

    /// Makes all appended data durable.
    fn sync(&mut self) -> StoreResult<()>;

    /// Returns the current journal length in bytes.
    fn size(&self) -> StoreResult<u64>;

    /// Cuts the journal back to `new_size` bytes.
    ///
    /// Used to drop a torn tail frame after a crash.
    fn truncate(&mut self, new_size: u64) -> StoreResult<()>;

    /// Returns true if data written here survives a restart.
    fn is_durable(&self) -> bool;
}
