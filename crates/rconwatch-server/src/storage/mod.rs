//! Storage abstraction for recorded sessions.
//!
//! Trait-based abstraction for persisting session metadata and each
//! session's append-only event log. The trait is synchronous (no async);
//! every call is a short, self-contained transaction.

mod chaotic;
mod error;
mod memory;
mod redb;

pub use chaotic::ChaoticStorage;
pub use error::StorageError;
pub use memory::MemoryStorage;
use rconwatch_core::{Event, SessionId, SessionInfo};

pub use self::redb::RedbStorage;

/// Storage abstraction for sessions and their event logs
///
/// Must be Clone (shared by the session manager and capture tasks), Send +
/// Sync (thread-safe), and synchronous (no async methods). Implementations
/// share internal state via Arc, so clones access the same underlying
/// storage.
///
/// Readers always observe a log either before or after an append, never a
/// partially written entry.
pub trait Storage: Clone + Send + Sync + 'static {
    /// Insert or replace a session's metadata.
    fn put_session(&self, session: &SessionInfo) -> Result<(), StorageError>;

    /// Load one session's metadata. `None` if unknown.
    fn load_session(&self, id: SessionId) -> Result<Option<SessionInfo>, StorageError>;

    /// All stored sessions, ordered by id.
    fn list_sessions(&self) -> Result<Vec<SessionInfo>, StorageError>;

    /// Append an event to a session's log at the given index
    ///
    /// # Invariants
    ///
    /// - Pre: `index` must equal the current length of the session's log
    /// - Post: Event is persisted at `index`
    fn append_event(&self, session: SessionId, index: u64, event: &Event) -> Result<(), StorageError>;

    /// Latest event index for a session. `None` if the log is empty.
    fn latest_event_index(&self, session: SessionId) -> Result<Option<u64>, StorageError>;

    /// Load events from a session's log
    ///
    /// Returns events in range `[from, from+limit)`. If fewer than `limit`
    /// events exist, returns all available events.
    fn load_events(&self, session: SessionId, from: u64, limit: usize) -> Result<Vec<Event>, StorageError>;

    /// Delete a session's event log. Metadata is kept.
    ///
    /// Idempotent: purging an empty or unknown log is a no-op.
    fn purge_events(&self, session: SessionId) -> Result<(), StorageError>;
}
