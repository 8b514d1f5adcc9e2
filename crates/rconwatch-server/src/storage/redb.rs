//! Redb-backed durable storage implementation.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety.
//! Sessions and logs survive process restarts; active sessions are resumed
//! from here on startup.

use std::{path::Path, sync::Arc};

use rconwatch_core::{Event, SessionId, SessionInfo};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Serialize, de::DeserializeOwned};

use super::{Storage, StorageError};

/// Table: sessions
/// Key: session id
/// Value: CBOR-encoded `SessionInfo`
const SESSIONS: TableDefinition<u64, &[u8]> = TableDefinition::new("sessions");

/// Table: events
/// Key: (session id: u64, index: u64) as big-endian bytes [16 bytes]
/// Value: CBOR-encoded `Event`
const EVENTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("events");

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates tables if they don't exist (SESSIONS, EVENTS).
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(io)?;

        let txn = db.begin_write().map_err(io)?;
        {
            let _ = txn.open_table(SESSIONS).map_err(io)?;
            let _ = txn.open_table(EVENTS).map_err(io)?;
        }
        txn.commit().map_err(io)?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Latest index in a session's log, from any readable view of EVENTS.
    fn latest_in<T: ReadableTable<&'static [u8], &'static [u8]>>(
        table: &T,
        session: SessionId,
    ) -> Result<Option<u64>, StorageError> {
        let start = encode_event_key(session, 0);
        let end = encode_event_key(session, u64::MAX);

        let mut range = table.range(start.as_slice()..=end.as_slice()).map_err(io)?;
        match range.next_back() {
            Some(entry) => {
                let (key, _) = entry.map_err(io)?;
                Ok(Some(decode_event_key(key.value())?.1))
            },
            None => Ok(None),
        }
    }
}

impl Storage for RedbStorage {
    fn put_session(&self, session: &SessionInfo) -> Result<(), StorageError> {
        let bytes = encode(session)?;
        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = txn.open_table(SESSIONS).map_err(io)?;
            table.insert(session.id, bytes.as_slice()).map_err(io)?;
        }
        txn.commit().map_err(io)?;
        Ok(())
    }

    fn load_session(&self, id: SessionId) -> Result<Option<SessionInfo>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(SESSIONS).map_err(io)?;

        match table.get(id).map_err(io)? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    fn list_sessions(&self) -> Result<Vec<SessionInfo>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(SESSIONS).map_err(io)?;

        let mut sessions = Vec::new();
        for entry in table.iter().map_err(io)? {
            let (_, value) = entry.map_err(io)?;
            sessions.push(decode(value.value())?);
        }
        Ok(sessions)
    }

    fn append_event(&self, session: SessionId, index: u64, event: &Event) -> Result<(), StorageError> {
        let bytes = encode(event)?;
        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = txn.open_table(EVENTS).map_err(io)?;

            let expected = Self::latest_in(&table, session)?.map_or(0, |latest| latest + 1);
            if index != expected {
                return Err(StorageError::Conflict { expected, got: index });
            }

            let key = encode_event_key(session, index);
            table.insert(key.as_slice(), bytes.as_slice()).map_err(io)?;
        }
        txn.commit().map_err(io)?;
        Ok(())
    }

    fn latest_event_index(&self, session: SessionId) -> Result<Option<u64>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(EVENTS).map_err(io)?;
        Self::latest_in(&table, session)
    }

    fn load_events(&self, session: SessionId, from: u64, limit: usize) -> Result<Vec<Event>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(EVENTS).map_err(io)?;

        let start = encode_event_key(session, from);
        let end = encode_event_key(session, u64::MAX);

        let mut events = Vec::with_capacity(limit.min(1024));
        for entry in table.range(start.as_slice()..=end.as_slice()).map_err(io)? {
            if events.len() >= limit {
                break;
            }
            let (_, value) = entry.map_err(io)?;
            events.push(decode(value.value())?);
        }
        Ok(events)
    }

    fn purge_events(&self, session: SessionId) -> Result<(), StorageError> {
        let start = encode_event_key(session, 0);
        let end = encode_event_key(session, u64::MAX);

        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = txn.open_table(EVENTS).map_err(io)?;
            let mut keys = Vec::new();
            for entry in table.range(start.as_slice()..=end.as_slice()).map_err(io)? {
                let (key, _) = entry.map_err(io)?;
                keys.push(key.value().to_vec());
            }
            for key in keys {
                table.remove(key.as_slice()).map_err(io)?;
            }
        }
        txn.commit().map_err(io)?;
        Ok(())
    }
}

fn io(err: impl std::fmt::Display) -> StorageError {
    StorageError::Io(err.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes).map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(bytes)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    ciborium::from_reader(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Encode (session, index) as a 16-byte big-endian key.
///
/// Layout: [session: 8 bytes BE][index: 8 bytes BE]
/// This ensures lexicographic ordering matches numeric ordering.
fn encode_event_key(session: SessionId, index: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&session.to_be_bytes());
    key[8..].copy_from_slice(&index.to_be_bytes());
    key
}

/// Decode an event key back to (session, index).
fn decode_event_key(key: &[u8]) -> Result<(SessionId, u64), StorageError> {
    let (session, index) = key.split_at_checked(8).ok_or_else(|| bad_key(key))?;
    let session: [u8; 8] = session.try_into().map_err(|_| bad_key(key))?;
    let index: [u8; 8] = index.try_into().map_err(|_| bad_key(key))?;
    Ok((u64::from_be_bytes(session), u64::from_be_bytes(index)))
}

fn bad_key(key: &[u8]) -> StorageError {
    StorageError::Serialization(format!("event key has {} bytes, expected 16", key.len()))
}
