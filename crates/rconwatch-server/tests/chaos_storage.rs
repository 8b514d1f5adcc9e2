//! Chaos property tests for session logs.
//!
//! The session manager is driven over `ChaoticStorage`, which fails calls at
//! random. Whatever fails, a session's stored log must stay:
//! - contiguous (indices `0..len` with no holes)
//! - ordered (events appear in submission order)
//! - made only of submitted events (no partial or duplicated writes)

use chrono::{DateTime, TimeDelta, Utc};
use proptest::prelude::*;
use rconwatch_core::{
    Event, EventKind, SessionConfig, SessionId, SessionOrigin, SessionRequest, SessionState, SessionWindow,
};
use rconwatch_server::storage::{ChaoticStorage, MemoryStorage, RedbStorage, Storage, StorageError};
use rconwatch_server::SessionManager;
use tempfile::tempdir;

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + TimeDelta::seconds(1_704_067_200 + secs)
}

fn event(seq: u64) -> Event {
    Event { timestamp: at(seq as i64), seq, kind: EventKind::MatchStart { map: format!("map-{seq}") } }
}

/// Open a manager, retrying injected failures on the initial listing.
fn open<S: Storage>(storage: &S) -> SessionManager<S> {
    loop {
        match SessionManager::open(storage.clone(), SessionConfig::default()) {
            Ok(manager) => return manager,
            Err(StorageError::Io(_)) => continue,
            Err(e) => panic!("unexpected error opening manager: {e}"),
        }
    }
}

fn start<S: Storage>(manager: &mut SessionManager<S>) -> SessionId {
    let request = SessionRequest {
        server: "eu-1".into(),
        name: None,
        origin: SessionOrigin::Manual,
        window: SessionWindow::open(at(0)),
        modifiers: vec![],
    };
    manager.create(request, at(0)).unwrap().0
}

/// Submit `batches` and return every event handed to the manager.
fn submit<S: Storage>(manager: &mut SessionManager<S>, id: SessionId, batches: &[usize]) -> Vec<Event> {
    let mut submitted = Vec::new();
    let mut seq = 0;
    for &size in batches {
        let batch: Vec<Event> = (seq..seq + size as u64).map(event).collect();
        seq += size as u64;
        match manager.append_events(id, &batch) {
            Ok(stored) => assert_eq!(stored, batch.len()),
            Err(StorageError::Io(_)) => {},
            Err(e) => panic!("unexpected storage error: {e}"),
        }
        submitted.extend(batch);
    }
    submitted
}

/// Check the stored log against what was submitted.
fn verify_log(storage: &impl Storage, id: SessionId, submitted: &[Event]) {
    let stored = storage.load_events(id, 0, submitted.len() + 10).unwrap();
    let latest = storage.latest_event_index(id).unwrap();
    assert_eq!(latest.map_or(0, |l| l + 1), stored.len() as u64);

    let mut previous = None;
    for event in &stored {
        assert_eq!(&submitted[event.seq as usize], event);
        if let Some(previous) = previous {
            assert!(event.seq > previous, "log out of order");
        }
        previous = Some(event.seq);
    }
}

#[test]
fn prop_chaotic_appends_keep_log_contiguous() {
    proptest!(|(
        failure_rate in 0.0..0.7,
        seed in any::<u64>(),
        batches in prop::collection::vec(0usize..8, 1..30),
    )| {
        let chaotic = ChaoticStorage::with_seed(MemoryStorage::new(), failure_rate, seed);
        let mut manager = open(&chaotic);
        let id = start(&mut manager);

        let submitted = submit(&mut manager, id, &batches);
        verify_log(chaotic.inner(), id, &submitted);
    });
}

#[test]
fn prop_failed_metadata_writes_keep_session_running() {
    proptest!(|(seed in any::<u64>(), batches in prop::collection::vec(1usize..5, 1..10))| {
        let chaotic = ChaoticStorage::with_seed(MemoryStorage::new(), 0.5, seed);
        let mut manager = open(&chaotic);
        let id = start(&mut manager);

        // Whether or not the Persist landed, the registry holds the truth.
        prop_assert_eq!(manager.get(id).map(|s| s.state), Some(SessionState::Active));
        let submitted = submit(&mut manager, id, &batches);
        verify_log(chaotic.inner(), id, &submitted);
    });
}

#[test]
fn chaotic_redb_log_stays_contiguous() {
    let dir = tempdir().unwrap();
    let redb = RedbStorage::open(dir.path().join("chaos.redb")).unwrap();
    let chaotic = ChaoticStorage::with_seed(redb, 0.3, 42);
    let mut manager = open(&chaotic);
    let id = start(&mut manager);

    let submitted = submit(&mut manager, id, &[5, 5, 5, 5, 5, 5, 5, 5]);
    assert!(chaotic.injected_failures() > 0);
    verify_log(chaotic.inner(), id, &submitted);
}

#[test]
fn zero_failure_rate_stores_everything() {
    let chaotic = ChaoticStorage::with_seed(MemoryStorage::new(), 0.0, 7);
    let mut manager = open(&chaotic);
    let id = start(&mut manager);

    let submitted = submit(&mut manager, id, &[3, 0, 4]);
    assert_eq!(chaotic.inner().load_events(id, 0, 100).unwrap(), submitted);

    // Reopening over the same data resumes at the right index.
    let mut reopened = open(&chaotic);
    assert_eq!(reopened.append_events(id, &[event(7)]).unwrap(), 1);
    assert_eq!(chaotic.inner().latest_event_index(id).unwrap(), Some(7));

}
