//! Crash recovery tests for `RedbStorage` behind the session manager.
//!
//! These tests verify that sessions and their logs persist across database
//! close/reopen cycles, simulating process restarts.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rconwatch_core::{
    Event, EventKind, SessionAction, SessionConfig, SessionOrigin, SessionRequest, SessionState, SessionWindow,
};
use rconwatch_server::{RedbStorage, SessionManager, Storage, StorageError};
use tempfile::tempdir;

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + TimeDelta::seconds(1_704_067_200 + secs)
}

fn request(server: &str, start: DateTime<Utc>) -> SessionRequest {
    SessionRequest {
        server: server.to_owned(),
        name: None,
        origin: SessionOrigin::Manual,
        window: SessionWindow::open(start),
        modifiers: vec![],
    }
}

fn event(secs: i64, seq: u64) -> Event {
    Event { timestamp: at(secs), seq, kind: EventKind::MatchStart { map: format!("map-{seq}") } }
}

fn config() -> SessionConfig {
    SessionConfig { retention: Duration::from_secs(3600), ..SessionConfig::default() }
}

#[test]
fn active_session_resumes_after_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sessions.redb");

    let id = {
        let storage = RedbStorage::open(&path).unwrap();
        let mut manager = SessionManager::open(storage, config()).unwrap();
        let (id, _) = manager.create(request("eu-1", at(0)), at(0)).unwrap();
        let events: Vec<Event> = (0..5).map(|i| event(i, i as u64)).collect();
        assert_eq!(manager.append_events(id, &events).unwrap(), 5);
        id
        // Database dropped without stopping the session
    };

    let storage = RedbStorage::open(&path).unwrap();
    let mut manager = SessionManager::open(storage, config()).unwrap();

    let info = manager.get(id).unwrap();
    assert_eq!(info.state, SessionState::Active);
    assert!(matches!(
        manager.resume().as_slice(),
        [SessionAction::Activate { id: resumed, server }] if *resumed == id && server == "eu-1"
    ));

    // Appends continue after the last stored index.
    assert_eq!(manager.append_events(id, &[event(10, 5)]).unwrap(), 1);
    let log = manager.full_log(id).unwrap();
    assert_eq!(log.len(), 6);
    assert_eq!(log[5].seq, 5);
}

#[test]
fn completed_session_log_survives_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sessions.redb");

    let id = {
        let storage = RedbStorage::open(&path).unwrap();
        let mut manager = SessionManager::open(storage, config()).unwrap();
        let (id, _) = manager.create(request("eu-1", at(0)), at(0)).unwrap();
        manager.append_events(id, &[event(1, 0), event(2, 1)]).unwrap();
        manager.stop(id, at(60)).unwrap();
        id
    };

    let storage = RedbStorage::open(&path).unwrap();
    let mut manager = SessionManager::open(storage, config()).unwrap();

    assert_eq!(manager.get(id).unwrap().state, SessionState::Completed);
    assert!(manager.resume().is_empty());
    assert_eq!(manager.full_log(id).unwrap().len(), 2);

    // Nothing more is written once completed.
    assert_eq!(manager.append_events(id, &[event(3, 2)]).unwrap(), 0);
}

#[test]
fn retention_purges_after_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sessions.redb");

    let id = {
        let storage = RedbStorage::open(&path).unwrap();
        let mut manager = SessionManager::open(storage, config()).unwrap();
        let (id, _) = manager.create(request("eu-1", at(0)), at(0)).unwrap();
        manager.append_events(id, &[event(1, 0)]).unwrap();
        manager.stop(id, at(10)).unwrap();
        id
    };

    {
        let storage = RedbStorage::open(&path).unwrap();
        let mut manager = SessionManager::open(storage, config()).unwrap();
        manager.tick(at(10 + 3600));
        assert_eq!(manager.get(id).unwrap().state, SessionState::Expired);
        assert!(matches!(manager.event_log(id, 0, 10), Err(StorageError::NotFound(_))));
    }

    let storage = RedbStorage::open(&path).unwrap();
    let manager = SessionManager::open(storage, config()).unwrap();
    assert_eq!(manager.get(id).unwrap().state, SessionState::Expired);
    assert_eq!(manager.storage().latest_event_index(id).unwrap(), None);
}
