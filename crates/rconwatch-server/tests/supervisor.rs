//! Supervisor scenarios on a paused Tokio clock.
//!
//! Capture tasks, population pollers and the lifecycle timer all run for
//! real; the paused runtime fast-forwards whenever every task is waiting, so
//! minutes of simulated play take milliseconds.

use std::{collections::HashMap, time::Duration};

use rconwatch_core::{AutoSessionConfig, AutoState, EventKind, SessionOrigin, SessionState};
use rconwatch_harness::{
    ScriptedConsole, SimEnv, SimServer,
    roster::{chat_line, crowd, steam_id},
};
use rconwatch_server::{
    ConsoleFactory, Handle, MemoryStorage, RuntimeConfig, ServerEntry, ServerError, SessionManager, StartRequest,
    Supervisor,
};
use tokio::task::JoinHandle;

struct SimFactory {
    servers: HashMap<String, SimServer>,
}

impl ConsoleFactory for SimFactory {
    type Console = ScriptedConsole;

    fn console(&self, server: &ServerEntry) -> ScriptedConsole {
        self.servers[&server.name].console()
    }
}

fn entry(name: &str, auto_session: bool) -> ServerEntry {
    ServerEntry {
        name: name.to_owned(),
        host: "127.0.0.1".to_owned(),
        port: 7779,
        password: "password".to_owned(),
        auto_session,
        modifiers: vec![],
    }
}

fn config() -> RuntimeConfig {
    RuntimeConfig {
        auto_session: AutoSessionConfig {
            start_threshold: 4,
            stop_threshold: 1,
            cooldown_observations: 1,
            interval: Duration::from_secs(10),
            ..AutoSessionConfig::default()
        },
        ..RuntimeConfig::default()
    }
}

fn boot(
    env: &SimEnv,
    sim: &SimServer,
    storage: MemoryStorage,
    auto_session: bool,
) -> (Handle<MemoryStorage>, JoinHandle<()>) {
    let config = config();
    let manager = SessionManager::open(storage, config.session.clone()).unwrap().shared();
    let factory = SimFactory { servers: HashMap::from([(sim.name(), sim.clone())]) };
    let (supervisor, handle) =
        Supervisor::new(vec![entry(&sim.name(), auto_session)], factory, env.clone(), config, manager);
    (handle, tokio::spawn(supervisor.run()))
}

async fn wait(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

#[tokio::test(start_paused = true)]
async fn manual_session_records_until_stopped() {
    let env = SimEnv::paced(3);
    let sim = SimServer::new("eu-1", env.clone());
    sim.join_all(crowd(1, 6));
    let (handle, task) = boot(&env, &sim, MemoryStorage::new(), false);

    let id = handle.start(StartRequest::now("eu-1")).await.unwrap();
    wait(3).await;
    let leaving = sim.leave(&steam_id(5)).unwrap();
    wait(3).await;

    handle.stop(id).await.unwrap();
    let info = handle.session(id).await.unwrap();
    assert_eq!(info.state, SessionState::Completed);
    assert_eq!(info.origin, SessionOrigin::Manual);

    let log = handle.full_log(id).await.unwrap();
    assert!(log.iter().any(|e| matches!(&e.kind, EventKind::Disconnect { player } if player.id == leaving.id)));
    assert!(log.windows(2).all(|w| w[0].order_key() <= w[1].order_key()));

    // Stopping again is a no-op.
    handle.stop(id).await.unwrap();

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn unknown_server_is_rejected() {
    let env = SimEnv::paced(3);
    let sim = SimServer::new("eu-1", env.clone());
    let (handle, task) = boot(&env, &sim, MemoryStorage::new(), false);

    let result = handle.start(StartRequest::now("us-9")).await;
    assert!(matches!(result, Err(ServerError::UnknownServer(name)) if name == "us-9"));
    assert!(matches!(handle.enable_auto("us-9").await, Err(ServerError::UnknownServer(_))));

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn auto_session_follows_population() {
    let env = SimEnv::paced(5);
    let sim = SimServer::new("eu-1", env.clone());
    let (handle, task) = boot(&env, &sim, MemoryStorage::new(), true);

    wait(12).await;
    assert!(handle.list().await.unwrap().sessions.is_empty());

    sim.join_all(crowd(1, 8));
    wait(12).await;
    let listing = handle.list().await.unwrap();
    assert_eq!(listing.sessions.len(), 1);
    let auto = &listing.sessions[0];
    assert_eq!(auto.origin, SessionOrigin::Auto);
    assert_eq!(auto.state, SessionState::Active);
    assert_eq!(listing.auto[0].state, AutoState::Active);
    assert_eq!(listing.auto[0].session, Some(auto.id));

    sim.clear();
    wait(25).await;
    let info = handle.session(auto.id).await.unwrap();
    assert_eq!(info.state, SessionState::Completed);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn manual_start_supersedes_auto_session() {
    let env = SimEnv::paced(5);
    let sim = SimServer::new("eu-1", env.clone());
    sim.join_all(crowd(1, 8));
    let (handle, task) = boot(&env, &sim, MemoryStorage::new(), true);

    wait(5).await;
    let auto = handle.list().await.unwrap().sessions[0].clone();
    assert_eq!(auto.origin, SessionOrigin::Auto);

    let manual = handle.start(StartRequest::now("eu-1")).await.unwrap();
    assert_eq!(handle.session(auto.id).await.unwrap().state, SessionState::Completed);
    assert_eq!(handle.session(manual).await.unwrap().state, SessionState::Active);

    // The controller let go and does not fight the manual session.
    wait(30).await;
    let listing = handle.list().await.unwrap();
    assert_eq!(listing.auto[0].session, None);
    assert_eq!(handle.sessions_in(SessionState::Active).await.len(), 1);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn disabling_auto_stops_its_session() {
    let env = SimEnv::paced(5);
    let sim = SimServer::new("eu-1", env.clone());
    sim.join_all(crowd(1, 8));
    let (handle, task) = boot(&env, &sim, MemoryStorage::new(), true);

    wait(5).await;
    let auto = handle.list().await.unwrap().sessions[0].clone();

    handle.disable_auto("eu-1").await.unwrap();
    assert_eq!(handle.session(auto.id).await.unwrap().state, SessionState::Completed);

    wait(30).await;
    let listing = handle.list().await.unwrap();
    assert!(!listing.auto[0].enabled);
    assert_eq!(listing.sessions.len(), 1);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn active_session_resumes_after_restart() {
    let env = SimEnv::paced(9);
    let sim = SimServer::new("eu-1", env.clone());
    sim.join_all(crowd(1, 4));
    let storage = MemoryStorage::new();

    let (handle, task) = boot(&env, &sim, storage.clone(), false);
    let id = handle.start(StartRequest::now("eu-1")).await.unwrap();
    wait(1).await;
    sim.log(chat_line(&sim.player(&steam_id(2)).unwrap(), "gg"));
    wait(3).await;
    // Simulate a crash: the task goes away without stopping the session.
    task.abort();
    let _ = task.await;
    let connects = sim.connects();

    let (handle, task) = boot(&env, &sim, storage, false);
    wait(3).await;
    assert!(sim.connects() > connects, "capture reconnected after restart");
    assert_eq!(handle.session(id).await.unwrap().state, SessionState::Active);

    // The admin-log window still holds the chat line; it is stored once and
    // the sequence carries on without repeats.
    let log = handle.full_log(id).await.unwrap();
    assert_eq!(log.iter().filter(|e| matches!(e.kind, EventKind::Chat { .. })).count(), 1);
    for (i, event) in log.iter().enumerate() {
        assert_eq!(event.seq, i as u64);
    }

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}
