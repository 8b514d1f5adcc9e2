//! Supervisor: capture tasks, AutoSession controllers and the command front.
//!
//! A single task owns every mutable piece of runtime state that spans
//! servers: which capture task runs for which session, and one
//! [`AutoSession`] machine per server. Everything reaches it through a
//! channel:
//!
//! - requests from [`Handle`]s (start, stop, list, enable/disable auto)
//! - population reports from AutoSession poll tasks
//! - its own lifecycle timer, which advances the session registry
//!
//! Capture tasks and AutoSession poll tasks own their sockets; the
//! supervisor only spawns them and signals shutdown through `watch`
//! channels.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use rconwatch_core::{
    AutoAction, AutoSession, AutoStatus, CompletionReason, DerivationEngine, Environment, Event, ModifierEngine,
    ModifierKind, RconError, RemoteConsole, SessionAction, SessionId, SessionInfo, SessionOrigin, SessionRequest,
    SessionState, SessionWindow,
};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};

use crate::{
    capture::{Capture, CaptureStats},
    client::RconClient,
    config::{RuntimeConfig, ServerEntry},
    error::ServerError,
    manager::SharedManager,
    storage::Storage,
    transport::TcpConsole,
};

/// Pending requests before senders wait.
const REQUEST_QUEUE: usize = 64;

/// Creates one console per connection.
pub trait ConsoleFactory: Send + Sync + 'static {
    /// Console type produced.
    type Console: RemoteConsole + 'static;

    /// A new, disconnected console for `server`.
    fn console(&self, server: &ServerEntry) -> Self::Console;
}

/// Factory for production TCP consoles.
#[derive(Debug, Clone)]
pub struct TcpConsoleFactory {
    read_idle: Duration,
}

impl TcpConsoleFactory {
    /// Factory whose consoles end multipart responses after `read_idle`.
    pub fn new(read_idle: Duration) -> Self {
        Self { read_idle }
    }
}

impl ConsoleFactory for TcpConsoleFactory {
    type Console = TcpConsole;

    fn console(&self, server: &ServerEntry) -> TcpConsole {
        TcpConsole::new(server, self.read_idle)
    }
}

/// Parameters of a manual start.
#[derive(Debug, Clone, Default)]
pub struct StartRequest {
    /// Server to record
    pub server: String,
    /// Display name; generated when absent
    pub name: Option<String>,
    /// Window; open and starting now when absent
    pub window: Option<SessionWindow>,
    /// Modifiers; the server's configured set when absent
    pub modifiers: Option<Vec<ModifierKind>>,
}

impl StartRequest {
    /// Open-ended session starting now with the server's modifiers.
    pub fn now(server: impl Into<String>) -> Self {
        Self { server: server.into(), ..Self::default() }
    }
}

/// Answer to [`Handle::list`].
#[derive(Debug, Clone)]
pub struct Listing {
    /// Every known session, ordered by id
    pub sessions: Vec<SessionInfo>,
    /// AutoSession controllers, ordered by server
    pub auto: Vec<AutoStatus>,
}

enum Request {
    Start { request: StartRequest, reply: oneshot::Sender<Result<SessionId, ServerError>> },
    Stop { id: SessionId, reply: oneshot::Sender<Result<(), ServerError>> },
    List { reply: oneshot::Sender<Listing> },
    EnableAuto { server: String, reply: oneshot::Sender<Result<(), ServerError>> },
    DisableAuto { server: String, reply: oneshot::Sender<Result<(), ServerError>> },
    Shutdown { reply: oneshot::Sender<()> },
}

/// Command front end. Cheap to clone.
pub struct Handle<S: Storage> {
    requests: mpsc::Sender<Request>,
    manager: SharedManager<S>,
}

impl<S: Storage> Clone for Handle<S> {
    fn clone(&self) -> Self {
        Self { requests: self.requests.clone(), manager: Arc::clone(&self.manager) }
    }
}

impl<S: Storage> Handle<S> {
    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T, ServerError> {
        let (reply, response) = oneshot::channel();
        self.requests.send(make(reply)).await.map_err(|_| ServerError::Shutdown)?;
        response.await.map_err(|_| ServerError::Shutdown)
    }

    /// Start a manual session.
    ///
    /// # Errors
    ///
    /// `UnknownServer`, or `Session` with `Conflict`/`InvalidWindow`.
    pub async fn start(&self, request: StartRequest) -> Result<SessionId, ServerError> {
        self.call(|reply| Request::Start { request, reply }).await?
    }

    /// Stop a session. Stopping a finished session succeeds.
    pub async fn stop(&self, id: SessionId) -> Result<(), ServerError> {
        self.call(|reply| Request::Stop { id, reply }).await?
    }

    /// Sessions and AutoSession controllers.
    pub async fn list(&self) -> Result<Listing, ServerError> {
        self.call(|reply| Request::List { reply }).await
    }

    /// Turn on the AutoSession controller for a server.
    pub async fn enable_auto(&self, server: impl Into<String>) -> Result<(), ServerError> {
        let server = server.into();
        self.call(|reply| Request::EnableAuto { server, reply }).await?
    }

    /// Turn off the AutoSession controller for a server, stopping its
    /// session if one is running.
    pub async fn disable_auto(&self, server: impl Into<String>) -> Result<(), ServerError> {
        let server = server.into();
        self.call(|reply| Request::DisableAuto { server, reply }).await?
    }

    /// Stop every task and wait for them to finish.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        self.call(|reply| Request::Shutdown { reply }).await
    }

    /// Session metadata.
    pub async fn session(&self, id: SessionId) -> Option<SessionInfo> {
        self.manager.lock().await.get(id).cloned()
    }

    /// Sessions of one server.
    pub async fn sessions_for(&self, server: &str) -> Vec<SessionInfo> {
        self.manager.lock().await.by_server(server)
    }

    /// Sessions in one lifecycle state.
    pub async fn sessions_in(&self, state: SessionState) -> Vec<SessionInfo> {
        self.manager.lock().await.by_state(state)
    }

    /// A page of a session's event log.
    pub async fn event_log(&self, id: SessionId, from: u64, limit: usize) -> Result<Vec<Event>, ServerError> {
        Ok(self.manager.lock().await.event_log(id, from, limit)?)
    }

    /// A session's whole event log.
    pub async fn full_log(&self, id: SessionId) -> Result<Vec<Event>, ServerError> {
        Ok(self.manager.lock().await.full_log(id)?)
    }
}

struct CaptureTask {
    server: String,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<CaptureStats>,
}

struct PollTask {
    shutdown: watch::Sender<bool>,
    interval: watch::Sender<Duration>,
    task: JoinHandle<()>,
}

struct AutoController {
    machine: AutoSession,
    poller: Option<PollTask>,
}

struct PopulationReport {
    server: String,
    result: Result<u32, RconError>,
}

/// Runtime owner of captures and AutoSession controllers.
pub struct Supervisor<F: ConsoleFactory, E: Environment, S: Storage> {
    servers: BTreeMap<String, ServerEntry>,
    factory: Arc<F>,
    env: E,
    config: RuntimeConfig,
    manager: SharedManager<S>,
    captures: HashMap<SessionId, CaptureTask>,
    autos: BTreeMap<String, AutoController>,
    requests: mpsc::Receiver<Request>,
    reports: mpsc::Receiver<PopulationReport>,
    report_tx: mpsc::Sender<PopulationReport>,
}

impl<F: ConsoleFactory, E: Environment, S: Storage> Supervisor<F, E, S> {
    /// Supervisor plus the handle that drives it.
    pub fn new(
        servers: Vec<ServerEntry>,
        factory: F,
        env: E,
        config: RuntimeConfig,
        manager: SharedManager<S>,
    ) -> (Self, Handle<S>) {
        let (request_tx, requests) = mpsc::channel(REQUEST_QUEUE);
        let (report_tx, reports) = mpsc::channel(REQUEST_QUEUE);
        let handle = Handle { requests: request_tx, manager: Arc::clone(&manager) };
        let supervisor = Self {
            servers: servers.into_iter().map(|s| (s.name.clone(), s)).collect(),
            factory: Arc::new(factory),
            env,
            config,
            manager,
            captures: HashMap::new(),
            autos: BTreeMap::new(),
            requests,
            reports,
            report_tx,
        };
        (supervisor, handle)
    }

    /// Resume captures left Active by a previous run, start configured
    /// AutoSession controllers, then serve until shutdown.
    pub async fn run(mut self) {
        let resumed = self.manager.lock().await.resume();
        if !resumed.is_empty() {
            tracing::info!(sessions = resumed.len(), "resuming active sessions");
        }
        self.execute(resumed).await;

        let auto: Vec<String> = self.servers.values().filter(|s| s.auto_session).map(|s| s.name.clone()).collect();
        for server in auto {
            if let Err(e) = self.enable_auto(&server) {
                tracing::warn!(server = %server, error = %e, "cannot enable auto session");
            }
        }

        let tick = self.manager.lock().await.config().tick_interval;
        loop {
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(Request::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        return;
                    },
                    Some(request) => self.serve(request).await,
                    None => break,
                },
                Some(report) = self.reports.recv() => self.on_population(report).await,
                () = self.env.sleep(tick) => {
                    let now = self.env.now();
                    let actions = self.manager.lock().await.tick(now);
                    self.execute(actions).await;
                },
            }
        }
        self.shutdown().await;
    }

    async fn serve(&mut self, request: Request) {
        match request {
            Request::Start { request, reply } => {
                let _ = reply.send(self.start(request).await);
            },
            Request::Stop { id, reply } => {
                let now = self.env.now();
                let result = self.manager.lock().await.stop(id, now);
                let result = match result {
                    Ok(actions) => {
                        self.execute(actions).await;
                        Ok(())
                    },
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            },
            Request::List { reply } => {
                let sessions = self.manager.lock().await.list();
                let auto = self.autos.values().map(|a| a.machine.status()).collect();
                let _ = reply.send(Listing { sessions, auto });
            },
            Request::EnableAuto { server, reply } => {
                let _ = reply.send(self.enable_auto(&server));
            },
            Request::DisableAuto { server, reply } => {
                let _ = reply.send(self.disable_auto(&server).await);
            },
            Request::Shutdown { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
            },
        }
    }

    async fn start(&mut self, request: StartRequest) -> Result<SessionId, ServerError> {
        let entry = self.servers.get(&request.server).ok_or_else(|| ServerError::UnknownServer(request.server.clone()))?;
        let now = self.env.now();
        let session = SessionRequest {
            server: request.server.clone(),
            name: request.name,
            origin: SessionOrigin::Manual,
            window: request.window.unwrap_or_else(|| SessionWindow::open(now)),
            modifiers: request.modifiers.unwrap_or_else(|| entry.modifiers.clone()),
        };

        let created = self.manager.lock().await.create(session, now);
        let (id, actions) = created?;
        tracing::info!(server = %request.server, session_id = id, "manual session created");
        self.execute(actions).await;
        Ok(id)
    }

    /// Run capture actions returned by the manager.
    async fn execute(&mut self, actions: Vec<SessionAction>) {
        for action in actions {
            match action {
                SessionAction::Activate { id, server } => self.spawn_capture(id, &server).await,
                SessionAction::Complete { id, server, origin, reason } => {
                    self.stop_capture(id);
                    if origin == SessionOrigin::Auto {
                        if let Some(auto) = self.autos.get_mut(&server) {
                            auto.machine.on_session_completed(id);
                            if reason == CompletionReason::Superseded {
                                auto.machine.notify_superseded();
                            }
                        }
                    }
                },
                SessionAction::Persist(_) | SessionAction::Purge { .. } => {},
            }
        }
    }

    async fn spawn_capture(&mut self, id: SessionId, server: &str) {
        if self.captures.contains_key(&id) {
            return;
        }
        let Some(entry) = self.servers.get(server) else {
            tracing::error!(server, session_id = id, "session for unconfigured server, stopping it");
            let now = self.env.now();
            let stopped = self.manager.lock().await.stop(id, now);
            if let Err(e) = stopped {
                tracing::error!(session_id = id, error = %e, "cannot stop orphaned session");
            }
            return;
        };

        let kinds = self.manager.lock().await.get(id).map(|s| s.modifiers.clone()).unwrap_or_default();
        let client = RconClient::new(self.factory.console(entry), self.config.connection.clone(), self.env.clone());
        let capture = Capture::new(
            id,
            server,
            client,
            DerivationEngine::new(self.config.derivation.clone()),
            ModifierEngine::new(&kinds, self.config.modifiers.clone()),
            Arc::clone(&self.manager),
            self.env.clone(),
            self.config.poller.clone(),
        );

        let (shutdown, signal) = watch::channel(false);
        let task = tokio::spawn(capture.run(signal));
        self.captures.insert(id, CaptureTask { server: server.to_owned(), shutdown, task });
    }

    /// Signal a capture to stop at its next tick boundary.
    fn stop_capture(&mut self, id: SessionId) {
        let Some(capture) = self.captures.remove(&id) else {
            return;
        };
        let _ = capture.shutdown.send(true);
        let server = capture.server;
        tokio::spawn(async move {
            match capture.task.await {
                Ok(stats) => tracing::debug!(server = %server, session_id = id, ?stats, "capture task finished"),
                Err(e) => tracing::error!(server = %server, session_id = id, error = %e, "capture task failed"),
            }
        });
    }

    fn enable_auto(&mut self, server: &str) -> Result<(), ServerError> {
        let entry = self.servers.get(server).ok_or_else(|| ServerError::UnknownServer(server.to_owned()))?.clone();

        let controller = self.autos.entry(server.to_owned()).or_insert_with(|| AutoController {
            machine: AutoSession::new(server, self.config.auto_session.clone()),
            poller: None,
        });
        controller.machine.enable();
        if controller.poller.is_none() {
            controller.poller = Some(spawn_poller(
                &entry,
                self.factory.as_ref(),
                &self.env,
                &self.config,
                controller.machine.poll_interval(),
                self.report_tx.clone(),
            ));
            tracing::info!(server, "auto session enabled");
        }
        Ok(())
    }

    async fn disable_auto(&mut self, server: &str) -> Result<(), ServerError> {
        let controller = self.autos.get_mut(server).ok_or_else(|| ServerError::UnknownServer(server.to_owned()))?;
        let actions = controller.machine.disable();
        if let Some(poller) = controller.poller.take() {
            let _ = poller.shutdown.send(true);
        }
        tracing::info!(server, "auto session disabled");
        self.execute_auto(server, actions).await;
        Ok(())
    }

    async fn on_population(&mut self, report: PopulationReport) {
        let now = self.env.now();
        let Some(controller) = self.autos.get_mut(&report.server) else {
            return;
        };
        let actions = match report.result {
            Ok(population) => {
                tracing::debug!(server = %report.server, population, "population observed");
                controller.machine.observe(population, now)
            },
            Err(e) => {
                tracing::warn!(server = %report.server, error = %e, "population check failed");
                controller.machine.on_failure(&e);
                Vec::new()
            },
        };
        if let Some(poller) = &controller.poller {
            let _ = poller.interval.send(controller.machine.poll_interval());
        }
        self.execute_auto(&report.server, actions).await;
    }

    async fn execute_auto(&mut self, server: &str, actions: Vec<AutoAction>) {
        for action in actions {
            let now = self.env.now();
            match action {
                AutoAction::StartSession { server: target } => {
                    let modifiers = self.servers.get(&target).map(|s| s.modifiers.clone()).unwrap_or_default();
                    let max = self.config.auto_session.max_duration;
                    let request = SessionRequest {
                        server: target.clone(),
                        name: None,
                        origin: SessionOrigin::Auto,
                        window: SessionWindow::starting_for(now, max),
                        modifiers,
                    };
                    let created = self.manager.lock().await.create(request, now);
                    match created {
                        Ok((id, session_actions)) => {
                            if let Some(controller) = self.autos.get_mut(server) {
                                controller.machine.on_session_started(id, now);
                            }
                            tracing::info!(server = %target, session_id = id, "automatic session started");
                            self.execute(session_actions).await;
                        },
                        Err(e) => {
                            tracing::info!(server = %target, error = %e, "automatic session not started");
                            if let Some(controller) = self.autos.get_mut(server) {
                                controller.machine.on_start_rejected();
                            }
                        },
                    }
                },
                AutoAction::StopSession { session } => {
                    let stopped = self.manager.lock().await.stop(session, now);
                    match stopped {
                        Ok(session_actions) => self.execute(session_actions).await,
                        Err(e) => tracing::warn!(server, session_id = session, error = %e, "cannot stop automatic session"),
                    }
                },
            }
        }
    }

    async fn shutdown(&mut self) {
        tracing::info!(captures = self.captures.len(), autos = self.autos.len(), "supervisor shutting down");
        let mut tasks = Vec::new();
        for (id, capture) in self.captures.drain() {
            let _ = capture.shutdown.send(true);
            tasks.push((id, capture.task));
        }
        let mut pollers = Vec::new();
        for controller in self.autos.values_mut() {
            if let Some(poller) = controller.poller.take() {
                let _ = poller.shutdown.send(true);
                pollers.push(poller.task);
            }
        }
        for (id, task) in tasks {
            if let Err(e) = task.await {
                tracing::error!(session_id = id, error = %e, "capture task failed");
            }
        }
        for task in pollers {
            let _ = task.await;
        }
    }
}

fn spawn_poller<F: ConsoleFactory, E: Environment>(
    entry: &ServerEntry,
    factory: &F,
    env: &E,
    config: &RuntimeConfig,
    interval: Duration,
    reports: mpsc::Sender<PopulationReport>,
) -> PollTask {
    let client = RconClient::new(factory.console(entry), config.connection.clone(), env.clone());
    let (shutdown, signal) = watch::channel(false);
    let (interval_tx, interval_rx) = watch::channel(interval);
    let task = tokio::spawn(poll_population(
        entry.name.clone(),
        client,
        config.auto_session.attempts_per_iteration,
        env.clone(),
        reports,
        interval_rx,
        signal,
    ));
    PollTask { shutdown, interval: interval_tx, task }
}

/// AutoSession poll task: one population report per iteration over its own
/// connection.
async fn poll_population<C: RemoteConsole, E: Environment>(
    server: String,
    mut client: RconClient<C, E>,
    attempts: u32,
    env: E,
    reports: mpsc::Sender<PopulationReport>,
    mut interval: watch::Receiver<Duration>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow_and_update() {
            break;
        }
        let result = query_population(&mut client, attempts).await;
        if reports.send(PopulationReport { server: server.clone(), result }).await.is_err() {
            break;
        }

        let wait = *interval.borrow_and_update();
        tokio::select! {
            () = env.sleep(wait) => {},
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            },
        }
    }
    client.close("auto session poller stopped").await;
}

/// Up to `attempts` tries; the last one on a fresh connection. Rejected
/// credentials end the iteration immediately.
pub(crate) async fn query_population<C: RemoteConsole, E: Environment>(
    client: &mut RconClient<C, E>,
    attempts: u32,
) -> Result<u32, RconError> {
    let attempts = attempts.max(1);
    let mut last = RconError::Unexpected("no population attempt made".into());
    for attempt in 1..=attempts {
        let ready = if attempt == attempts && attempts > 1 { client.reconnect().await } else { client.ensure_ready().await };
        let result = match ready {
            Ok(()) => client.slots().await.map(|slots| slots.online),
            Err(e) => Err(e),
        };
        match result {
            Ok(population) => return Ok(population),
            Err(e) if e.is_auth() => return Err(e),
            Err(e) => {
                tracing::debug!(attempt, error = %e, "population attempt failed");
                last = e;
            },
        }
    }
    Err(last)
}
