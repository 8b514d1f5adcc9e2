//! rconwatch production runtime.
//!
//! Drives [`rconwatch_core`]'s state machines against real game servers over
//! Tokio TCP, with wall-clock time and OS randomness.
//!
//! # Architecture
//!
//! Every component in the core crate is Sans-IO and returns actions; this
//! crate executes them. One supervisor task owns the cross-server state and
//! spawns two kinds of worker:
//!
//! - a capture task per Active session: poll, derive, enforce, persist
//! - a population poller per enabled AutoSession controller
//!
//! Each worker owns its own console connection, so a slow or broken server
//! never stalls another.
//!
//! # Components
//!
//! - [`Server`]: production wiring (TCP consoles, system clock)
//! - [`Supervisor`] / [`Handle`]: runtime owner and its command front
//! - [`Capture`]: the per-session capture loop
//! - [`RconClient`]: reconnecting console client with typed queries
//! - [`TcpConsole`]: XOR-obfuscated TCP transport
//! - [`SessionManager`]: session registry backed by [`Storage`]
//! - [`SystemEnv`]: production environment

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod capture;
mod client;
pub mod config;
mod error;
mod manager;
pub mod storage;
mod supervisor;
mod system_env;
mod transport;

pub use capture::{Capture, CaptureStats, TickOutcome};
pub use client::RconClient;
pub use config::{PollerConfig, RuntimeConfig, ServerEntry, load_servers, parse_servers};
pub use error::ServerError;
pub use manager::{MAX_PAGE, SessionManager, SharedManager};
pub use storage::{ChaoticStorage, MemoryStorage, RedbStorage, Storage, StorageError};
pub use supervisor::{ConsoleFactory, Handle, Listing, StartRequest, Supervisor, TcpConsoleFactory};
pub use system_env::SystemEnv;
pub use transport::TcpConsole;

/// Production server: TCP consoles, system clock, the given storage.
pub struct Server<S: Storage> {
    supervisor: Supervisor<TcpConsoleFactory, SystemEnv, S>,
    handle: Handle<S>,
}

impl<S: Storage> Server<S> {
    /// Load session state from `storage` and prepare the supervisor.
    ///
    /// # Errors
    ///
    /// `Storage` if persisted sessions cannot be read.
    pub fn new(servers: Vec<ServerEntry>, storage: S, config: RuntimeConfig) -> Result<Self, ServerError> {
        let manager = SessionManager::open(storage, config.session.clone())?.shared();
        let factory = TcpConsoleFactory::new(config.poller.read_idle);
        let (supervisor, handle) = Supervisor::new(servers, factory, SystemEnv::new(), config, manager);
        Ok(Self { supervisor, handle })
    }

    /// Command handle; valid until the server shuts down.
    pub fn handle(&self) -> Handle<S> {
        self.handle.clone()
    }

    /// Serve until [`Handle::shutdown`] is called.
    pub async fn run(self) {
        self.supervisor.run().await;
    }
}
