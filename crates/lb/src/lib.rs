use std::sync::atomic::{AtomicU32, Ordering};

use ferry_config::ServerConfig;

mod error;
mod least_connections;
mod round_robin;

pub use error::{LbError, LbResult};
pub use least_connections::LeastConnections;
pub use round_robin::RoundRobin;

/// Per-backend record owned by a strategy. `inflight` is only
/// meaningful to least-connections; round-robin leaves it at zero.
pub struct BackendState {
    server: ServerConfig,
    inflight: AtomicU32,
}

impl BackendState {
    pub fn new(server: ServerConfig) -> Self {
        Self {
            server,
            inflight: AtomicU32::new(0),
        }
    }

    pub fn server(&self) -> &ServerConfig {
        &self.server
    }

    pub fn inflight(&self) -> u32 {
        self.inflight.load(Ordering::Acquire)
    }

    // claims one more session only if the counter still holds `observed`
    fn try_acquire(&self, observed: u32) -> bool {
        self.inflight
            .compare_exchange(observed, observed + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    // saturates at zero, a late signal never drives the counter negative
    fn release(&self) {
        let _ = self
            .inflight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    fn reset(&self) {
        self.inflight.store(0, Ordering::Release);
    }
}

/// Backends in attachment order, unique by address and port.
#[derive(Default)]
pub struct BackendPool {
    backends: Vec<BackendState>,
}

impl BackendPool {
    pub fn new(servers: Vec<ServerConfig>) -> Self {
        let mut pool = Self::default();
        for server in servers {
            pool.attach(server);
        }
        pool
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn position(&self, server: &ServerConfig) -> Option<usize> {
        self.backends.iter().position(|b| b.server() == server)
    }

    pub fn find(&self, server: &ServerConfig) -> Option<&BackendState> {
        self.backends.iter().find(|b| b.server() == server)
    }

    pub fn backend(&self, index: usize) -> Option<&BackendState> {
        self.backends.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BackendState> {
        self.backends.iter()
    }

    /// Returns false when an equal backend is already attached.
    pub fn attach(&mut self, server: ServerConfig) -> bool {
        if self.position(&server).is_some() {
            return false;
        }
        self.backends.push(BackendState::new(server));
        true
    }

    /// Removes the first equal backend and returns the index it had.
    pub fn detach(&mut self, server: &ServerConfig) -> Option<usize> {
        let index = self.position(server)?;
        self.backends.remove(index);
        Some(index)
    }

    pub fn servers(&self) -> Vec<ServerConfig> {
        self.backends.iter().map(|b| b.server().clone()).collect()
    }

    fn reset_counters(&self) {
        for backend in &self.backends {
            backend.reset();
        }
    }
}

/// Selection strategy, built once from the configured name.
///
/// Mutating calls (`attach`, `detach`, `reset`) take `&mut self` and are
/// expected to run under an exclusive lock; `next`, `servers` and
/// `signal` only need shared access because cursors and counters are
/// atomics.
pub enum LoadBalancing {
    RoundRobin(RoundRobin),
    LeastConnections(LeastConnections),
}

impl LoadBalancing {
    pub fn from_config(value: &str) -> LbResult<Self> {
        let mode = value.trim().to_lowercase();
        match mode.as_str() {
            "roundrobin" => Ok(Self::RoundRobin(RoundRobin::new())),
            "leastconnections" => Ok(Self::LeastConnections(LeastConnections::new())),
            _ => Err(LbError::UnknownStrategy(value.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LoadBalancing::RoundRobin(_) => "roundrobin",
            LoadBalancing::LeastConnections(_) => "leastconnections",
        }
    }

    pub fn next(&self) -> LbResult<ServerConfig> {
        match self {
            LoadBalancing::RoundRobin(rr) => rr.next(),
            LoadBalancing::LeastConnections(lc) => lc.next(),
        }
    }

    pub fn attach(&mut self, server: ServerConfig) -> bool {
        match self {
            LoadBalancing::RoundRobin(rr) => rr.attach(server),
            LoadBalancing::LeastConnections(lc) => lc.attach(server),
        }
    }

    pub fn detach(&mut self, server: &ServerConfig) -> bool {
        match self {
            LoadBalancing::RoundRobin(rr) => rr.detach(server),
            LoadBalancing::LeastConnections(lc) => lc.detach(server),
        }
    }

    pub fn servers(&self) -> Vec<ServerConfig> {
        match self {
            LoadBalancing::RoundRobin(rr) => rr.servers(),
            LoadBalancing::LeastConnections(lc) => lc.servers(),
        }
    }

    pub fn signal(&self, server: &ServerConfig) {
        match self {
            LoadBalancing::RoundRobin(rr) => rr.signal(server),
            LoadBalancing::LeastConnections(lc) => lc.signal(server),
        }
    }

    pub fn reset(&mut self) {
        match self {
            LoadBalancing::RoundRobin(rr) => rr.reset(),
            LoadBalancing::LeastConnections(lc) => lc.reset(),
        }
    }

    /// In-flight count for least-connections, `None` otherwise or when
    /// the backend is not attached.
    pub fn active_connections(&self, server: &ServerConfig) -> Option<u32> {
        match self {
            LoadBalancing::RoundRobin(_) => None,
            LoadBalancing::LeastConnections(lc) => lc.active_connections(server),
        }
    }
}
