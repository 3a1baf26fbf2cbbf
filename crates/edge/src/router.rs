use std::sync::{
    PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
    atomic::{AtomicUsize, Ordering},
};

use log::debug;

use ferry_config::ServerConfig;
use ferry_lb::{LbResult, LoadBalancing};

use crate::worker::SessionObserver;

/// Routing state shared by the balancer, its acceptor and every worker.
///
/// Lookups (`next_backend`, `servers`) hold the read side of the lock;
/// attach, detach, signal and reset hold the write side.
pub(crate) struct Router {
    strategy: RwLock<LoadBalancing>,
    next_worker: AtomicUsize,
}

impl Router {
    pub(crate) fn new(strategy: LoadBalancing) -> Self {
        Self {
            strategy: RwLock::new(strategy),
            next_worker: AtomicUsize::new(0),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, LoadBalancing> {
        self.strategy.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, LoadBalancing> {
        self.strategy.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn next_backend(&self) -> LbResult<ServerConfig> {
        self.read().next()
    }

    pub(crate) fn attach(&self, server: ServerConfig) -> bool {
        self.write().attach(server)
    }

    pub(crate) fn detach(&self, server: &ServerConfig) -> bool {
        self.write().detach(server)
    }

    pub(crate) fn servers(&self) -> Vec<ServerConfig> {
        self.read().servers()
    }

    pub(crate) fn signal(&self, server: &ServerConfig) {
        self.write().signal(server);
    }

    pub(crate) fn reset(&self) {
        self.write().reset();
    }

    pub(crate) fn active_connections(&self, server: &ServerConfig) -> Option<u32> {
        self.read().active_connections(server)
    }

    pub(crate) fn strategy_name(&self) -> &'static str {
        self.read().name()
    }

    /// Worker index for the next session, independent of backend choice.
    pub(crate) fn pick_worker(&self, pool_size: usize) -> usize {
        self.next_worker.fetch_add(1, Ordering::Relaxed) % pool_size
    }
}

impl SessionObserver for Router {
    fn session_closed(&self, backend: &ServerConfig) {
        debug!("session to {backend} closed");
        self.signal(backend);
    }
}
