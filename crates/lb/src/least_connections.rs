use ferry_config::ServerConfig;

use crate::{BackendPool, LbError, LbResult};

/// Picks the backend with the fewest in-flight sessions. Ties go to the
/// backend attached first, so selection is deterministic for a given
/// attachment history.
#[derive(Default)]
pub struct LeastConnections {
    pool: BackendPool,
}

impl LeastConnections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Safe to call concurrently: the pick only counts if the chosen
    /// counter still holds the minimum that was observed, otherwise the
    /// scan starts over.
    pub fn next(&self) -> LbResult<ServerConfig> {
        loop {
            // min_by_key keeps the first of equal minima
            let (backend, observed) = self
                .pool
                .iter()
                .map(|b| (b, b.inflight()))
                .min_by_key(|&(_, inflight)| inflight)
                .ok_or(LbError::NoBackends)?;

            if backend.try_acquire(observed) {
                return Ok(backend.server().clone());
            }
        }
    }

    pub fn attach(&mut self, server: ServerConfig) -> bool {
        self.pool.attach(server)
    }

    pub fn detach(&mut self, server: &ServerConfig) -> bool {
        self.pool.detach(server).is_some()
    }

    pub fn servers(&self) -> Vec<ServerConfig> {
        self.pool.servers()
    }

    pub fn signal(&self, server: &ServerConfig) {
        if let Some(backend) = self.pool.find(server) {
            backend.release();
        }
    }

    pub fn reset(&mut self) {
        self.pool.reset_counters();
    }

    pub fn active_connections(&self, server: &ServerConfig) -> Option<u32> {
        self.pool.find(server).map(|b| b.inflight())
    }
}
