use std::sync::atomic::{AtomicUsize, Ordering};

use log::debug;

use ferry_config::ServerConfig;

use crate::{BackendPool, LbError, LbResult};

/// Hands out backends in attachment order. The cursor always points at
/// the backend the next call returns.
#[derive(Default)]
pub struct RoundRobin {
    pool: BackendPool,
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> LbResult<ServerConfig> {
        let len = self.pool.len();
        if len == 0 {
            return Err(LbError::NoBackends);
        }

        let advance = |cursor: usize| {
            let current = if cursor >= len { 0 } else { cursor };
            Some((current + 1) % len)
        };
        let previous = match self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, advance)
        {
            Ok(previous) | Err(previous) => previous,
        };
        let index = if previous >= len { 0 } else { previous };

        let backend = self.pool.backend(index).ok_or(LbError::NoBackends)?;
        Ok(backend.server().clone())
    }

    pub fn attach(&mut self, server: ServerConfig) -> bool {
        self.pool.attach(server)
    }

    pub fn detach(&mut self, server: &ServerConfig) -> bool {
        let Some(index) = self.pool.detach(server) else {
            return false;
        };

        let len = self.pool.len();
        let cursor = self.cursor.get_mut();
        if index < *cursor {
            *cursor -= 1;
        }
        if *cursor >= len {
            *cursor = 0;
        }
        debug!("round-robin detached {server} at {index}, cursor now {cursor}");
        true
    }

    pub fn servers(&self) -> Vec<ServerConfig> {
        self.pool.servers()
    }

    pub fn signal(&self, _server: &ServerConfig) {}

    pub fn reset(&mut self) {
        *self.cursor.get_mut() = 0;
    }
}
