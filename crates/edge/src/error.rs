use std::net::SocketAddr;

use thiserror::Error;

use ferry_config::ConfigError;
use ferry_lb::LbError;

#[derive(Debug, Error)]
pub enum EdgeError {
    #[error("load balancer instance already exists")]
    AlreadyInitialized,

    #[error("load balancer is already started")]
    AlreadyStarted,

    #[error("load balancer is not active")]
    NotActive,

    #[error("no session workers available")]
    NoWorkers,

    #[error("failed to bind to {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("session worker {0} is stopped")]
    WorkerStopped(usize),

    #[error("session socket error: {0}")]
    Socket(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Lb(#[from] LbError),
}

pub type EdgeResult<T> = Result<T, EdgeError>;
