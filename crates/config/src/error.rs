use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid IPv4 address: {0}")]
    InvalidAddress(String),

    #[error("invalid port 0 for server {address}")]
    InvalidPort { address: String },

    #[error("unknown load balancing algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("worker count must be at least 1")]
    NoWorkers,
}

pub type ConfigResult<T> = Result<T, ConfigError>;
