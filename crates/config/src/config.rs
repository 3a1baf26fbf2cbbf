use serde::{Deserialize, Serialize};

use crate::default::{
    get_default_algorithm, get_default_clients_port, get_default_log, get_default_log_level,
};
use crate::error::ConfigResult;
use crate::server::ServerConfig;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "get_default_clients_port", alias = "clientsPort")]
    pub clients_port: u16, // 8080

    #[serde(default = "get_default_algorithm", alias = "algorithmName")]
    pub algorithm: String, // roundrobin | leastconnections

    #[serde(default, alias = "serversConfigs")]
    pub servers: Vec<Server>,

    // number of session workers, defaults to available parallelism
    #[serde(default)]
    pub workers: Option<usize>,

    #[serde(default = "get_default_log")]
    pub log: Log,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Server {
    #[serde(alias = "serverIP")]
    pub address: String, // "127.0.0.1"

    #[serde(alias = "serverPort")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Log {
    // whisper -> trace
    // murmur -> debug
    // ferry -> info
    // horn -> warn
    // siren -> error
    // silence -> off

    #[serde(default = "get_default_log_level")]
    pub level: String,

    #[serde(default)]
    pub file: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            clients_port: get_default_clients_port(),
            algorithm: get_default_algorithm(),
            servers: Vec::new(),
            workers: None,
            log: get_default_log(),
        }
    }
}

impl Default for Log {
    fn default() -> Self {
        get_default_log()
    }
}

impl Server {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self { address: address.into(), port }
    }

    pub fn to_server_config(&self) -> ConfigResult<ServerConfig> {
        ServerConfig::new(self.address.clone(), self.port)
    }
}

impl Config {
    /// Validated backends in file order.
    pub fn server_configs(&self) -> ConfigResult<Vec<ServerConfig>> {
        self.servers.iter().map(Server::to_server_config).collect()
    }
}
