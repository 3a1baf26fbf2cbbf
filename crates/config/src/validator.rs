use log::{error, info};

use crate::config::Config;
use crate::error::{ConfigError, ConfigResult};
use crate::server::is_valid_ipv4;

pub const VALID_LOG_LEVELS: &[&str] = &[
    "whisper", "murmur", "ferry", "horn", "siren", "silence",
    "trace", "debug", "info", "warn", "error", "off",
];

pub const VALID_ALGORITHMS: &[&str] = &["roundrobin", "leastconnections"];

pub fn validate(config: &Config) -> ConfigResult<()> {
    info!("Starting configuration validation...");

    // --- Validate log level ---
    if !VALID_LOG_LEVELS
        .iter()
        .any(|lvl| lvl.eq_ignore_ascii_case(config.log.level.trim()))
    {
        error!("Invalid log level: {}", config.log.level);
        return Err(ConfigError::InvalidLogLevel(config.log.level.clone()));
    }

    // --- Validate load balancing algorithm ---
    if !VALID_ALGORITHMS
        .iter()
        .any(|algo| algo.eq_ignore_ascii_case(config.algorithm.trim()))
    {
        error!("Invalid load balancing algorithm: {}", config.algorithm);
        return Err(ConfigError::UnknownAlgorithm(config.algorithm.clone()));
    }

    // --- Validate worker count ---
    if config.workers == Some(0) {
        error!("Worker count is invalid (0)");
        return Err(ConfigError::NoWorkers);
    }

    // --- Validate servers ---
    for server in &config.servers {
        if !is_valid_ipv4(&server.address) {
            error!("Server address is not a valid IPv4 address: '{}'", server.address);
            return Err(ConfigError::InvalidAddress(server.address.clone()));
        }

        if server.port == 0 {
            error!("Server port is invalid (0) for server '{}'", server.address);
            return Err(ConfigError::InvalidPort {
                address: server.address.clone(),
            });
        }
    }

    info!("Configuration validation passed successfully");

    Ok(())
}
