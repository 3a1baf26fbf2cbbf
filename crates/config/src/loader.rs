use std::fs;

use crate::config::Config;
use crate::error::{ConfigError, ConfigResult};

/// Reads a YAML config file. JSON is a subset of YAML, so the older
/// JSON layout loads through the same path.
pub fn read_config(filename: &str) -> ConfigResult<Config> {
    let text = fs::read_to_string(filename).map_err(|source| ConfigError::Read {
        path: filename.to_string(),
        source,
    })?;

    parse_config(filename, &text)
}

pub fn parse_config(filename: &str, text: &str) -> ConfigResult<Config> {
    serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
        path: filename.to_string(),
        source,
    })
}
