use std::{
    fs::{OpenOptions, create_dir_all},
    path::Path,
};

use env_logger::{Builder, Target};
use log::LevelFilter;

/// Maps a configured level to a filter. Unknown names fall back to info.
pub fn parse_level(log_level: &str) -> LevelFilter {
    match log_level.trim().to_lowercase().as_str() {
        "whisper" => LevelFilter::Trace,
        "murmur" => LevelFilter::Debug,
        "ferry" => LevelFilter::Info,
        "horn" => LevelFilter::Warn,
        "siren" => LevelFilter::Error,
        "silence" => LevelFilter::Off,

        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "off" => LevelFilter::Off,

        _ => {
            eprintln!(
                "Invalid log level '{}', defaulting to 'ferry' (info)",
                log_level
            );
            LevelFilter::Info
        }
    }
}

/// Installs the global logger. With `log_file` set, records are appended
/// to that file; if it cannot be opened they go to stderr instead.
/// Calling this twice keeps the first logger.
pub fn init_logger(log_level: &str, log_file: Option<&str>) {
    let mut builder = Builder::new();
    builder
        .filter_level(parse_level(log_level))
        .format_timestamp_secs();

    if let Some(log_file) = log_file {
        match open_log_file(log_file) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(err) => {
                eprintln!("Cannot open log file '{}': {}, logging to stderr", log_file, err);
            }
        }
    }
    // else → default (stderr)

    let _ = builder.try_init();
}

fn open_log_file(log_file: &str) -> std::io::Result<std::fs::File> {
    if let Some(parent) = Path::new(log_file).parent() {
        if !parent.as_os_str().is_empty() {
            create_dir_all(parent)?;
        }
    }

    OpenOptions::new().create(true).append(true).open(log_file)
}
