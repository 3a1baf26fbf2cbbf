pub mod config;
pub mod default;
pub mod error;
pub mod loader;
pub mod server;
pub mod validator;

pub use config::Config;
pub use error::{ConfigError, ConfigResult};
pub use server::ServerConfig;
