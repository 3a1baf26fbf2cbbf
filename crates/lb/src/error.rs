use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LbError {
    #[error("no backends available")]
    NoBackends,

    #[error("unsupported load balancing type: {0}")]
    UnknownStrategy(String),
}

pub type LbResult<T> = Result<T, LbError>;
