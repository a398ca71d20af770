use crate::parser::ParseError;
use crate::schema::SchemaError;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("parse was cancelled")]
    Cancelled,
    #[error("background parser unavailable: {0}")]
    WorkerUnavailable(String),
}

pub type Result<T> = std::result::Result<T, Error>;
