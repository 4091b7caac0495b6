use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Invalid configuration in {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: tracksentry_core::Error,
    },
    #[error("Socket error: {0}")]
    Socket(#[from] io::Error),
    #[error("Invalid track message: {0}")]
    Message(#[from] serde_json::Error),
    #[error("Invalid argument: {0}")]
    Argument(String),
    #[error("No configuration directory available")]
    NoConfigDir,
}
