use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Directory resolution error: {0}")]
    DirectoryResolution(String),

    #[error("Embedding tier not ready for serving after {0:?}")]
    ReadinessTimeout(Duration),

    #[error("Decoding error: {0}")]
    Decoding(String),

    /// The middleware answered, but its answer does not fit the batch.
    #[error("Lookup error: {0}")]
    Lookup(String),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Model load error: {0}")]
    ModelLoad(&'static str),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Middleware RPC error: {0}")]
    Rpc(#[from] reqwest::Error),

    #[error("Serde JSON error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),

    #[error("HF Hub error: {0}")]
    HFHub(#[from] hf_hub::api::sync::ApiError),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl Error {
    /// Whether the error was caused by the content of a request rather than by the
    /// adapter or its collaborators.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Decoding(_) | Error::MissingField(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
