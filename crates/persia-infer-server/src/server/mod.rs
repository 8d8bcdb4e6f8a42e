pub mod data_models;
pub mod infer;
mod init;
pub mod routes;
mod state;
pub mod utils;

pub use init::{init_router, init_state, RouterArgs};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Internal server error: `{0}`")]
    InternalError(anyhow::Error),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Inference error: {0}")]
    InferenceError(String),

    #[error("Embedding tier error: {0}")]
    UpstreamError(String),

    #[error("Inference executor unavailable")]
    ExecutorUnavailable,
}

impl From<anyhow::Error> for ServerError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<persia_infer::Error>() {
            Some(e) if e.is_client_error() => ServerError::BadRequest(e.to_string()),
            Some(persia_infer::Error::Execution(msg)) => ServerError::InferenceError(msg.clone()),
            Some(e @ (persia_infer::Error::Lookup(_) | persia_infer::Error::Rpc(_))) => {
                ServerError::UpstreamError(e.to_string())
            }
            _ => ServerError::InternalError(err),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::InferenceError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::UpstreamError(_) => StatusCode::BAD_GATEWAY,
            ServerError::ExecutorUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        };
        tracing::debug!("request failed with {}: {}", status, self);
        (status, self.to_string()).into_response()
    }
}
