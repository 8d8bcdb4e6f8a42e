use std::sync::Arc;

use bytes::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use persia_infer::{Prediction, RequestEnvelope};
use tokio::time::Instant;

use crate::server::data_models::PredictionRequest;
use crate::server::state::ServerState;
use crate::server::ServerError;

/// The whole body is the serialized batch.
pub async fn predict_raw(
    State(server_state): State<Arc<ServerState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<Prediction>), ServerError> {
    predict(&server_state, vec![RequestEnvelope::from_batch(body.to_vec())]).await
}

pub async fn predict_json(
    State(server_state): State<Arc<ServerState>>,
    Json(request): Json<PredictionRequest>,
) -> Result<(StatusCode, Json<Prediction>), ServerError> {
    predict(&server_state, request).await
}

async fn predict(
    server_state: &ServerState,
    request: PredictionRequest,
) -> Result<(StatusCode, Json<Prediction>), ServerError> {
    let start = Instant::now();

    let response = server_state.client.predict(request).await?;

    let duration = Instant::now() - start;
    tracing::trace!("Inference took {} ms", duration.as_millis());

    Ok((StatusCode::OK, Json(response)))
}
