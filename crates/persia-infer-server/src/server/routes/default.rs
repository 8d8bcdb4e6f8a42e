use axum::http::StatusCode;
use axum::Json;

use crate::server::data_models::PingResponse;

pub async fn health_check() -> StatusCode {
    StatusCode::OK
}

pub async fn ping() -> Json<PingResponse> {
    Json(PingResponse::healthy())
}
