use persia_infer::RequestEnvelope;
use serde::{Deserialize, Serialize};

/// JSON request body: a list of envelopes, only the first one is read.
pub type PredictionRequest = Vec<RequestEnvelope>;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PingResponse {
    pub status: String,
}

impl PingResponse {
    pub fn healthy() -> Self {
        Self {
            status: "Healthy".to_string(),
        }
    }
}
