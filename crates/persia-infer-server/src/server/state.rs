use std::sync::Arc;

use anyhow::Result;
use persia_infer::InferenceAdapter;

use crate::server::infer::predict::{PredictionClient, PredictionHandler};
use crate::server::infer::DedicatedExecutor;

/// Represents the state of the server.
#[derive(Clone)]
pub struct ServerState {
    pub client: PredictionClient,
    pub executor: Arc<DedicatedExecutor<PredictionHandler>>,
}

impl ServerState {
    /// Move the adapter onto its own executor thread.
    pub fn new(adapter: InferenceAdapter) -> Result<Self> {
        let executor = DedicatedExecutor::new(PredictionHandler::from(adapter))?;
        let client = PredictionClient::new(&executor);

        Ok(Self {
            client,
            executor: Arc::new(executor),
        })
    }
}
