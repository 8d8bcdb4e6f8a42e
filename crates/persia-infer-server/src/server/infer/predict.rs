use async_trait::async_trait;
use persia_infer::{InferenceAdapter, Prediction, RequestEnvelope};

use crate::server::infer::client::Client;
use crate::server::infer::handler::RequestHandler;
use crate::server::infer::DedicatedExecutor;
use crate::server::ServerError;

pub struct PredictionHandler {
    adapter: InferenceAdapter,
}

impl PredictionHandler {
    pub fn new(adapter: InferenceAdapter) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl RequestHandler for PredictionHandler {
    type Input = Vec<RequestEnvelope>;
    type Output = Prediction;

    async fn handle(&mut self, request: Vec<RequestEnvelope>) -> anyhow::Result<Prediction> {
        Ok(self.adapter.handle(&request).await?)
    }
}

impl From<InferenceAdapter> for PredictionHandler {
    fn from(adapter: InferenceAdapter) -> Self {
        Self::new(adapter)
    }
}

/// Prediction inference struct
#[derive(Clone)]
pub struct PredictionClient(Client<PredictionHandler>);

impl PredictionClient {
    pub(crate) fn new(executor: &DedicatedExecutor<PredictionHandler>) -> Self {
        Self(Client::new(executor))
    }

    pub async fn predict(&self, request: Vec<RequestEnvelope>) -> Result<Prediction, ServerError> {
        let rx = self
            .0
            .send(request)
            .await
            .map_err(|_| ServerError::ExecutorUnavailable)?;
        let response = rx.await.map_err(|_| ServerError::ExecutorUnavailable)?;

        response.map_err(ServerError::from)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::server::testing::{batch_bytes, test_adapter};

    #[tokio::test]
    async fn test_predict_through_executor() {
        let executor = DedicatedExecutor::new(PredictionHandler::from(test_adapter())).unwrap();
        let client = PredictionClient::new(&executor);

        let prediction = client
            .predict(vec![RequestEnvelope::from_batch(batch_bytes(&[1.0, 2.0]))])
            .await
            .unwrap();
        assert_eq!(prediction, vec![vec![1.0, 2.0]]);

        let err = client
            .predict(vec![RequestEnvelope::default()])
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_predict_after_stop() {
        let executor = DedicatedExecutor::new(PredictionHandler::from(test_adapter())).unwrap();
        let client = PredictionClient::new(&executor);
        executor.stop();

        // Either the send or the receive fails once the loop is gone
        let mut result = Ok(Vec::new());
        for _ in 0..100 {
            result = client
                .predict(vec![RequestEnvelope::from_batch(batch_bytes(&[1.0]))])
                .await;
            if result.is_err() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(matches!(result, Err(ServerError::ExecutorUnavailable)));
    }
}
