//! The inference adapter: request envelopes in, flat predictions out.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use candle_core::{DType, Device, Tensor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::device::{resolve_device, DevicePreference};
use crate::directory::MiddlewareDirectory;
use crate::embedding::{EmbeddingContext, ModelInput, PreprocessMode, ReadinessOptions};
use crate::middleware::{EmbeddingService, MiddlewareClient};
use crate::model::{DnnModel, ModelExecutor, ModelRepo};
use crate::{Error, Result};

/// One response per processed batch; the adapter always produces exactly one.
pub type Prediction = Vec<Vec<f32>>;

/// Raw bytes of a serialized batch.
///
/// In JSON it is accepted either as an array of bytes or as a base64 string, and always
/// written back as base64.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchBytes(pub Vec<u8>);

impl BatchBytes {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for BatchBytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl Serialize for BatchBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for BatchBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Bytes(Vec<u8>),
            Base64(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Bytes(bytes) => Ok(Self(bytes)),
            Repr::Base64(encoded) => BASE64
                .decode(encoded.as_bytes())
                .map(Self)
                .map_err(serde::de::Error::custom),
        }
    }
}

/// A single request as handed over by the serving host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchBytes>,
}

impl RequestEnvelope {
    pub fn from_batch(bytes: impl Into<BatchBytes>) -> Self {
        Self {
            batch: Some(bytes.into()),
        }
    }
}

/// Raw output tensor of the forward pass.
#[derive(Debug, Clone)]
pub struct ModelOutput(pub Tensor);

impl ModelOutput {
    pub fn tensor(&self) -> &Tensor {
        &self.0
    }
}

/// Parameters needed to bring an adapter up.
#[derive(Debug, Clone)]
pub struct StartupContext {
    /// Local model folder or `org/name[:revision]` on the hub.
    pub model_source: String,
    pub device: DevicePreference,
    pub readiness: ReadinessOptions,
    pub mode: PreprocessMode,
    /// Per call timeout of middleware requests.
    pub rpc_timeout: Duration,
}

impl StartupContext {
    pub fn new(model_source: impl Into<String>) -> Self {
        Self {
            model_source: model_source.into(),
            device: DevicePreference::default(),
            readiness: ReadinessOptions::default(),
            mode: PreprocessMode::default(),
            rpc_timeout: Duration::from_secs(30),
        }
    }
}

pub struct InferenceAdapter {
    embedding: EmbeddingContext,
    model: Box<dyn ModelExecutor>,
}

impl InferenceAdapter {
    pub fn new(embedding: EmbeddingContext, model: Box<dyn ModelExecutor>) -> Self {
        Self { embedding, model }
    }

    /// Bring up an adapter talking HTTP to the middleware tier and serving a [`DnnModel`].
    pub async fn initialize(
        context: &StartupContext,
        directory: &dyn MiddlewareDirectory,
    ) -> Result<Self> {
        let rpc_timeout = context.rpc_timeout;
        let model_source = context.model_source.clone();

        Self::initialize_with(
            context,
            directory,
            move |addrs| {
                let client = MiddlewareClient::with_timeout(addrs, rpc_timeout)?;
                Ok(Arc::new(client) as Arc<dyn EmbeddingService>)
            },
            move |device| {
                tracing::info!("Loading model: {}. Wait for model load.", model_source);
                let repo = ModelRepo::from_source(&model_source)?;
                let model = DnnModel::from_repo(&repo, device)?;
                tracing::info!("Model loaded");
                Ok(Box::new(model) as Box<dyn ModelExecutor>)
            },
        )
        .await
    }

    /// Same as [`InferenceAdapter::initialize`] with the embedding service constructor and
    /// the model loader supplied by the caller.
    pub async fn initialize_with<C, L>(
        context: &StartupContext,
        directory: &dyn MiddlewareDirectory,
        connect: C,
        load_model: L,
    ) -> Result<Self>
    where
        C: FnOnce(Vec<String>) -> Result<Arc<dyn EmbeddingService>>,
        L: FnOnce(&Device) -> Result<Box<dyn ModelExecutor>>,
    {
        let device = resolve_device(context.device)?;

        let addrs = directory.middleware_addrs().await?;
        if addrs.is_empty() {
            return Err(Error::DirectoryResolution(
                "no middleware address found".into(),
            ));
        }
        tracing::info!("found {} middleware: {:?}", addrs.len(), addrs);

        let service = connect(addrs)?;
        let embedding = EmbeddingContext::new(service, device, context.mode);
        embedding.wait_for_serving(&context.readiness).await?;

        let model = load_model(embedding.device())?;

        Ok(Self::new(embedding, model))
    }

    pub fn device(&self) -> &Device {
        self.embedding.device()
    }

    /// Decode the `batch` field of the first envelope and prepare model inputs from it.
    pub async fn preprocess(&self, requests: &[RequestEnvelope]) -> Result<ModelInput> {
        let envelope = requests
            .first()
            .ok_or_else(|| Error::Decoding("empty request list".into()))?;
        let batch = envelope.batch.as_ref().ok_or(Error::MissingField("batch"))?;

        let batch = self
            .embedding
            .get_embedding_from_bytes(batch.as_bytes())
            .await?;
        tracing::trace!("preprocessed batch of {} rows", batch.batch_size);

        self.embedding.prepare_features(batch)
    }

    /// Forward pass over `(dense, sparse)`; the target slot is not used.
    pub fn inference(&self, input: ModelInput) -> Result<ModelOutput> {
        let (dense, sparse, _target) = input.into_parts();

        let device = self.model.device();
        let dense = dense.to_device(device)?;
        let sparse = sparse
            .iter()
            .map(|t| t.to_device(device))
            .collect::<candle_core::Result<Vec<_>>>()?;

        tracing::trace!("running inference on dense {:?}", dense.shape());
        let output = self
            .model
            .forward(&dense, &sparse)
            .map_err(|e| match e {
                Error::Execution(_) => e,
                other => Error::Execution(other.to_string()),
            })?;
        tracing::trace!("generated output {:?}", output.shape());

        Ok(ModelOutput(output))
    }

    /// Flatten the output into a single row-major list of numbers.
    pub fn postprocess(&self, output: &ModelOutput) -> Result<Prediction> {
        let values = output
            .tensor()
            .flatten_all()?
            .to_dtype(DType::F32)?
            .to_vec1::<f32>()?;
        Ok(vec![values])
    }

    pub async fn handle(&self, requests: &[RequestEnvelope]) -> Result<Prediction> {
        let input = self.preprocess(requests).await?;
        let output = self.inference(input)?;
        self.postprocess(&output)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_envelope_accepts_byte_array_and_base64() -> Result<()> {
        let from_array: RequestEnvelope = serde_json::from_str(r#"{"batch": [1, 2, 3]}"#)?;
        assert_eq!(from_array.batch, Some(BatchBytes(vec![1, 2, 3])));

        let from_base64: RequestEnvelope = serde_json::from_str(r#"{"batch": "AQID"}"#)?;
        assert_eq!(from_base64.batch, Some(BatchBytes(vec![1, 2, 3])));

        let missing: RequestEnvelope = serde_json::from_str("{}")?;
        assert!(missing.batch.is_none());

        assert!(serde_json::from_str::<RequestEnvelope>(r#"{"batch": "not base64!"}"#).is_err());
        Ok(())
    }

    #[test]
    fn test_envelope_serializes_base64() -> Result<()> {
        let envelope = RequestEnvelope::from_batch(vec![1u8, 2, 3]);
        assert_eq!(serde_json::to_string(&envelope)?, r#"{"batch":"AQID"}"#);
        Ok(())
    }

    #[test]
    fn test_startup_context_defaults() {
        let context = StartupContext::new("models/adult-income");
        assert_eq!(context.device, DevicePreference::Auto);
        assert_eq!(context.mode, PreprocessMode::Inference);
        assert_eq!(context.readiness.retry_interval, Duration::from_secs(5));
    }
}
