use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};

use persia_infer::directory::StaticDirectory;
use persia_infer::middleware::{EmbeddingService, LookupResponse, SlotEmbeddings};
use persia_infer::{
    DenseFeature, DevicePreference, Error, InferenceAdapter, ModelExecutor, PersiaBatch,
    ReadinessOptions, RequestEnvelope, Result, SparseFeature, StartupContext,
};

/// Answers every sparse feature with a one-wide sum embedding: the sum of the row's ids.
struct SummingService {
    ready: bool,
    lookups: AtomicUsize,
}

impl SummingService {
    fn new(ready: bool) -> Arc<Self> {
        Arc::new(Self {
            ready,
            lookups: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl EmbeddingService for SummingService {
    async fn ready_for_serving(&self) -> Result<bool> {
        Ok(self.ready)
    }

    async fn lookup(&self, batch: &PersiaBatch) -> Result<LookupResponse> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let embeddings = batch
            .sparse
            .iter()
            .map(|feature| SlotEmbeddings::Sum {
                name: feature.name.clone(),
                dim: 1,
                data: feature
                    .ids
                    .iter()
                    .map(|ids| ids.iter().sum::<u64>() as f32)
                    .collect(),
            })
            .collect();
        Ok(LookupResponse { embeddings })
    }
}

/// Predicts the sum of every feature of a row, repeated `width` times.
struct RowSumModel {
    width: usize,
    device: Device,
}

impl ModelExecutor for RowSumModel {
    fn forward(&self, dense: &Tensor, sparse: &[Tensor]) -> Result<Tensor> {
        let rows = dense.dim(0)?;
        if rows == 0 {
            return Ok(Tensor::zeros((0, self.width), DType::F32, &self.device)?);
        }
        let mut features = vec![dense.clone()];
        features.extend(sparse.iter().cloned());
        let sums = Tensor::cat(&features, 1)?.sum_keepdim(1)?;
        Ok(sums.repeat((1, self.width))?)
    }

    fn device(&self) -> &Device {
        &self.device
    }
}

struct BrokenModel(Device);

impl ModelExecutor for BrokenModel {
    fn forward(&self, dense: &Tensor, _sparse: &[Tensor]) -> Result<Tensor> {
        // rank mismatch on purpose
        Ok(dense.matmul(&Tensor::ones(3, DType::F32, &self.0)?)?)
    }

    fn device(&self) -> &Device {
        &self.0
    }
}

fn context() -> StartupContext {
    let mut context = StartupContext::new("unused");
    context.device = DevicePreference::Cpu;
    context.readiness = ReadinessOptions {
        timeout: Duration::from_millis(100),
        retry_interval: Duration::from_millis(10),
    };
    context
}

async fn adapter_with(
    service: Arc<SummingService>,
    model: Box<dyn ModelExecutor>,
) -> Result<InferenceAdapter> {
    let directory = StaticDirectory::new(["127.0.0.1:8887"]);
    InferenceAdapter::initialize_with(
        &context(),
        &directory,
        move |_addrs| Ok(service as Arc<dyn EmbeddingService>),
        move |_device| Ok(model),
    )
    .await
}

fn row_sum(width: usize) -> Box<dyn ModelExecutor> {
    Box::new(RowSumModel {
        width,
        device: Device::Cpu,
    })
}

fn batch_bytes(dense: Vec<f32>, ids: Vec<Vec<u64>>) -> Vec<u8> {
    PersiaBatch::new()
        .add_dense(DenseFeature::new(dense, 1))
        .add_sparse(SparseFeature::new("workclass", ids))
        .to_bytes()
        .expect("batch encodes")
}

#[tokio::test]
async fn test_three_rows_in_row_order() -> Result<()> {
    let adapter = adapter_with(SummingService::new(true), row_sum(1)).await?;

    let bytes = batch_bytes(vec![1.0, 2.0, 3.0], vec![vec![1], vec![2], vec![3]]);
    let prediction = adapter.handle(&[RequestEnvelope::from_batch(bytes)]).await?;

    assert_eq!(prediction, vec![vec![2.0, 4.0, 6.0]]);
    Ok(())
}

#[tokio::test]
async fn test_zero_rows() -> Result<()> {
    let adapter = adapter_with(SummingService::new(true), row_sum(1)).await?;

    let prediction = adapter
        .handle(&[RequestEnvelope::from_batch(batch_bytes(vec![], vec![]))])
        .await?;

    assert_eq!(prediction, vec![Vec::<f32>::new()]);
    Ok(())
}

#[tokio::test]
async fn test_output_length_is_element_count() -> Result<()> {
    let adapter = adapter_with(SummingService::new(true), row_sum(2)).await?;

    let bytes = batch_bytes(vec![1.0, 0.0, 5.0], vec![vec![], vec![4, 4], vec![1]]);
    let prediction = adapter.handle(&[RequestEnvelope::from_batch(bytes)]).await?;

    assert_eq!(prediction.len(), 1);
    assert_eq!(prediction[0], vec![1.0, 1.0, 8.0, 8.0, 6.0, 6.0]);
    Ok(())
}

#[tokio::test]
async fn test_only_first_envelope_is_read() -> Result<()> {
    let adapter = adapter_with(SummingService::new(true), row_sum(1)).await?;

    let bytes = batch_bytes(vec![1.0], vec![vec![1]]);
    let prediction = adapter
        .handle(&[RequestEnvelope::from_batch(bytes), RequestEnvelope::default()])
        .await?;

    assert_eq!(prediction, vec![vec![2.0]]);
    Ok(())
}

#[tokio::test]
async fn test_missing_or_empty_batch_never_reaches_middleware() -> Result<()> {
    let service = SummingService::new(true);
    let adapter = adapter_with(service.clone(), row_sum(1)).await?;

    let err = adapter.preprocess(&[RequestEnvelope::default()]).await.unwrap_err();
    assert!(matches!(err, Error::MissingField("batch")));

    let err = adapter
        .preprocess(&[RequestEnvelope::from_batch(Vec::new())])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Decoding(_)));

    let err = adapter
        .preprocess(&[RequestEnvelope::from_batch(vec![7, 7, 7])])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Decoding(_)));

    let err = adapter.preprocess(&[]).await.unwrap_err();
    assert!(matches!(err, Error::Decoding(_)));

    assert_eq!(service.lookups.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn test_no_middleware_address() {
    let directory = StaticDirectory::new(Vec::<String>::new());
    let connected = Arc::new(AtomicUsize::new(0));
    let loaded = Arc::new(AtomicUsize::new(0));
    let (connect_counter, load_counter) = (connected.clone(), loaded.clone());

    let result = InferenceAdapter::initialize_with(
        &context(),
        &directory,
        move |_addrs| {
            connect_counter.fetch_add(1, Ordering::SeqCst);
            Ok(SummingService::new(true) as Arc<dyn EmbeddingService>)
        },
        move |_device| {
            load_counter.fetch_add(1, Ordering::SeqCst);
            Ok(row_sum(1))
        },
    )
    .await;

    assert!(matches!(result, Err(Error::DirectoryResolution(_))));
    assert_eq!(connected.load(Ordering::SeqCst), 0);
    assert_eq!(loaded.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_embedding_tier_never_ready() {
    let directory = StaticDirectory::new(["127.0.0.1:8887"]);
    let loaded = Arc::new(AtomicUsize::new(0));
    let load_counter = loaded.clone();

    let result = InferenceAdapter::initialize_with(
        &context(),
        &directory,
        |_addrs| Ok(SummingService::new(false) as Arc<dyn EmbeddingService>),
        move |_device| {
            load_counter.fetch_add(1, Ordering::SeqCst);
            Ok(row_sum(1))
        },
    )
    .await;

    assert!(matches!(result, Err(Error::ReadinessTimeout(_))));
    // the model is only loaded once the embedding tier serves
    assert_eq!(loaded.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_postprocess_is_idempotent() -> Result<()> {
    let adapter = adapter_with(SummingService::new(true), row_sum(1)).await?;

    let bytes = batch_bytes(vec![0.5, 1.5], vec![vec![2], vec![]]);
    let input = adapter.preprocess(&[RequestEnvelope::from_batch(bytes)]).await?;
    assert!(input.target.is_none());

    let output = adapter.inference(input)?;
    let first = adapter.postprocess(&output)?;
    let second = adapter.postprocess(&output)?;
    assert_eq!(first, second);
    assert_eq!(first, vec![vec![2.5, 1.5]]);
    Ok(())
}

#[tokio::test]
async fn test_forward_failure_is_execution_error() -> Result<()> {
    let adapter = adapter_with(SummingService::new(true), Box::new(BrokenModel(Device::Cpu))).await?;

    let bytes = batch_bytes(vec![1.0, 2.0], vec![vec![1], vec![2]]);
    let err = adapter
        .handle(&[RequestEnvelope::from_batch(bytes)])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Execution(_)));
    Ok(())
}
