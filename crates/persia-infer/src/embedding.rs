use std::sync::Arc;
use std::time::Duration;

use candle_core::{Device, Tensor};

use crate::batch::PersiaBatch;
use crate::middleware::{EmbeddingService, LookupResponse, SlotEmbeddings};
use crate::{Error, Result};

/// How [`EmbeddingContext::prepare_features`] treats the target of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum PreprocessMode {
    /// Offline evaluation: the batch must carry a target.
    Eval,
    /// Online serving: any target is dropped.
    #[default]
    Inference,
}

#[derive(Debug, Clone, Copy)]
pub struct ReadinessOptions {
    /// Upper bound on the whole wait.
    pub timeout: Duration,
    /// Pause between two status probes.
    pub retry_interval: Duration,
}

impl Default for ReadinessOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            retry_interval: Duration::from_secs(5),
        }
    }
}

/// Embedding of a single sparse feature, materialized on a device.
#[derive(Debug, Clone)]
pub enum FeatureEmbedding {
    /// `(rows, dim)`
    Sum { name: String, tensor: Tensor },
    /// `distinct (n_distinct, dim)`, `index (rows, sample_fixed_size)` as `u32`,
    /// `non_empty_index (k,)`.
    Raw {
        name: String,
        distinct: Tensor,
        index: Tensor,
        non_empty_index: Tensor,
    },
}

impl FeatureEmbedding {
    pub fn name(&self) -> &str {
        match self {
            FeatureEmbedding::Sum { name, .. } | FeatureEmbedding::Raw { name, .. } => name,
        }
    }
}

/// A batch with its embeddings attached.
#[derive(Debug)]
pub struct EmbeddingBatch {
    pub batch_size: usize,
    pub dense: Vec<Tensor>,
    pub embeddings: Vec<FeatureEmbedding>,
    pub target: Option<Tensor>,
    pub meta: Option<Vec<u8>>,
    pub batch_id: Option<u64>,
}

/// Tensors handed to the model executor.
#[derive(Debug)]
pub struct ModelInput {
    pub dense: Tensor,
    pub sparse: Vec<Tensor>,
    /// Labels of the batch in eval mode, `None` when serving.
    pub target: Option<Tensor>,
}

impl ModelInput {
    pub fn into_parts(self) -> (Tensor, Vec<Tensor>, Option<Tensor>) {
        (self.dense, self.sparse, self.target)
    }
}

/// Embedding side of the adapter: talks to the middleware tier and turns its answers into
/// tensors on the resolved device.
#[derive(Clone)]
pub struct EmbeddingContext {
    service: Arc<dyn EmbeddingService>,
    device: Device,
    mode: PreprocessMode,
}

impl EmbeddingContext {
    pub fn new(service: Arc<dyn EmbeddingService>, device: Device, mode: PreprocessMode) -> Self {
        Self {
            service,
            device,
            mode,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn mode(&self) -> PreprocessMode {
        self.mode
    }

    /// Block until the middleware and embedding servers are ready for serving.
    pub async fn wait_for_serving(&self, options: &ReadinessOptions) -> Result<()> {
        let poll = async {
            loop {
                match self.service.ready_for_serving().await {
                    Ok(true) => return,
                    Ok(false) => tracing::debug!("embedding tier not ready yet, retry later"),
                    Err(e) => tracing::warn!("failed to get sparse model status, retry later: {e}"),
                }
                tokio::time::sleep(options.retry_interval).await;
            }
        };

        tokio::time::timeout(options.timeout, poll)
            .await
            .map_err(|_| Error::ReadinessTimeout(options.timeout))?;

        tracing::info!("embedding tier ready for serving");
        Ok(())
    }

    /// Decode a serialized batch and attach its embeddings.
    pub async fn get_embedding_from_bytes(&self, bytes: &[u8]) -> Result<EmbeddingBatch> {
        // decoding already validates
        let batch = PersiaBatch::from_bytes(bytes)?;
        self.lookup(batch).await
    }

    /// Validate an in-memory batch and attach its embeddings.
    pub async fn get_embedding_from_data(&self, batch: PersiaBatch) -> Result<EmbeddingBatch> {
        batch.validate()?;
        self.lookup(batch).await
    }

    async fn lookup(&self, batch: PersiaBatch) -> Result<EmbeddingBatch> {
        let response = self.service.lookup(&batch).await?;
        materialize(batch, response, &self.device)
    }

    /// Convert an [`EmbeddingBatch`] into the `(dense, sparse, target)` model input.
    ///
    /// Raw embeddings are gathered into `(rows, sample_fixed_size, dim)` and get a padding
    /// mask appended on the last axis.
    pub fn prepare_features(&self, batch: EmbeddingBatch) -> Result<ModelInput> {
        let target = match self.mode {
            PreprocessMode::Inference => None,
            PreprocessMode::Eval => Some(
                batch
                    .target
                    .ok_or_else(|| Error::Decoding("eval batch carries no target".into()))?,
            ),
        };

        let dense = batch
            .dense
            .into_iter()
            .next()
            .ok_or_else(|| Error::Decoding("batch has no dense feature".into()))?;

        let sparse = batch
            .embeddings
            .into_iter()
            .map(|emb| match emb {
                FeatureEmbedding::Sum { tensor, .. } => Ok(tensor),
                FeatureEmbedding::Raw {
                    name,
                    distinct,
                    index,
                    ..
                } => raw_with_mask(&name, &distinct, &index),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ModelInput {
            dense,
            sparse,
            target,
        })
    }
}

fn raw_with_mask(name: &str, distinct: &Tensor, index: &Tensor) -> Result<Tensor> {
    let (rows, sample_fixed_size) = index.dims2()?;
    let (n_distinct, dim) = distinct.dims2()?;
    let flat_index = index.flatten_all()?;

    if flat_index.elem_count() > 0 {
        let max_index = flat_index.max(0)?.to_scalar::<u32>()? as usize;
        if max_index >= n_distinct {
            return Err(Error::Lookup(format!(
                "raw embedding `{name}` select index {max_index} larger than tensor of {n_distinct}"
            )));
        }
    }

    let selected = distinct.index_select(&flat_index, 0)?;
    let fixed = selected.reshape((rows, sample_fixed_size, dim))?;
    let mask = index
        .reshape((rows, sample_fixed_size, 1))?
        .ne(0u32)?
        .to_dtype(fixed.dtype())?;

    Ok(Tensor::cat(&[&fixed, &mask], 2)?)
}

fn materialize(batch: PersiaBatch, response: LookupResponse, device: &Device) -> Result<EmbeddingBatch> {
    let rows = batch.batch_size();

    if response.embeddings.len() != batch.sparse.len() {
        return Err(Error::Lookup(format!(
            "lookup returned {} embeddings for {} sparse features",
            response.embeddings.len(),
            batch.sparse.len()
        )));
    }

    let dense = batch
        .dense
        .into_iter()
        .map(|feature| Tensor::from_vec(feature.data, (rows, feature.dim), device))
        .collect::<candle_core::Result<Vec<_>>>()?;

    let embeddings = batch
        .sparse
        .iter()
        .zip(response.embeddings)
        .map(|(feature, slot)| {
            if feature.name != slot.name() {
                return Err(Error::Lookup(format!(
                    "lookup returned `{}` where `{}` was expected",
                    slot.name(),
                    feature.name
                )));
            }
            materialize_slot(slot, rows, device)
        })
        .collect::<Result<Vec<_>>>()?;

    let target = batch
        .target
        .map(|target| Tensor::from_vec(target, (rows, 1), device))
        .transpose()?;

    tracing::trace!(
        "materialized batch of {} rows with {} embeddings on {:?}",
        rows,
        embeddings.len(),
        device.location()
    );

    Ok(EmbeddingBatch {
        batch_size: rows,
        dense,
        embeddings,
        target,
        meta: batch.meta,
        batch_id: batch.batch_id,
    })
}

fn materialize_slot(slot: SlotEmbeddings, rows: usize, device: &Device) -> Result<FeatureEmbedding> {
    match slot {
        SlotEmbeddings::Sum { name, dim, data } => {
            if data.len() != rows * dim {
                return Err(Error::Lookup(format!(
                    "sum embedding `{name}` holds {} values, expected {rows}x{dim}",
                    data.len()
                )));
            }
            let tensor = Tensor::from_vec(data, (rows, dim), device)?;
            Ok(FeatureEmbedding::Sum { name, tensor })
        }
        SlotEmbeddings::Raw {
            name,
            dim,
            distinct,
            index,
            non_empty_index,
            sample_fixed_size,
        } => {
            if dim == 0 || distinct.len() % dim != 0 {
                return Err(Error::Lookup(format!(
                    "raw embedding `{name}` holds {} values, not a multiple of {dim}",
                    distinct.len()
                )));
            }
            if index.len() != rows * sample_fixed_size {
                return Err(Error::Lookup(format!(
                    "raw embedding `{name}` index holds {} entries, expected {rows}x{sample_fixed_size}",
                    index.len()
                )));
            }

            let n_distinct = distinct.len() / dim;
            let k = non_empty_index.len();
            Ok(FeatureEmbedding::Raw {
                name,
                distinct: Tensor::from_vec(distinct, (n_distinct, dim), device)?,
                index: Tensor::from_vec(index, (rows, sample_fixed_size), device)?,
                non_empty_index: Tensor::from_vec(non_empty_index, k, device)?,
            })
        }
    }
}
