use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{linear, Linear, VarBuilder};
use serde::Deserialize;

use crate::model::repo::{ModelRepo, ModelRepoFiles, ModelWeightsPath};
use crate::model::ModelExecutor;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputActivation {
    #[default]
    Sigmoid,
    None,
}

fn default_output_dim() -> usize {
    1
}

/// Hyper-parameters of a [`DnnModel`], read from the `config.json` of a model repository.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DnnConfig {
    /// Width of the concatenated dense and flattened sparse features.
    pub input_dim: usize,
    #[serde(default)]
    pub hidden_sizes: Vec<usize>,
    #[serde(default = "default_output_dim")]
    pub output_dim: usize,
    #[serde(default)]
    pub output_activation: OutputActivation,
}

/// Feed-forward network over the dense features and the embeddings of every sparse feature.
///
/// Weights are named `layers.{i}.{weight,bias}` for the hidden layers and
/// `output.{weight,bias}` for the prediction head.
pub struct DnnModel {
    hidden: Vec<Linear>,
    output: Linear,
    config: DnnConfig,
    device: Device,
}

impl DnnModel {
    pub fn load(vb: VarBuilder, config: DnnConfig) -> Result<Self> {
        let mut in_dim = config.input_dim;
        let mut hidden = Vec::with_capacity(config.hidden_sizes.len());
        for (idx, &size) in config.hidden_sizes.iter().enumerate() {
            hidden.push(linear(in_dim, size, vb.pp(format!("layers.{idx}")))?);
            in_dim = size;
        }
        let output = linear(in_dim, config.output_dim, vb.pp("output"))?;

        Ok(Self {
            hidden,
            output,
            device: vb.device().clone(),
            config,
        })
    }

    pub fn from_repo(repo: &ModelRepo, device: &Device) -> Result<Self> {
        let span = tracing::span!(tracing::Level::TRACE, "dnn-from-repo");
        let _enter = span.enter();

        let ModelRepoFiles {
            config,
            model_weights,
        } = repo.file_paths()?;

        let config: DnnConfig = serde_json::from_str(&std::fs::read_to_string(config)?)?;

        let vb = match model_weights {
            ModelWeightsPath::Pth(path) => VarBuilder::from_pth(&path, DType::F32, device)?,
            ModelWeightsPath::Safetensors(path) => unsafe {
                VarBuilder::from_mmaped_safetensors(&[path], DType::F32, device)?
            },
        };

        tracing::info!(
            "Loaded DNN with input width {}, hidden layers {:?}",
            config.input_dim,
            config.hidden_sizes
        );
        Self::load(vb, config)
    }

    pub fn config(&self) -> &DnnConfig {
        &self.config
    }
}

impl ModelExecutor for DnnModel {
    fn forward(&self, dense: &Tensor, sparse: &[Tensor]) -> Result<Tensor> {
        let rows = dense.dim(0)?;
        if rows == 0 {
            return Ok(Tensor::zeros(
                (0, self.config.output_dim),
                DType::F32,
                &self.device,
            )?);
        }

        let mut features = Vec::with_capacity(sparse.len() + 1);
        features.push(dense.to_dtype(DType::F32)?);
        for (idx, emb) in sparse.iter().enumerate() {
            if emb.dim(0)? != rows {
                return Err(Error::Execution(format!(
                    "sparse feature {idx} has {} rows, dense has {rows}",
                    emb.dim(0)?
                )));
            }
            features.push(emb.to_dtype(DType::F32)?.flatten_from(1)?);
        }

        let xs = Tensor::cat(&features, 1)?;
        let width = xs.dim(1)?;
        if width != self.config.input_dim {
            return Err(Error::Execution(format!(
                "expected input width {}, got {width}",
                self.config.input_dim
            )));
        }

        let mut xs = xs;
        for layer in &self.hidden {
            xs = layer.forward(&xs)?.relu()?;
        }
        let xs = self.output.forward(&xs)?;

        Ok(match self.config.output_activation {
            OutputActivation::Sigmoid => candle_nn::ops::sigmoid(&xs)?,
            OutputActivation::None => xs,
        })
    }

    fn device(&self) -> &Device {
        &self.device
    }
}
