#![doc = include_str!("../README.md")]

pub mod adapter;
pub mod batch;
pub mod device;
pub mod directory;
pub mod embedding;
mod error;
pub mod middleware;
pub mod model;

pub use adapter::{
    BatchBytes, InferenceAdapter, ModelOutput, Prediction, RequestEnvelope, StartupContext,
};
pub use batch::{DenseFeature, PersiaBatch, SparseFeature};
pub use candle_core::{Device, Tensor};
pub use device::DevicePreference;
pub use embedding::{EmbeddingContext, ModelInput, PreprocessMode, ReadinessOptions};
pub use error::{Error, Result};
pub use model::ModelExecutor;
