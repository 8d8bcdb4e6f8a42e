//! Model side of the adapter.

pub mod dnn;
pub mod repo;
pub mod utils;

use candle_core::{Device, Tensor};

use crate::Result;

pub use dnn::{DnnConfig, DnnModel, OutputActivation};
pub use repo::ModelRepo;

/// A model that maps `(dense, sparse)` features to predictions.
///
/// Implementations only run forward computations; weights are never updated through this
/// trait.
pub trait ModelExecutor: Send + Sync {
    fn forward(&self, dense: &Tensor, sparse: &[Tensor]) -> Result<Tensor>;

    fn device(&self) -> &Device;
}
