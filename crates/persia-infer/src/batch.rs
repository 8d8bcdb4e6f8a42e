//! Wire format of a serialized inference batch.
//!
//! A batch carries the raw dense features and the sparse feature ids of a set of rows. It
//! holds no embeddings: those are attached by the middleware tier during lookup. Batches
//! travel as bincode-encoded bytes.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A dense feature block stored row-major, `dim` values per row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseFeature {
    pub data: Vec<f32>,
    pub dim: usize,
}

impl DenseFeature {
    pub fn new(data: Vec<f32>, dim: usize) -> Self {
        Self { data, dim }
    }

    pub fn rows(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }
}

/// Sparse ids of one feature, one id list per row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseFeature {
    pub name: String,
    pub ids: Vec<Vec<u64>>,
}

impl SparseFeature {
    pub fn new(name: impl Into<String>, ids: Vec<Vec<u64>>) -> Self {
        Self {
            name: name.into(),
            ids,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersiaBatch {
    pub dense: Vec<DenseFeature>,
    pub sparse: Vec<SparseFeature>,
    pub target: Option<Vec<f32>>,
    pub meta: Option<Vec<u8>>,
    pub batch_id: Option<u64>,
}

impl PersiaBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dense(mut self, feature: DenseFeature) -> Self {
        self.dense.push(feature);
        self
    }

    pub fn add_sparse(mut self, feature: SparseFeature) -> Self {
        self.sparse.push(feature);
        self
    }

    pub fn add_target(mut self, target: Vec<f32>) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_meta(mut self, meta: Vec<u8>) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn with_batch_id(mut self, batch_id: u64) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    /// Decode and validate a batch from its wire bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::Decoding("empty batch".into()));
        }

        let batch: PersiaBatch = bincode::deserialize(bytes)
            .map_err(|e| Error::Decoding(format!("malformed batch: {e}")))?;
        batch.validate()?;

        Ok(batch)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Number of rows, taken from the first dense feature.
    pub fn batch_size(&self) -> usize {
        self.dense.first().map(DenseFeature::rows).unwrap_or(0)
    }

    /// Check that every feature agrees on the number of rows.
    pub fn validate(&self) -> Result<()> {
        let Some(first) = self.dense.first() else {
            return Err(Error::Decoding("batch has no dense feature".into()));
        };
        let rows = first.rows();

        for (idx, dense) in self.dense.iter().enumerate() {
            if dense.dim == 0 {
                return Err(Error::Decoding(format!("dense feature {idx} has zero width")));
            }
            if dense.data.len() % dense.dim != 0 {
                return Err(Error::Decoding(format!(
                    "dense feature {idx} holds {} values, not a multiple of its width {}",
                    dense.data.len(),
                    dense.dim
                )));
            }
            if dense.rows() != rows {
                return Err(Error::Decoding(format!(
                    "dense feature {idx} has {} rows, expected {rows}",
                    dense.rows()
                )));
            }
        }

        for sparse in &self.sparse {
            if sparse.ids.len() != rows {
                return Err(Error::Decoding(format!(
                    "sparse feature `{}` has {} rows, expected {rows}",
                    sparse.name,
                    sparse.ids.len()
                )));
            }
        }

        if let Some(target) = &self.target {
            if target.len() != rows {
                return Err(Error::Decoding(format!(
                    "target has {} rows, expected {rows}",
                    target.len()
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn three_rows() -> PersiaBatch {
        PersiaBatch::new()
            .add_dense(DenseFeature::new(vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6], 2))
            .add_sparse(SparseFeature::new("workclass", vec![vec![1], vec![2, 3], vec![]]))
            .with_batch_id(7)
    }

    #[test]
    fn test_decode_valid_batch() -> Result<()> {
        let batch = three_rows();
        let decoded = PersiaBatch::from_bytes(&batch.to_bytes()?)?;

        assert_eq!(decoded.batch_size(), 3);
        assert_eq!(decoded.batch_id, Some(7));
        assert_eq!(decoded.sparse[0].ids[1], vec![2, 3]);
        Ok(())
    }

    #[test]
    fn test_decode_zero_rows() -> Result<()> {
        let batch = PersiaBatch::new()
            .add_dense(DenseFeature::new(vec![], 4))
            .add_sparse(SparseFeature::new("age", vec![]));

        let decoded = PersiaBatch::from_bytes(&batch.to_bytes()?)?;
        assert_eq!(decoded.batch_size(), 0);
        Ok(())
    }

    #[test]
    fn test_empty_bytes() {
        let err = PersiaBatch::from_bytes(&[]).unwrap_err();
        assert!(matches!(err, Error::Decoding(_)));
    }

    #[test]
    fn test_garbage_bytes() {
        let err = PersiaBatch::from_bytes(&[0xff, 0x01, 0x02]).unwrap_err();
        assert!(matches!(err, Error::Decoding(_)));
    }

    #[test]
    fn test_row_mismatches() -> Result<()> {
        let no_dense = PersiaBatch::new().add_sparse(SparseFeature::new("a", vec![]));
        assert!(PersiaBatch::from_bytes(&no_dense.to_bytes()?).is_err());

        let ragged = PersiaBatch::new().add_dense(DenseFeature::new(vec![1.0, 2.0, 3.0], 2));
        assert!(ragged.validate().is_err());

        let zero_width = PersiaBatch::new().add_dense(DenseFeature::new(vec![], 0));
        assert!(zero_width.validate().is_err());

        let sparse_rows = three_rows().add_sparse(SparseFeature::new("b", vec![vec![1]]));
        assert!(sparse_rows.validate().is_err());

        let dense_rows = three_rows().add_dense(DenseFeature::new(vec![1.0, 2.0], 1));
        assert!(dense_rows.validate().is_err());

        let target_rows = three_rows().add_target(vec![1.0]);
        assert!(target_rows.validate().is_err());

        assert!(three_rows().add_target(vec![0.0, 1.0, 0.0]).validate().is_ok());
        Ok(())
    }
}
