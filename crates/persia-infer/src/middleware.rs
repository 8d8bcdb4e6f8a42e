//! Client side of the embedding middleware tier.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};

use crate::batch::PersiaBatch;
use crate::{Error, Result};

pub const READY_FOR_SERVING_PATH: &str = "/ready_for_serving";
pub const LOOKUP_PATH: &str = "/lookup";

/// Embeddings returned by the middleware for one sparse feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SlotEmbeddings {
    /// Pooled embedding per row, `rows * dim` values.
    Sum {
        name: String,
        dim: usize,
        data: Vec<f32>,
    },
    /// Distinct embeddings plus a fixed-size per-row index into them. Index `0` marks
    /// padding.
    Raw {
        name: String,
        dim: usize,
        distinct: Vec<f32>,
        index: Vec<u32>,
        non_empty_index: Vec<u32>,
        sample_fixed_size: usize,
    },
}

impl SlotEmbeddings {
    pub fn name(&self) -> &str {
        match self {
            SlotEmbeddings::Sum { name, .. } | SlotEmbeddings::Raw { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LookupResponse {
    pub embeddings: Vec<SlotEmbeddings>,
}

/// Operations the adapter needs from the embedding tier.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Whether the middleware and embedding servers accept lookups.
    async fn ready_for_serving(&self) -> Result<bool>;

    /// Attach embeddings to the sparse features of `batch`.
    async fn lookup(&self, batch: &PersiaBatch) -> Result<LookupResponse>;
}

/// HTTP client over one or more middleware replicas.
pub struct MiddlewareClient {
    addrs: Vec<String>,
    http: reqwest::Client,
}

impl MiddlewareClient {
    pub fn new(addrs: Vec<String>) -> Result<Self> {
        Self::with_timeout(addrs, Duration::from_secs(30))
    }

    pub fn with_timeout(addrs: Vec<String>, timeout: Duration) -> Result<Self> {
        if addrs.is_empty() {
            return Err(Error::DirectoryResolution(
                "no middleware address to connect to".into(),
            ));
        }

        let addrs = addrs
            .into_iter()
            .map(|addr| {
                let addr = addr.trim_end_matches('/');
                if addr.starts_with("http://") || addr.starts_with("https://") {
                    addr.to_string()
                } else {
                    format!("http://{addr}")
                }
            })
            .collect::<Vec<_>>();

        for addr in &addrs {
            tracing::debug!("created client for middleware {}", addr);
        }

        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self { addrs, http })
    }

    pub fn addrs(&self) -> &[String] {
        &self.addrs
    }

    fn first_addr(&self) -> &str {
        &self.addrs[0]
    }

    fn random_addr(&self) -> &str {
        let idx = rand::random::<usize>() % self.addrs.len();
        &self.addrs[idx]
    }
}

#[async_trait]
impl EmbeddingService for MiddlewareClient {
    async fn ready_for_serving(&self) -> Result<bool> {
        let url = format!("{}{}", self.first_addr(), READY_FOR_SERVING_PATH);
        let ready = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<bool>()
            .await?;
        Ok(ready)
    }

    async fn lookup(&self, batch: &PersiaBatch) -> Result<LookupResponse> {
        let addr = self.random_addr();
        let url = format!("{addr}{LOOKUP_PATH}");
        tracing::trace!("looking up {} sparse features at {}", batch.sparse.len(), addr);

        let body = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(batch.to_bytes()?)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        bincode::deserialize::<LookupResponse>(&body)
            .map_err(|e| Error::Lookup(format!("malformed lookup response: {e}")))
    }
}
