//! Discovery of the middleware addresses serving embeddings.

use async_trait::async_trait;

use crate::{Error, Result};

/// Environment variable read by [`EnvDirectory::default`].
pub const MIDDLEWARE_ADDRS_ENV: &str = "PERSIA_MIDDLEWARE_ADDRS";

/// Source of the addresses (`host:port`) of the embedding middleware tier.
#[async_trait]
pub trait MiddlewareDirectory: Send + Sync {
    async fn middleware_addrs(&self) -> Result<Vec<String>>;
}

/// Trims, drops blanks and removes duplicates while keeping first-seen order.
fn normalize<I, S>(addrs: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for addr in addrs {
        let addr = addr.as_ref().trim();
        if !addr.is_empty() && !out.iter().any(|a| a == addr) {
            out.push(addr.to_string());
        }
    }
    out
}

/// A fixed list of addresses.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    addrs: Vec<String>,
}

impl StaticDirectory {
    pub fn new<I, S>(addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            addrs: normalize(addrs),
        }
    }
}

#[async_trait]
impl MiddlewareDirectory for StaticDirectory {
    async fn middleware_addrs(&self) -> Result<Vec<String>> {
        Ok(self.addrs.clone())
    }
}

/// Comma separated addresses read from an environment variable at lookup time.
#[derive(Debug, Clone)]
pub struct EnvDirectory {
    var: String,
}

impl EnvDirectory {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvDirectory {
    fn default() -> Self {
        Self::new(MIDDLEWARE_ADDRS_ENV)
    }
}

#[async_trait]
impl MiddlewareDirectory for EnvDirectory {
    async fn middleware_addrs(&self) -> Result<Vec<String>> {
        match std::env::var(&self.var) {
            Ok(value) => Ok(normalize(value.split(','))),
            Err(std::env::VarError::NotPresent) => Ok(Vec::new()),
            Err(e) => Err(Error::DirectoryResolution(format!("{}: {e}", self.var))),
        }
    }
}

/// Resolves a service name such as `middleware.persia.svc:8887` to every address behind it.
#[derive(Debug, Clone)]
pub struct DnsDirectory {
    service: String,
}

impl DnsDirectory {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

#[async_trait]
impl MiddlewareDirectory for DnsDirectory {
    async fn middleware_addrs(&self) -> Result<Vec<String>> {
        let resolved = tokio::net::lookup_host(self.service.as_str())
            .await
            .map_err(|e| Error::DirectoryResolution(format!("{}: {e}", self.service)))?;

        let addrs = normalize(resolved.map(|addr| addr.to_string()));
        tracing::debug!("{} resolved to {:?}", self.service, addrs);
        Ok(addrs)
    }
}
