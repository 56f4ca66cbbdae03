use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use terra_common::Packument;

use crate::{ClientError, RegistryClient};

/// Accept header asking for the slimmed-down "corgi" packument, falling
/// back to the full document for registries that don't support it.
pub(crate) const CORGI_ACCEPT: &str =
    "application/vnd.npm.install-v1+json; q=1.0, application/json; q=0.8, */*";

/// The result of a packument fan-out: whatever could be fetched, plus
/// per-name failures for the caller's optional-dependency judgment.
#[derive(Debug, Default)]
pub struct PackumentBatch {
    pub packuments: HashMap<String, Arc<Packument>>,
    pub failures: HashMap<String, ClientError>,
}

impl RegistryClient {
    /// Fetches (and caches) the packument for a single package.
    pub async fn packument(&self, name: impl AsRef<str>) -> Result<Arc<Packument>, ClientError> {
        let name = name.as_ref();
        if let Some(hit) = self.packuments.get(name) {
            tracing::trace!("packument cache hit for {name}");
            return Ok(hit);
        }
        // Scoped names hit the registry with an encoded slash.
        let url = self.registry.join(&name.replace('/', "%2F"))?;
        let response = self
            .client
            .get(url.clone())
            .header("Accept", CORGI_ACCEPT)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ClientError::PackageNotFound(name.into()));
        }
        if !response.status().is_success() {
            return Err(ClientError::BadResponse {
                url: url.to_string(),
                status: response.status(),
            });
        }
        let body = response.bytes().await?;
        let packument: Packument =
            serde_json::from_slice(&body).map_err(|source| ClientError::BadJson {
                name: name.into(),
                source,
            })?;
        let packument = Arc::new(packument);
        self.packuments.insert(name.into(), packument.clone());
        Ok(packument)
    }

    /// Fans out packument fetches through a bounded pool. Individual
    /// failures are collected per-name; the call as a whole only fails when
    /// *every* requested packument does.
    pub async fn packuments(
        &self,
        names: impl IntoIterator<Item = String>,
        concurrency: usize,
    ) -> Result<PackumentBatch, ClientError> {
        let results = futures::stream::iter(names)
            .map(|name| async move {
                let result = self.packument(&name).await;
                (name, result)
            })
            .buffer_unordered(concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        let requested = results.len();
        let mut batch = PackumentBatch::default();
        for (name, result) in results {
            match result {
                Ok(packument) => {
                    batch.packuments.insert(name, packument);
                }
                Err(e) => {
                    tracing::debug!("failed to fetch packument for {name}: {e}");
                    batch.failures.insert(name, e);
                }
            }
        }
        if requested > 0 && batch.packuments.is_empty() && !batch.failures.is_empty() {
            return Err(ClientError::AllPackumentsFailed(requested));
        }
        Ok(batch)
    }

    /// Whether a fresh packument for `name` is already cached.
    pub fn has_cached_packument(&self, name: &str) -> bool {
        self.packuments.contains(name)
    }
}
