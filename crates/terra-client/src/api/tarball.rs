use std::collections::HashMap;

use futures::{StreamExt, TryStreamExt};
use url::Url;

use crate::{ClientError, RegistryClient};

impl RegistryClient {
    /// Downloads a tarball into memory. The bytes are returned exactly as
    /// served, so integrity strings can be checked against them.
    pub async fn tarball(&self, url: &Url) -> Result<Vec<u8>, ClientError> {
        let response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(ClientError::BadResponse {
                url: url.to_string(),
                status: response.status(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Fans out tarball downloads through a bounded pool. Unlike packument
    /// fan-out, any single failure aborts the whole batch: a partially
    /// downloaded set is useless to the installer.
    pub async fn tarballs(
        &self,
        urls: HashMap<String, Url>,
        concurrency: usize,
    ) -> Result<HashMap<String, Vec<u8>>, ClientError> {
        futures::stream::iter(urls)
            .map(|(id, url)| async move {
                let data = self.tarball(&url).await?;
                Ok::<_, ClientError>((id, data))
            })
            .buffer_unordered(concurrency.max(1))
            .try_collect()
            .await
    }
}
