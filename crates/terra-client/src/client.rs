use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, ClientBuilder};
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use url::Url;

use crate::cache::PackumentCache;

pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org";

/// Default TTL for the in-memory packument cache.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Clone, Debug)]
pub struct RegistryClientBuilder {
    registry: Url,
    fetch_retries: u32,
    timeout: Duration,
    cache_ttl: Duration,
}

impl Default for RegistryClientBuilder {
    fn default() -> Self {
        Self {
            registry: Url::parse(DEFAULT_REGISTRY).unwrap(),
            fetch_retries: 2,
            timeout: Duration::from_secs(60 * 5),
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

impl RegistryClientBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registry used for packument and tarball fetches.
    pub fn registry(mut self, registry: Url) -> Self {
        self.registry = registry;
        self
    }

    /// Number of times to retry a failed request before giving up.
    pub fn fetch_retries(mut self, fetch_retries: u32) -> Self {
        self.fetch_retries = fetch_retries;
        self
    }

    /// Per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// How long cached packuments stay fresh. A zero duration disables
    /// expiry entirely.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn build(self) -> RegistryClient {
        let client_uncached = ClientBuilder::new()
            .user_agent("terrane")
            .pool_max_idle_per_host(20)
            .timeout(self.timeout)
            .build()
            .expect("Failed to build HTTP client.");

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(self.fetch_retries);
        let retry_strategy = RetryTransientMiddleware::new_with_policy(retry_policy);
        let client = reqwest_middleware::ClientBuilder::new(client_uncached.clone())
            .with(retry_strategy)
            .build();

        RegistryClient {
            registry: Arc::new(self.registry),
            client,
            client_uncached,
            packuments: Arc::new(PackumentCache::new(self.cache_ttl)),
        }
    }
}

/// Client for fetching packuments and tarballs from an npm-compatible
/// registry. Cloning is cheap and clones share the packument cache.
#[derive(Clone, Debug)]
pub struct RegistryClient {
    pub(crate) registry: Arc<Url>,
    pub(crate) client: ClientWithMiddleware,
    #[allow(dead_code)]
    pub(crate) client_uncached: Client,
    pub(crate) packuments: Arc<PackumentCache>,
}

impl RegistryClient {
    pub fn builder() -> RegistryClientBuilder {
        RegistryClientBuilder::new()
    }

    pub fn new(registry: Url) -> Self {
        Self::builder().registry(registry).build()
    }

    pub fn registry(&self) -> &Url {
        &self.registry
    }
}

impl Default for RegistryClient {
    fn default() -> Self {
        RegistryClientBuilder::new().build()
    }
}
