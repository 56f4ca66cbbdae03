use std::sync::Arc;
use std::time::Duration;

use terra_client::{PackumentBatch, RegistryClient};
use terra_common::{Manifest, Packument};
use terra_spec::PackageSpec;
use url::Url;

use crate::error::Result;
use crate::package::Package;
use crate::resolver::{PackageResolution, PackageResolver};

/// Build a new [`Xylem`] instance with specified options.
#[derive(Clone, Debug, Default)]
pub struct XylemOpts {
    registry: Option<Url>,
    default_tag: Option<String>,
    fetch_retries: Option<u32>,
    cache_ttl: Option<Duration>,
}

impl XylemOpts {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registry to resolve and fetch packages against.
    ///
    /// Defaults to <https://registry.npmjs.org>.
    pub fn registry(mut self, registry: Url) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Default dist-tag to use when resolving bare package names. Defaults
    /// to `latest`.
    pub fn default_tag(mut self, tag: impl AsRef<str>) -> Self {
        self.default_tag = Some(tag.as_ref().into());
        self
    }

    pub fn fetch_retries(mut self, retries: u32) -> Self {
        self.fetch_retries = Some(retries);
        self
    }

    /// TTL for the in-memory packument cache. Zero disables expiry.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn build(self) -> Xylem {
        let mut builder = RegistryClient::builder();
        if let Some(registry) = self.registry {
            builder = builder.registry(registry);
        }
        if let Some(retries) = self.fetch_retries {
            builder = builder.fetch_retries(retries);
        }
        if let Some(ttl) = self.cache_ttl {
            builder = builder.cache_ttl(ttl);
        }
        Xylem {
            client: builder.build(),
            resolver: PackageResolver {
                default_tag: self.default_tag.unwrap_or_else(|| "latest".into()),
            },
        }
    }
}

/// Toplevel client for resolving package specs to concrete, fetchable
/// packages.
#[derive(Clone, Debug)]
pub struct Xylem {
    client: RegistryClient,
    resolver: PackageResolver,
}

impl Default for Xylem {
    fn default() -> Self {
        XylemOpts::new().build()
    }
}

impl Xylem {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn client(&self) -> &RegistryClient {
        &self.client
    }

    /// Fetches (and caches) a packument by registry name.
    pub async fn packument(&self, name: impl AsRef<str>) -> Result<Arc<Packument>> {
        Ok(self.client.packument(name).await?)
    }

    /// Warms the packument cache for a batch of names. Per-name failures
    /// are reported back for the caller's optional-dependency judgment.
    pub async fn packuments(
        &self,
        names: impl IntoIterator<Item = String>,
        concurrency: usize,
    ) -> Result<PackumentBatch> {
        Ok(self.client.packuments(names, concurrency).await?)
    }

    /// Resolves a string spec (e.g. `foo@^1.2.3`) to a concrete [`Package`].
    pub async fn resolve(&self, spec: impl AsRef<str>) -> Result<Package> {
        let spec: PackageSpec = spec.as_ref().parse()?;
        self.resolve_spec(&spec).await
    }

    /// Resolves a parsed spec to a concrete [`Package`], fetching the
    /// packument for the spec's registry name (alias-aware).
    pub async fn resolve_spec(&self, spec: &PackageSpec) -> Result<Package> {
        let registry_name = spec.target().name().to_string();
        let packument = self.packument(&registry_name).await?;
        self.resolve_from_packument(spec, &packument)
    }

    /// Resolves a spec against an already-fetched packument.
    pub fn resolve_from_packument(
        &self,
        spec: &PackageSpec,
        packument: &Packument,
    ) -> Result<Package> {
        let registry_name = spec.target().name();
        let resolved = self.resolver.resolve(registry_name, spec, packument)?;
        let manifest = match &resolved {
            PackageResolution::Npm { version, .. } => packument
                .versions
                .get(version)
                .map(|metadata| metadata.manifest.clone())
                .unwrap_or_default(),
        };
        Ok(Package {
            client: self.client.clone(),
            // The *install* name: for aliases this is the local alias.
            name: spec.name().to_string(),
            from: spec.clone(),
            resolved,
            manifest,
        })
    }

    /// Builds a package directly from a known resolution, skipping
    /// re-resolution. This is the lockfile fast path.
    pub fn resolve_from(
        &self,
        name: impl AsRef<str>,
        from: PackageSpec,
        resolved: PackageResolution,
        manifest: Manifest,
    ) -> Package {
        Package {
            client: self.client.clone(),
            name: name.as_ref().to_string(),
            from,
            resolved,
            manifest,
        }
    }
}
