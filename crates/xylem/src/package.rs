use std::path::Path;

use terra_client::RegistryClient;
use terra_common::Manifest;
use terra_integrity::Integrity;
use terra_spec::PackageSpec;
use url::Url;

use crate::error::Result;
use crate::resolver::PackageResolution;
use crate::tarball;

/// A package pinned to one concrete version, ready to be downloaded and
/// installed.
#[derive(Clone)]
pub struct Package {
    pub(crate) client: RegistryClient,
    pub(crate) name: String,
    pub(crate) from: PackageSpec,
    pub(crate) resolved: PackageResolution,
    pub(crate) manifest: Manifest,
}

impl Package {
    /// The name this package is installed under. For aliased dependencies
    /// this differs from the registry name in the resolution.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The spec that requested this package.
    pub fn from(&self) -> &PackageSpec {
        &self.from
    }

    pub fn resolved(&self) -> &PackageResolution {
        &self.resolved
    }

    /// The manifest of the resolved version.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn tarball_url(&self) -> &Url {
        self.resolved.tarball()
    }

    pub fn integrity(&self) -> Option<&Integrity> {
        self.resolved.integrity()
    }

    /// Downloads this package's tarball into memory, exactly as served.
    pub async fn tarball_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.client.tarball(self.resolved.tarball()).await?)
    }

    /// Downloads and extracts this package under `dir`, stripping the
    /// conventional single top-level directory.
    pub async fn extract_to_dir(&self, dir: impl AsRef<Path>) -> Result<()> {
        let data = self.tarball_bytes().await?;
        tarball::extract_to_dir(data, dir.as_ref().to_path_buf()).await
    }
}

impl std::fmt::Debug for Package {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Package")
            .field("name", &self.name)
            .field("from", &self.from)
            .field("resolved", &self.resolved)
            .finish()
    }
}
