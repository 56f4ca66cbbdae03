use std::collections::HashMap;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use petgraph::stable_graph::NodeIndex;
use terra_common::Manifest;
use url::Url;
use xylem::Xylem;

use crate::error::{IoContext, WardenError};
use crate::fs;
use crate::graph::Graph;
use crate::lockfile::{Lockfile, LockfileNode};
use crate::{ProgressHandler, META_FILE_NAME};

/// What a reify run did to the disk.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReifySummary {
    pub removed: usize,
    pub updated: usize,
    pub added: usize,
    pub bins_linked: usize,
}

/// Materializes an ideal tree under `<root>/node_modules`, doing the
/// minimum work the diff against the actual tree allows. Version decisions
/// were all made during resolution; this only moves bytes.
pub(crate) struct Reifier<'a> {
    pub(crate) graph: &'a Graph,
    pub(crate) xylem: &'a Xylem,
    pub(crate) root: PathBuf,
    pub(crate) concurrency: usize,
    pub(crate) on_reify_progress: Option<ProgressHandler>,
}

impl<'a> Reifier<'a> {
    pub(crate) async fn reify(&self) -> Result<ReifySummary, WardenError> {
        let ideal = self.graph.to_lockfile();
        let actual = self.load_actual().await;
        let empty = Lockfile::default();
        let diff = actual.as_ref().unwrap_or(&empty).diff(&ideal);

        let node_modules = self.root.join("node_modules");
        async_std::fs::create_dir_all(&node_modules)
            .await
            .io_context(|| {
                format!("Failed to create {}", node_modules.display())
            })?;

        let mut summary = ReifySummary::default();

        // Phase 1: removals, shims first so no dangling links survive.
        let total = diff.remove.len();
        for (i, location) in diff.remove.iter().enumerate() {
            self.progress("Removing packages", i, total);
            if let Some(entry) = actual
                .as_ref()
                .and_then(|lock| lock.packages.get(location))
            {
                if let (Some(bin), Some(name)) = (&entry.bin, entry.name_at(location)) {
                    fs::remove_bin_links(&self.root, bin, &name)?;
                }
            }
            fs::remove_node(&self.root.join(location))?;
            summary.removed += 1;
        }
        self.progress("Removing packages", total, total);

        // Phase 2: clear out the old versions of updated packages.
        let total = diff.update.len();
        for (i, (location, _, _)) in diff.update.iter().enumerate() {
            self.progress("Preparing updates", i, total);
            fs::remove_node(&self.root.join(location))?;
        }
        self.progress("Preparing updates", total, total);

        // Phase 3: bounded-parallel downloads of everything new. Any
        // failure here aborts: a half-fetched set must not install.
        let mut wanted: Vec<String> = diff.add.clone();
        wanted.extend(diff.update.iter().map(|(location, _, _)| location.clone()));
        // Removing or replacing a package directory takes its nested
        // node_modules with it; anything the ideal tree still wants in
        // there has to be re-extracted.
        let mut destroyed: Vec<String> = diff.remove.clone();
        destroyed.extend(diff.update.iter().map(|(location, _, _)| location.clone()));
        for location in ideal.packages.keys() {
            if location.is_empty() || wanted.contains(location) {
                continue;
            }
            if destroyed
                .iter()
                .any(|gone| location.starts_with(&format!("{gone}/")))
            {
                wanted.push(location.clone());
            }
        }
        wanted.sort();
        // Idempotence: anything already on disk at the right version (say,
        // from an interrupted run) doesn't need re-fetching.
        wanted.retain(|location| {
            let dir = self.root.join(location);
            let installed = fs::installed_version(&dir);
            self.graph
                .node_at_location(location)
                .map(|idx| self.graph[idx].version() != installed.as_ref())
                .unwrap_or(true)
        });
        let mut urls: HashMap<String, Url> = HashMap::new();
        for location in &wanted {
            let idx = self.node_for(location)?;
            urls.insert(location.clone(), self.tarball_url(idx).await?);
        }
        self.progress("Downloading packages", 0, wanted.len());
        let data = self
            .xylem
            .client()
            .tarballs(urls, self.concurrency)
            .await?;
        self.progress("Downloading packages", wanted.len(), wanted.len());

        // Phase 4: verify + extract, serially, in location order.
        let total = wanted.len();
        for (i, location) in wanted.iter().enumerate() {
            self.progress("Installing packages", i, total);
            let idx = self.node_for(location)?;
            let node = &self.graph[idx];
            let bytes = data
                .get(location)
                .expect("downloads cover every wanted location");
            if let Some(integrity) = node.integrity() {
                integrity.check(bytes)?;
            }
            fs::write_node(&self.root.join(location), bytes)?;
        }
        self.progress("Installing packages", total, total);
        summary.added = diff.add.len();
        summary.updated = diff.update.len();

        // Phase 5: bin links for the whole final tree.
        summary.bins_linked = self.link_bins(&ideal)?;

        // Record what's now on disk so the next run can diff cheaply.
        let meta = node_modules.join(META_FILE_NAME);
        async_std::fs::write(&meta, ideal.to_npm_string(3)?)
            .await
            .io_context(|| format!("Failed to write {}", meta.display()))?;

        Ok(summary)
    }

    fn progress(&self, message: &str, processed: usize, total: usize) {
        if let Some(handler) = &self.on_reify_progress {
            handler(message, processed, total);
        }
    }

    fn node_for(&self, location: &str) -> Result<NodeIndex, WardenError> {
        self.graph.node_at_location(location).ok_or_else(|| {
            WardenError::MiscError(format!(
                "ideal tree has no node at {location}, but the diff claims one"
            ))
        })
    }

    /// The URL to fetch a node's tarball from: what resolution recorded,
    /// or a fresh registry lookup for nodes that came from a lockfile
    /// without one.
    async fn tarball_url(&self, idx: NodeIndex) -> Result<Url, WardenError> {
        let node = &self.graph[idx];
        if let Some(resolved) = node.resolved() {
            return Ok(resolved.clone());
        }
        let version = node.version().ok_or_else(|| {
            WardenError::MiscError(format!(
                "node {} has neither a resolved URL nor a version",
                node.name()
            ))
        })?;
        let packument = self.xylem.packument(node.registry_name()).await?;
        packument
            .versions
            .get(version)
            .and_then(|metadata| metadata.dist.tarball.clone())
            .ok_or_else(|| {
                WardenError::MiscError(format!(
                    "registry has no tarball for {}@{}",
                    node.registry_name(),
                    version
                ))
            })
    }

    fn link_bins(&self, ideal: &Lockfile) -> Result<usize, WardenError> {
        // Start from a clean shared bin dir; stale shims are worse than no
        // shims.
        fs::remove_node(&self.root.join("node_modules").join(".bin"))?;
        let mut linked = 0;
        for (location, entry) in &ideal.packages {
            if location.is_empty() {
                continue;
            }
            let Some(bin) = &entry.bin else {
                continue;
            };
            let Some(name) = entry.name_at(location) else {
                continue;
            };
            linked += fs::create_bin_links(&self.root, &self.root.join(location), bin, &name)?;
        }
        Ok(linked)
    }

    /// The actual tree: the hidden meta lockfile when present and intact,
    /// else a scan of what's really installed. A corrupt meta file is
    /// deleted and falls through to the scan.
    async fn load_actual(&self) -> Option<Lockfile> {
        let meta = self.root.join("node_modules").join(META_FILE_NAME);
        if let Ok(contents) = async_std::fs::read_to_string(&meta).await {
            match Lockfile::from_npm(contents) {
                Ok(lockfile) => return Some(lockfile),
                Err(e) => {
                    tracing::debug!("discarding corrupt meta lockfile: {e}");
                    let _ = async_std::fs::remove_file(&meta).await;
                }
            }
        }
        scan_node_modules(&self.root)
    }
}

/// Builds an actual-tree lockfile by reading installed manifests under
/// `<root>/node_modules`, scoped packages included.
pub(crate) fn scan_node_modules(root: &Path) -> Option<Lockfile> {
    let node_modules = root.join("node_modules");
    if !node_modules.is_dir() {
        return None;
    }
    let mut lockfile = Lockfile::default();
    lockfile
        .packages
        .insert(String::new(), LockfileNode::default());
    scan_dir(&node_modules, "", &mut lockfile.packages);
    Some(lockfile)
}

fn scan_dir(dir: &Path, prefix: &str, packages: &mut IndexMap<String, LockfileNode>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| !name.starts_with('.'))
        .collect();
    names.sort();
    for name in names {
        if name.starts_with('@') {
            // Scope dir: real packages are one level down.
            let scope_dir = dir.join(&name);
            let Ok(scoped) = std::fs::read_dir(&scope_dir) else {
                continue;
            };
            let mut inner: Vec<String> = scoped
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.path().is_dir())
                .filter_map(|entry| entry.file_name().into_string().ok())
                .collect();
            inner.sort();
            for pkg in inner {
                scan_package(
                    &scope_dir.join(&pkg),
                    &format!("{name}/{pkg}"),
                    prefix,
                    packages,
                );
            }
        } else {
            scan_package(&dir.join(&name), &name, prefix, packages);
        }
    }
}

fn scan_package(
    pkg_dir: &Path,
    install_name: &str,
    prefix: &str,
    packages: &mut IndexMap<String, LockfileNode>,
) {
    let location = if prefix.is_empty() {
        format!("node_modules/{install_name}")
    } else {
        format!("{prefix}/node_modules/{install_name}")
    };
    let manifest: Option<Manifest> = if fs::node_exists(pkg_dir) {
        std::fs::read_to_string(pkg_dir.join("package.json"))
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
    } else {
        None
    };
    let Some(manifest) = manifest else {
        // A directory without a readable manifest is extraneous; record it
        // versionless so the diff schedules its removal.
        packages.insert(location, LockfileNode::default());
        return;
    };
    let name = manifest
        .name
        .clone()
        .filter(|manifest_name| manifest_name != install_name);
    packages.insert(
        location.clone(),
        LockfileNode {
            name,
            version: manifest.version.clone(),
            bin: manifest.bin.clone(),
            ..Default::default()
        },
    );
    let nested = pkg_dir.join("node_modules");
    if nested.is_dir() {
        scan_dir(&nested, &location, packages);
    }
}
