use std::path::{Path, PathBuf};
use std::sync::Arc;

use terra_common::Manifest;
use url::Url;
use xylem::{Xylem, XylemOpts};

use crate::error::{IoContext, WardenError};
use crate::graph::Graph;
use crate::lockfile::{Lockfile, LockfileFormat};
use crate::node::Node;
use crate::reifier::{Reifier, ReifySummary};
use crate::resolver::Resolver;

/// Default fan-out width for packument fetches during resolution.
pub const DEFAULT_CONCURRENCY: usize = terra_client::DEFAULT_PACKUMENT_CONCURRENCY;

/// Default fan-out width for tarball downloads during reification.
pub const DEFAULT_TARBALL_CONCURRENCY: usize = terra_client::DEFAULT_TARBALL_CONCURRENCY;

/// The hidden actual-tree record written under `node_modules/`.
pub const META_FILE_NAME: &str = ".package-lock.json";

/// `(message, processed, total)` reify-phase progress.
pub type ProgressHandler = Arc<dyn Fn(&str, usize, usize) + Send + Sync>;

/// Fired once per dependency request discovered during resolution.
pub type ResolutionAddedHandler = Arc<dyn Fn() + Send + Sync>;

/// Fired with `name@version` as each package resolves.
pub type PackageProgressHandler = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone, Default)]
pub struct TreeWardenOptions {
    registry: Option<Url>,
    default_tag: Option<String>,
    fetch_retries: Option<u32>,
    concurrency: Option<usize>,
    tarball_concurrency: Option<usize>,
    root: Option<PathBuf>,
    lockfile: Option<Lockfile>,
    no_lockfile: bool,
    locked: bool,
    update_names: Vec<String>,
    update_all: bool,
    on_resolution_added: Option<ResolutionAddedHandler>,
    on_resolve_progress: Option<PackageProgressHandler>,
    on_reify_progress: Option<ProgressHandler>,
}

impl TreeWardenOptions {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registry used for packument and tarball fetches.
    ///
    /// Defaults to <https://registry.npmjs.org>.
    pub fn registry(mut self, registry: Url) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Default dist-tag for bare package names. Defaults to `latest`.
    pub fn default_tag(mut self, tag: impl AsRef<str>) -> Self {
        self.default_tag = Some(tag.as_ref().into());
        self
    }

    pub fn fetch_retries(mut self, retries: u32) -> Self {
        self.fetch_retries = Some(retries);
        self
    }

    /// Fan-out width for packument fetches during resolution.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    /// Fan-out width for tarball downloads during reification.
    pub fn tarball_concurrency(mut self, concurrency: usize) -> Self {
        self.tarball_concurrency = Some(concurrency);
        self
    }

    /// Project root directory. Lockfiles are discovered here, and
    /// `node_modules/` lives under it.
    pub fn root(mut self, path: impl AsRef<Path>) -> Self {
        self.root = Some(PathBuf::from(path.as_ref()));
        self
    }

    /// Supplies a pre-parsed lockfile, overriding discovery from the root
    /// directory.
    pub fn lockfile(mut self, lockfile: Lockfile) -> Self {
        self.lockfile = Some(lockfile);
        self
    }

    /// Ignore any lockfile; resolve everything fresh.
    pub fn no_lockfile(mut self, no_lockfile: bool) -> Self {
        self.no_lockfile = no_lockfile;
        self
    }

    /// Error out if the resolved tree differs from the existing lockfile.
    pub fn locked(mut self, locked: bool) -> Self {
        self.locked = locked;
        self
    }

    /// Drop these names from the lockfile seed so they re-resolve to the
    /// newest satisfying versions.
    pub fn update_names(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.update_names = names.into_iter().collect();
        self
    }

    /// Drop every pinned entry and re-resolve the whole tree.
    pub fn update_all(mut self, update_all: bool) -> Self {
        self.update_all = update_all;
        self
    }

    pub fn on_resolution_added<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_resolution_added = Some(Arc::new(f));
        self
    }

    pub fn on_resolve_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_resolve_progress = Some(Arc::new(f));
        self
    }

    pub fn on_reify_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, usize, usize) + Send + Sync + 'static,
    {
        self.on_reify_progress = Some(Arc::new(f));
        self
    }

    /// Resolves the ideal tree for a root manifest.
    pub async fn resolve_manifest(self, manifest: Manifest) -> Result<TreeWarden, WardenError> {
        let mut xylem_opts = XylemOpts::new();
        if let Some(registry) = &self.registry {
            xylem_opts = xylem_opts.registry(registry.clone());
        }
        if let Some(tag) = &self.default_tag {
            xylem_opts = xylem_opts.default_tag(tag);
        }
        if let Some(retries) = self.fetch_retries {
            xylem_opts = xylem_opts.fetch_retries(retries);
        }
        let xylem = xylem_opts.build();

        let lockfile = if self.no_lockfile {
            None
        } else {
            let mut lockfile = match self.lockfile.clone() {
                Some(lockfile) => Some(lockfile),
                None => match &self.root {
                    Some(root) => discover_lockfile(root).await?,
                    None => None,
                },
            };
            if let Some(inner) = &mut lockfile {
                prune_lockfile_for_update(inner, &self.update_names, self.update_all);
            }
            lockfile
        };
        let lockfile_format = lockfile.as_ref().map(|l| l.format);

        let graph = Graph::new(Node::new_root(manifest));
        let resolver = Resolver {
            xylem: &xylem,
            graph,
            concurrency: self.concurrency.unwrap_or(DEFAULT_CONCURRENCY),
            lockfile: lockfile.clone(),
            on_resolution_added: self.on_resolution_added.clone(),
            on_resolve_progress: self.on_resolve_progress.clone(),
        };
        let graph = resolver.run().await?;

        if self.locked {
            if let Some(existing) = &lockfile {
                let diff = existing.diff(&graph.to_lockfile());
                if !diff.is_empty() {
                    return Err(WardenError::LockedMismatch {
                        added: diff.add.len(),
                        removed: diff.remove.len(),
                        updated: diff.update.len(),
                    });
                }
            }
        }

        Ok(TreeWarden {
            graph,
            xylem,
            root: self.root.unwrap_or_else(|| PathBuf::from(".")),
            tarball_concurrency: self
                .tarball_concurrency
                .unwrap_or(DEFAULT_TARBALL_CONCURRENCY),
            lockfile_format,
            on_reify_progress: self.on_reify_progress,
        })
    }

    /// Resolves a tree rooted at a single spec's manifest. Mostly useful
    /// for tests and one-off inspection.
    pub async fn resolve_spec(self, spec: impl AsRef<str>) -> Result<TreeWarden, WardenError> {
        let mut xylem_opts = XylemOpts::new();
        if let Some(registry) = &self.registry {
            xylem_opts = xylem_opts.registry(registry.clone());
        }
        let xylem = xylem_opts.build();
        let package = xylem.resolve(spec.as_ref()).await?;
        let manifest = package.manifest().clone();
        self.resolve_manifest(manifest).await
    }
}

/// Detection order: `npm-shrinkwrap.json` > `package-lock.json` >
/// `yarn.lock`. A present-but-broken lockfile aborts before any disk
/// mutation rather than silently resolving fresh.
async fn discover_lockfile(root: &Path) -> Result<Option<Lockfile>, WardenError> {
    for name in ["npm-shrinkwrap.json", "package-lock.json"] {
        let path = root.join(name);
        if path.exists() {
            let contents = async_std::fs::read_to_string(&path)
                .await
                .io_context(|| format!("Failed to read {}", path.display()))?;
            return Lockfile::from_npm(contents).map(Some);
        }
    }
    let yarn = root.join("yarn.lock");
    if yarn.exists() {
        let contents = async_std::fs::read_to_string(&yarn)
            .await
            .io_context(|| format!("Failed to read {}", yarn.display()))?;
        return Lockfile::from_yarn(contents).map(Some);
    }
    Ok(None)
}

fn prune_lockfile_for_update(lockfile: &mut Lockfile, names: &[String], update_all: bool) {
    if update_all {
        lockfile.packages.retain(|location, _| location.is_empty());
        return;
    }
    if names.is_empty() {
        return;
    }
    lockfile.packages.retain(|location, entry| {
        if location.is_empty() {
            return true;
        }
        let installed_name = entry
            .name_at(location)
            .unwrap_or_default();
        !names.iter().any(|name| *name == installed_name)
    });
}

/// A fully-resolved dependency tree, ready to inspect, lock, or install.
pub struct TreeWarden {
    graph: Graph,
    xylem: Xylem,
    root: PathBuf,
    tarball_concurrency: usize,
    lockfile_format: Option<LockfileFormat>,
    on_reify_progress: Option<ProgressHandler>,
}

impl TreeWarden {
    pub fn builder() -> TreeWardenOptions {
        TreeWardenOptions::new()
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// The format the input lockfile was detected as, if there was one.
    pub fn detected_lockfile_format(&self) -> Option<LockfileFormat> {
        self.lockfile_format
    }

    pub fn to_lockfile(&self) -> Lockfile {
        self.graph.to_lockfile()
    }

    /// Writes the lockfile for this tree, npm dialect, at the given
    /// lockfile version.
    pub async fn write_lockfile(
        &self,
        path: impl AsRef<Path>,
        lockfile_version: u64,
    ) -> Result<(), WardenError> {
        let path = path.as_ref();
        let contents = self.to_lockfile().to_npm_string(lockfile_version)?;
        async_std::fs::write(path, contents)
            .await
            .io_context(|| format!("Failed to write lockfile to {}", path.display()))
    }

    /// Writes the tree as a yarn-berry lockfile.
    pub async fn write_yarn_lockfile(&self, path: impl AsRef<Path>) -> Result<(), WardenError> {
        let path = path.as_ref();
        let contents = self.to_lockfile().to_yarn_string();
        async_std::fs::write(path, contents)
            .await
            .io_context(|| format!("Failed to write lockfile to {}", path.display()))
    }

    /// Installs the resolved tree under the project root.
    pub async fn reify(&self) -> Result<ReifySummary, WardenError> {
        let reifier = Reifier {
            graph: &self.graph,
            xylem: &self.xylem,
            root: self.root.clone(),
            concurrency: self.tarball_concurrency,
            on_reify_progress: self.on_reify_progress.clone(),
        };
        reifier.reify().await
    }

    /// Graphviz rendering of the resolved graph.
    pub fn render(&self) -> String {
        self.graph.render()
    }
}
