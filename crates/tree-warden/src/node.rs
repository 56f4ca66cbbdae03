use std::collections::BTreeMap;

use petgraph::stable_graph::NodeIndex;
use terra_common::Manifest;
use terra_integrity::Integrity;
use terra_semver::Version;
use unicase::UniCase;
use url::Url;
use xylem::{Package, PackageResolution};

use crate::edge::{DepType, Edge};
use crate::Graph;

/// A package occupying one position in the `node_modules/` hierarchy.
///
/// `children` is the *filesystem* relation; the dependency relation lives in
/// `edges_out` (and is not necessarily satisfied by this node's own
/// children, thanks to hoisting).
#[derive(Debug, Clone)]
pub struct Node {
    /// Index of this node inside its [`Graph`].
    pub(crate) idx: NodeIndex,
    /// The name this node is installed under.
    pub(crate) name: UniCase<String>,
    /// The registry-side name, only when it differs from the install name
    /// (aliased dependencies).
    pub(crate) registry_name: Option<String>,
    pub(crate) version: Option<Version>,
    pub(crate) manifest: Manifest,
    /// The resolved package, for nodes that came from a registry.
    pub(crate) package: Option<Package>,
    /// Resolved tarball URL, for lockfile serialization and reification.
    pub(crate) resolved: Option<Url>,
    pub(crate) integrity: Option<Integrity>,
    pub(crate) parent: Option<NodeIndex>,
    pub(crate) children: BTreeMap<UniCase<String>, NodeIndex>,
    pub(crate) edges_out: BTreeMap<UniCase<String>, Edge>,
    pub(crate) is_root: bool,
    pub(crate) dev: bool,
    pub(crate) opt: bool,
    pub(crate) peer: bool,
    pub(crate) extraneous: bool,
}

impl Node {
    pub(crate) fn new(name: impl AsRef<str>, manifest: Manifest) -> Self {
        Self {
            idx: NodeIndex::new(0),
            name: UniCase::new(name.as_ref().to_string()),
            registry_name: None,
            version: manifest.version.clone(),
            manifest,
            package: None,
            resolved: None,
            integrity: None,
            parent: None,
            children: BTreeMap::new(),
            edges_out: BTreeMap::new(),
            is_root: false,
            dev: false,
            opt: false,
            peer: false,
            extraneous: false,
        }
    }

    /// The project root: the node the whole tree hangs off of.
    pub(crate) fn new_root(manifest: Manifest) -> Self {
        let name = manifest
            .name
            .clone()
            .unwrap_or_else(|| "root".to_string());
        let mut node = Node::new(name, manifest);
        node.is_root = true;
        node
    }

    /// A node created from a registry-resolved [`Package`]. Aliased edges
    /// install under the local name while metadata tracks the registry
    /// name.
    pub(crate) fn from_package(package: Package) -> Self {
        let mut node = Node::new(package.name(), package.manifest().clone());
        let PackageResolution::Npm {
            name: registry_name,
            version,
            tarball,
            integrity,
        } = package.resolved().clone();
        if registry_name != package.name() {
            node.registry_name = Some(registry_name);
        }
        node.version = Some(version);
        node.resolved = Some(tarball);
        node.integrity = integrity;
        node.package = Some(package);
        node
    }

    pub fn name(&self) -> &str {
        self.name.as_ref()
    }

    /// The name this package is fetched and recorded under, which differs
    /// from [`Node::name`] only for aliased dependencies.
    pub fn registry_name(&self) -> &str {
        self.registry_name.as_deref().unwrap_or(self.name.as_ref())
    }

    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// The resolved [`Package`], for nodes that came from a registry.
    pub fn package(&self) -> Option<&Package> {
        self.package.as_ref()
    }

    pub fn resolved(&self) -> Option<&Url> {
        self.resolved.as_ref()
    }

    pub fn integrity(&self) -> Option<&Integrity> {
        self.integrity.as_ref()
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    pub fn is_dev(&self) -> bool {
        self.dev
    }

    pub fn is_optional(&self) -> bool {
        self.opt
    }

    pub fn is_peer(&self) -> bool {
        self.peer
    }

    pub fn is_extraneous(&self) -> bool {
        self.extraneous
    }

    pub fn edges_out(&self) -> impl Iterator<Item = &Edge> {
        self.edges_out.values()
    }

    pub fn edge(&self, name: &str) -> Option<&Edge> {
        self.edges_out.get(&UniCase::new(name.to_string()))
    }

    /// This node's depth in the filesystem hierarchy (root = 0).
    pub(crate) fn depth(&self, graph: &Graph) -> usize {
        graph.node_path(self.idx).len()
    }

    pub fn satisfies_range(&self, range: &terra_semver::Range) -> bool {
        self.version
            .as_ref()
            .map(|v| range.satisfies(v))
            .unwrap_or(false)
    }

    /// Builds this node's outgoing edge set from its manifest's declared
    /// dependency maps. Order matters: production deps first, then (for the
    /// root only) dev deps, then optional deps, then peers. The first
    /// declaration of a name wins.
    pub(crate) fn build_edges(&self) -> Vec<Edge> {
        let mut edges: Vec<Edge> = Vec::new();
        let mut seen: BTreeMap<UniCase<String>, ()> = BTreeMap::new();
        let mut push = |edges: &mut Vec<Edge>, name: &str, spec: &str, dep_type: DepType| {
            let key = UniCase::new(name.to_string());
            if seen.contains_key(&key) {
                return;
            }
            seen.insert(key, ());
            edges.push(Edge::new(name, spec, dep_type));
        };

        for (name, spec) in &self.manifest.dependencies {
            push(&mut edges, name, spec, DepType::Prod);
        }
        if self.is_root {
            for (name, spec) in &self.manifest.dev_dependencies {
                push(&mut edges, name, spec, DepType::Dev);
            }
        }
        for (name, spec) in &self.manifest.optional_dependencies {
            push(&mut edges, name, spec, DepType::Opt);
        }
        for (name, spec) in &self.manifest.peer_dependencies {
            let dep_type = if self
                .manifest
                .peer_dependencies_meta
                .get(name)
                .map(|meta| meta.optional)
                .unwrap_or(false)
            {
                DepType::PeerOpt
            } else {
                DepType::Peer
            };
            push(&mut edges, name, spec, dep_type);
        }
        edges
    }

    /// The spec this node would satisfy if asked as `name@spec`, used for
    /// debug output.
    pub(crate) fn debug_id(&self) -> String {
        format!(
            "{}@{}",
            self.name,
            self.version
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "?".to_string())
        )
    }
}

/// Builds the `PackageSpec` string a node's originating edge would use,
/// alias-aware. Used when re-resolving pinned lockfile entries.
pub(crate) fn edge_spec_string(name: &str, registry_name: Option<&str>, spec: &str) -> String {
    match registry_name {
        Some(registry) if registry != name => format!("{name}@npm:{registry}@{spec}"),
        _ => format!("{name}@{spec}"),
    }
}
