use std::collections::BTreeMap;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use terra_common::{Bin, Manifest, PeerDependencyMeta};
use terra_semver::Version;

use crate::error::WardenError;
use crate::graph::Graph;

mod npm;
mod yarn;

pub(crate) use yarn::YarnMetadata;

/// Which on-disk dialect a lockfile was read from (and should be written
/// back as, when the caller wants format preservation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockfileFormat {
    NpmV1,
    NpmV2,
    NpmV3,
    YarnBerry,
}

/// The canonical, in-memory lockfile: npm v3 shape regardless of input
/// dialect. The empty-string location is the root package; every other
/// location is a slash-separated path starting with `node_modules/`.
#[derive(Debug, Clone, PartialEq)]
pub struct Lockfile {
    pub name: Option<String>,
    pub version: Option<Version>,
    pub lockfile_version: u64,
    pub format: LockfileFormat,
    pub packages: IndexMap<String, LockfileNode>,
    /// Yarn metadata and opaque non-npm entries, preserved for
    /// round-tripping yarn input.
    pub(crate) yarn: Option<YarnMetadata>,
}

impl Default for Lockfile {
    fn default() -> Self {
        Self {
            name: None,
            version: None,
            lockfile_version: 3,
            format: LockfileFormat::NpmV3,
            packages: IndexMap::new(),
            yarn: None,
        }
    }
}

/// One installed-package entry in the canonical lockfile.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockfileNode {
    /// Registry name, present only when it differs from the name implied
    /// by the location (aliased dependencies).
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<Version>,
    #[serde(default)]
    pub resolved: Option<String>,
    #[serde(default)]
    pub integrity: Option<String>,
    #[serde(default)]
    pub dev: bool,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub peer: bool,
    #[serde(default)]
    pub dependencies: IndexMap<String, String>,
    #[serde(default)]
    pub dev_dependencies: IndexMap<String, String>,
    #[serde(default)]
    pub optional_dependencies: IndexMap<String, String>,
    #[serde(default)]
    pub peer_dependencies: IndexMap<String, String>,
    #[serde(default)]
    pub peer_dependencies_meta: IndexMap<String, PeerDependencyMeta>,
    #[serde(default, deserialize_with = "engines_or_bust")]
    pub engines: IndexMap<String, String>,
    #[serde(default)]
    pub bin: Option<Bin>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub funding: Option<Value>,
    /// Yarn cache checksum, carried only for yarn round-trips.
    #[serde(skip)]
    pub(crate) checksum: Option<String>,
}

impl LockfileNode {
    /// The package name an entry at `location` denotes: the explicit
    /// `name` field when present (aliases), else the location's last
    /// `node_modules/` segment.
    pub fn name_at(&self, location: &str) -> Option<String> {
        if let Some(name) = &self.name {
            return Some(name.clone());
        }
        name_from_location(location)
    }

    /// Reconstructs enough of a manifest for edge-building from a pinned
    /// entry.
    pub(crate) fn to_manifest(&self) -> Manifest {
        Manifest {
            name: self.name.clone(),
            version: self.version.clone(),
            dependencies: to_btree(&self.dependencies),
            dev_dependencies: to_btree(&self.dev_dependencies),
            optional_dependencies: to_btree(&self.optional_dependencies),
            peer_dependencies: to_btree(&self.peer_dependencies),
            peer_dependencies_meta: self
                .peer_dependencies_meta
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            engines: to_btree(&self.engines),
            bin: self.bin.clone(),
            license: self.license.clone(),
            funding: self.funding.clone(),
            ..Default::default()
        }
    }
}

fn to_btree(map: &IndexMap<String, String>) -> BTreeMap<String, String> {
    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

/// The last install-name segment of a location:
/// `node_modules/a/node_modules/@s/b` → `@s/b`.
pub(crate) fn name_from_location(location: &str) -> Option<String> {
    location
        .rsplit_once("node_modules/")
        .map(|(_, name)| name.to_string())
        .filter(|name| !name.is_empty())
}

/// The location of the nearest enclosing package:
/// `node_modules/a/node_modules/b` → `node_modules/a`, `node_modules/a` →
/// `""`.
pub(crate) fn parent_location(location: &str) -> Option<String> {
    if location.is_empty() {
        return None;
    }
    match location.rfind("/node_modules/") {
        Some(pos) => Some(location[..pos].to_string()),
        None => Some(String::new()),
    }
}

fn engines_or_bust<'de, D>(deserializer: D) -> Result<IndexMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Maybe {
        Map(IndexMap<String, String>),
        Other(Value),
    }
    Ok(match Maybe::deserialize(deserializer)? {
        Maybe::Map(map) => map,
        Maybe::Other(_) => IndexMap::new(),
    })
}

/// A shape difference between two lockfiles, keyed by location.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LockfileDiff {
    pub add: Vec<String>,
    pub remove: Vec<String>,
    /// `(location, old version, new version)`.
    pub update: Vec<(String, Option<Version>, Option<Version>)>,
}

impl LockfileDiff {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty() && self.update.is_empty()
    }
}

/// One discrepancy found when checking the disk against a lockfile.
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyIssue {
    Missing {
        location: String,
    },
    MissingManifest {
        location: String,
    },
    VersionMismatch {
        location: String,
        expected: String,
        actual: String,
    },
    InvalidManifest {
        location: String,
    },
}

impl Lockfile {
    /// Parses an npm-dialect lockfile (`package-lock.json` /
    /// `npm-shrinkwrap.json`), any of versions 1 through 3.
    pub fn from_npm(input: impl AsRef<str>) -> Result<Self, WardenError> {
        npm::from_npm(input.as_ref())
    }

    /// Parses a yarn-berry `yarn.lock`.
    pub fn from_yarn(input: impl AsRef<str>) -> Result<Self, WardenError> {
        yarn::from_yarn(input.as_ref())
    }

    /// Serializes to the npm dialect at the requested lockfile version.
    pub fn to_npm_string(&self, lockfile_version: u64) -> Result<String, WardenError> {
        npm::to_npm(self, lockfile_version)
    }

    /// Serializes to yarn-berry format. Checksums survive only as well as
    /// the input provided them.
    pub fn to_yarn_string(&self) -> String {
        yarn::to_yarn(self)
    }

    pub fn root(&self) -> Option<&LockfileNode> {
        self.packages.get("")
    }

    /// Set-difference by location between this (old/actual) lockfile and
    /// an ideal one; same-location version mismatches become updates.
    pub fn diff(&self, ideal: &Lockfile) -> LockfileDiff {
        let mut diff = LockfileDiff::default();
        for (location, entry) in &ideal.packages {
            if location.is_empty() {
                continue;
            }
            match self.packages.get(location) {
                None => diff.add.push(location.clone()),
                Some(existing) => {
                    if existing.version != entry.version {
                        diff.update.push((
                            location.clone(),
                            existing.version.clone(),
                            entry.version.clone(),
                        ));
                    }
                }
            }
        }
        for location in self.packages.keys() {
            if !location.is_empty() && !ideal.packages.contains_key(location) {
                diff.remove.push(location.clone());
            }
        }
        diff.add.sort();
        diff.remove.sort();
        diff.update.sort_by(|a, b| a.0.cmp(&b.0));
        diff
    }

    /// Checks each entry against what's actually installed under `root`.
    pub fn verify(&self, root: &Path) -> Vec<VerifyIssue> {
        let mut issues = Vec::new();
        for (location, entry) in &self.packages {
            if location.is_empty() {
                continue;
            }
            let dir = root.join(location);
            if !dir.is_dir() {
                issues.push(VerifyIssue::Missing {
                    location: location.clone(),
                });
                continue;
            }
            let manifest_path = dir.join("package.json");
            let Ok(raw) = std::fs::read_to_string(&manifest_path) else {
                issues.push(VerifyIssue::MissingManifest {
                    location: location.clone(),
                });
                continue;
            };
            let Ok(manifest) = serde_json::from_str::<Manifest>(&raw) else {
                issues.push(VerifyIssue::InvalidManifest {
                    location: location.clone(),
                });
                continue;
            };
            if let (Some(expected), actual) = (&entry.version, &manifest.version) {
                if actual.as_ref() != Some(expected) {
                    issues.push(VerifyIssue::VersionMismatch {
                        location: location.clone(),
                        expected: expected.to_string(),
                        actual: actual
                            .as_ref()
                            .map(|v| v.to_string())
                            .unwrap_or_else(|| "none".into()),
                    });
                }
            }
        }
        issues
    }
}

impl Graph {
    /// Renders the current tree as a canonical lockfile.
    pub fn to_lockfile(&self) -> Lockfile {
        let root_idx = self.root;
        let root = &self[root_idx];
        let mut packages = IndexMap::new();
        packages.insert(
            String::new(),
            LockfileNode {
                name: root.manifest().name.clone(),
                version: root.version().cloned(),
                dependencies: to_index(&root.manifest().dependencies),
                dev_dependencies: to_index(&root.manifest().dev_dependencies),
                optional_dependencies: to_index(&root.manifest().optional_dependencies),
                peer_dependencies: to_index(&root.manifest().peer_dependencies),
                peer_dependencies_meta: root
                    .manifest()
                    .peer_dependencies_meta
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                engines: to_index(&root.manifest().engines),
                bin: root.manifest().bin.clone(),
                license: root.manifest().license.clone(),
                ..Default::default()
            },
        );

        let mut located = self
            .descendants(root_idx)
            .into_iter()
            .map(|idx| (self.node_location(idx), idx))
            .collect::<Vec<_>>();
        located.sort_by(|a, b| a.0.cmp(&b.0));

        for (location, idx) in located {
            let node = &self[idx];
            packages.insert(
                location,
                LockfileNode {
                    name: node.registry_name.clone(),
                    version: node.version().cloned(),
                    resolved: node.resolved().map(|url| url.to_string()),
                    integrity: node.integrity().map(|i| i.to_string()),
                    dev: node.is_dev(),
                    optional: node.is_optional(),
                    peer: node.is_peer(),
                    dependencies: to_index(&node.manifest().dependencies),
                    optional_dependencies: to_index(&node.manifest().optional_dependencies),
                    peer_dependencies: to_index(&node.manifest().peer_dependencies),
                    peer_dependencies_meta: node
                        .manifest()
                        .peer_dependencies_meta
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                    engines: to_index(&node.manifest().engines),
                    bin: node.manifest().bin.clone(),
                    license: node.manifest().license.clone(),
                    funding: node.manifest().funding.clone(),
                    ..Default::default()
                },
            );
        }

        Lockfile {
            name: root.manifest().name.clone(),
            version: root.version().cloned(),
            lockfile_version: 3,
            format: LockfileFormat::NpmV3,
            packages,
            yarn: None,
        }
    }
}

fn to_index(map: &BTreeMap<String, String>) -> IndexMap<String, String> {
    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}
