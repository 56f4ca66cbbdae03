use std::collections::{BTreeMap, BTreeSet, HashMap};

use indexmap::IndexMap;
use petgraph::stable_graph::NodeIndex;
use unicase::UniCase;

/// A flat index of every node in a tree, with lookup by canonical location,
/// by name, and by `name@version`.
#[derive(Debug, Default, Clone)]
pub struct Inventory {
    by_location: IndexMap<String, NodeIndex>,
    by_name: BTreeMap<UniCase<String>, BTreeSet<NodeIndex>>,
    by_name_version: HashMap<String, NodeIndex>,
}

impl Inventory {
    pub fn new() -> Self {
        Default::default()
    }

    pub(crate) fn add(
        &mut self,
        location: Option<String>,
        name: &UniCase<String>,
        version: Option<&terra_semver::Version>,
        idx: NodeIndex,
    ) {
        // Detached nodes get a stable synthetic key.
        let location = location.unwrap_or_else(|| format!("#{}", idx.index()));
        self.by_location.insert(location, idx);
        self.by_name.entry(name.clone()).or_default().insert(idx);
        if let Some(version) = version {
            self.by_name_version
                .insert(format!("{name}@{version}"), idx);
        }
    }

    pub(crate) fn remove(
        &mut self,
        location: &str,
        name: &UniCase<String>,
        version: Option<&terra_semver::Version>,
        idx: NodeIndex,
    ) {
        self.by_location.shift_remove(location);
        if let Some(set) = self.by_name.get_mut(name) {
            set.remove(&idx);
            if set.is_empty() {
                self.by_name.remove(name);
            }
        }
        if let Some(version) = version {
            self.by_name_version.remove(&format!("{name}@{version}"));
        }
    }

    pub(crate) fn clear(&mut self) {
        self.by_location.clear();
        self.by_name.clear();
        self.by_name_version.clear();
    }

    pub fn get_by_location(&self, location: &str) -> Option<NodeIndex> {
        self.by_location.get(location).copied()
    }

    pub fn get_by_name(&self, name: &str) -> impl Iterator<Item = NodeIndex> + '_ {
        self.by_name
            .get(&UniCase::new(name.to_string()))
            .into_iter()
            .flatten()
            .copied()
    }

    pub fn get_by_name_version(&self, name: &str, version: &str) -> Option<NodeIndex> {
        self.by_name_version
            .get(&format!("{name}@{version}"))
            .copied()
    }

    pub fn locations(&self) -> impl Iterator<Item = &str> {
        self.by_location.keys().map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, NodeIndex)> {
        self.by_location.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.by_location.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_location.is_empty()
    }
}
