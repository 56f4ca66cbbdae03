use std::collections::{HashSet, VecDeque};
use std::ops::{Index, IndexMut};

use petgraph::dot::Dot;
use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use terra_semver::Range;
use unicase::UniCase;

use crate::edge::{DepRequest, EdgeError};
use crate::inventory::Inventory;
use crate::node::Node;

/// The dependency tree: a stable-index arena of [`Node`]s. Parent/child
/// links model the filesystem hierarchy; mirror graph edges model resolved
/// dependency relations (for incoming-edge queries), while the
/// authoritative [`crate::Edge`] structs, including unresolved ones, live
/// in each node's `edges_out` map.
#[derive(Debug, Default)]
pub struct Graph {
    pub(crate) root: NodeIndex,
    pub(crate) inner: StableGraph<Node, DepRequest>,
    pub(crate) inventory: Inventory,
}

impl Index<NodeIndex> for Graph {
    type Output = Node;

    fn index(&self, index: NodeIndex) -> &Self::Output {
        &self.inner[index]
    }
}

impl IndexMut<NodeIndex> for Graph {
    fn index_mut(&mut self, index: NodeIndex) -> &mut Self::Output {
        &mut self.inner[index]
    }
}

impl Graph {
    pub(crate) fn new(root: Node) -> Self {
        let mut graph = Graph::default();
        let root_idx = graph.inner.add_node(root);
        graph.root = root_idx;
        graph.inner[root_idx].idx = root_idx;
        graph
    }

    pub fn root(&self) -> NodeIndex {
        self.root
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    pub fn get(&self, idx: NodeIndex) -> Option<&Node> {
        self.inner.node_weight(idx)
    }

    pub(crate) fn add_node(&mut self, node: Node) -> NodeIndex {
        let idx = self.inner.add_node(node);
        self.inner[idx].idx = idx;
        idx
    }

    /// Installs `child` under `parent` in the filesystem hierarchy. The
    /// slot must be free.
    pub(crate) fn add_child(&mut self, parent: NodeIndex, child: NodeIndex) {
        let name = self.inner[child].name.clone();
        debug_assert!(
            !self.inner[parent].children.contains_key(&name),
            "placement must target a free slot"
        );
        self.inner[child].parent = Some(parent);
        self.inner[parent].children.insert(name, child);
    }

    /// The chain of names from (and excluding) the root down to `idx`.
    pub(crate) fn node_path(&self, idx: NodeIndex) -> VecDeque<UniCase<String>> {
        let mut path = VecDeque::new();
        let mut current = Some(idx);
        while let Some(curr) = current {
            if curr == self.root {
                break;
            }
            let node = &self.inner[curr];
            path.push_front(node.name.clone());
            current = node.parent;
        }
        path
    }

    /// Lockfile-style location: `""` for the root,
    /// `node_modules/a/node_modules/@s/b` below it.
    pub fn node_location(&self, idx: NodeIndex) -> String {
        let path = self.node_path(idx);
        if path.is_empty() {
            String::new()
        } else {
            format!(
                "node_modules/{}",
                path.iter()
                    .map(|name| name.to_string())
                    .collect::<Vec<_>>()
                    .join("/node_modules/")
            )
        }
    }

    pub fn node_at_location(&self, location: &str) -> Option<NodeIndex> {
        if location.is_empty() {
            return Some(self.root);
        }
        let rest = location.strip_prefix("node_modules/")?;
        let mut current = self.root;
        for segment in rest.split("/node_modules/") {
            let key = UniCase::new(segment.to_string());
            current = *self.inner[current].children.get(&key)?;
        }
        Some(current)
    }

    pub(crate) fn depth(&self, idx: NodeIndex) -> usize {
        self.node_path(idx).len()
    }

    /// Whether `ancestor` is on `node`'s parent chain (or is the node
    /// itself).
    pub(crate) fn is_ancestor(&self, ancestor: NodeIndex, node: NodeIndex) -> bool {
        let mut current = Some(node);
        while let Some(curr) = current {
            if curr == ancestor {
                return true;
            }
            current = self.inner[curr].parent;
        }
        false
    }

    /// Walk-up name resolution: own child if present, else recurse into the
    /// parent, stopping at the root. This is the resolution rule consuming
    /// tools use, so edge validity is defined in terms of it.
    pub(crate) fn find_by_name(
        &self,
        from: NodeIndex,
        name: &UniCase<String>,
    ) -> Option<NodeIndex> {
        let mut current = Some(from);
        while let Some(curr) = current {
            let node = &self.inner[curr];
            if let Some(found) = node.children.get(name) {
                return Some(*found);
            }
            current = node.parent;
        }
        None
    }

    /// All descendants of `idx` in the filesystem hierarchy, depth-first,
    /// children in name order. Deterministic.
    pub(crate) fn descendants(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut out = Vec::new();
        let mut stack = self.inner[idx]
            .children
            .values()
            .rev()
            .copied()
            .collect::<Vec<_>>();
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.inner[current].children.values().rev().copied());
        }
        out
    }

    /// Builds (or rebuilds) a node's edge set from its manifest and
    /// resolves each edge.
    pub(crate) fn build_edges(&mut self, idx: NodeIndex) {
        let edges = self.inner[idx].build_edges();
        // Drop mirror edges of any previous edge set first.
        let old_names = self.inner[idx]
            .edges_out
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        for name in old_names {
            self.unhook_mirror_edge(idx, &name);
        }
        self.inner[idx].edges_out.clear();
        for edge in edges {
            let name = edge.name.clone();
            self.inner[idx].edges_out.insert(name.clone(), edge);
            self.reload_edge(idx, &name);
        }
    }

    /// Re-computes one edge's target by walking up the tree from its
    /// from-node, per the resolution rule. Optional edges with no target
    /// are valid; everything else gets `Missing`/`Invalid` as appropriate.
    pub(crate) fn reload_edge(&mut self, from: NodeIndex, name: &UniCase<String>) {
        self.unhook_mirror_edge(from, name);
        let Some(edge) = self.inner[from].edges_out.get(name) else {
            return;
        };
        let optional = edge.dep_type.is_optional();
        let remote = edge.is_remote();
        let dep_type = edge.dep_type;

        let target = self.find_by_name(from, name);
        let (to, graph_edge, error) = match target {
            None => {
                if optional || remote {
                    (None, None, None)
                } else {
                    (None, None, Some(EdgeError::Missing))
                }
            }
            Some(found) => {
                let satisfied = {
                    let found_node = &self.inner[found];
                    self.inner[from].edges_out[name].satisfied_by(found_node.version.as_ref())
                };
                let mirror = self.inner.add_edge(
                    from,
                    found,
                    DepRequest {
                        name: name.clone(),
                        dep_type,
                    },
                );
                let error = if satisfied {
                    None
                } else {
                    Some(EdgeError::Invalid)
                };
                (Some(found), Some(mirror), error)
            }
        };
        let edge = self
            .inner[from]
            .edges_out
            .get_mut(name)
            .expect("edge existed above");
        edge.to = to;
        edge.graph_edge = graph_edge;
        edge.error = error;
    }

    /// Reloads every edge of a node.
    pub(crate) fn reload_edges(&mut self, idx: NodeIndex) {
        let names = self.inner[idx]
            .edges_out
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        for name in names {
            self.reload_edge(idx, &name);
        }
    }

    /// Drops the mirror graph-edge for `(from, name)` if it still exists
    /// and still belongs to that edge. Stale indices (e.g. after a subtree
    /// removal) are cleared without touching the graph, since StableGraph
    /// recycles freed indices.
    fn unhook_mirror_edge(&mut self, from: NodeIndex, name: &UniCase<String>) {
        let Some(edge) = self.inner[from].edges_out.get(name) else {
            return;
        };
        let Some(mirror) = edge.graph_edge else {
            return;
        };
        let still_ours = self
            .inner
            .edge_endpoints(mirror)
            .map(|(source, _)| source == from)
            .unwrap_or(false)
            && self
                .inner
                .edge_weight(mirror)
                .map(|w| &w.name == name)
                .unwrap_or(false);
        if still_ours {
            self.inner.remove_edge(mirror);
        }
        let edge = self
            .inner[from]
            .edges_out
            .get_mut(name)
            .expect("edge existed above");
        edge.graph_edge = None;
        edge.to = None;
    }

    /// Incoming resolved edges of a node: `(from, edge name)` pairs, in
    /// deterministic order.
    pub(crate) fn edges_in(&self, idx: NodeIndex) -> Vec<(NodeIndex, UniCase<String>)> {
        let mut incoming = self
            .inner
            .edges_directed(idx, Direction::Incoming)
            .map(|edge| (edge.source(), edge.weight().name.clone()))
            .collect::<Vec<_>>();
        incoming.sort();
        incoming
    }

    /// Removes a node and its whole filesystem subtree. Returns the
    /// `(from, name)` keys of resolved edges that pointed into the removed
    /// subtree from outside it; callers must reload those once replacement
    /// placement is done.
    pub(crate) fn remove_subtree(
        &mut self,
        idx: NodeIndex,
    ) -> Vec<(NodeIndex, UniCase<String>)> {
        let mut removed = self.descendants(idx);
        removed.push(idx);
        let removed_set: HashSet<NodeIndex> = removed.iter().copied().collect();

        let mut external = Vec::new();
        for &node in &removed {
            for (from, name) in self.edges_in(node) {
                if !removed_set.contains(&from) {
                    external.push((from, name));
                }
            }
        }
        external.sort();
        external.dedup();

        if let Some(parent) = self.inner[idx].parent {
            let name = self.inner[idx].name.clone();
            self.inner[parent].children.remove(&name);
        }
        for &node in &removed {
            let location = self.node_location(node);
            let (name, version) = {
                let n = &self.inner[node];
                (n.name.clone(), n.version.clone())
            };
            self.inventory
                .remove(&location, &name, version.as_ref(), node);
        }
        for node in removed {
            self.inner.remove_node(node);
        }
        // The mirror edges died with their targets; clear the stale state
        // on the surviving from-nodes before any index gets recycled.
        for (from, name) in &external {
            if let Some(edge) = self.inner[*from].edges_out.get_mut(name) {
                edge.graph_edge = None;
                edge.to = None;
            }
        }
        external
    }

    /// All nodes whose name matches and whose version satisfies `range`.
    pub fn query(&self, name: &str, range: &Range) -> Vec<NodeIndex> {
        self.inventory
            .get_by_name(name)
            .filter(|idx| self.inner[*idx].satisfies_range(range))
            .collect()
    }

    /// Rebuilds the inventory from the current tree shape.
    pub(crate) fn reindex(&mut self) {
        self.inventory.clear();
        let mut nodes = vec![self.root];
        nodes.extend(self.descendants(self.root));
        for idx in nodes {
            let location = self.node_location(idx);
            let (name, version) = {
                let node = &self.inner[idx];
                (node.name.clone(), node.version.clone())
            };
            self.inventory
                .add(Some(location), &name, version.as_ref(), idx);
        }
    }

    /// Graphviz rendering of the resolved dependency relation, for
    /// debugging.
    pub fn render(&self) -> String {
        let labeled = self.inner.map(
            |_, node| node.debug_id(),
            |_, edge| format!("{} ({:?})", edge.name, edge.dep_type),
        );
        format!("{:?}", Dot::new(&labeled))
    }
}
