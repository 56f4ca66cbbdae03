use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use petgraph::stable_graph::NodeIndex;
use terra_semver::Version;
use unicase::UniCase;

use crate::edge::Requested;
use crate::graph::Graph;
use crate::node::Node;

/// The verdict for placing a candidate package at one tree position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CanPlace {
    /// The slot is free and nothing at or below the target objects.
    Ok,
    /// The target already holds this exact version; reuse it.
    Keep(NodeIndex),
    /// The target holds an older version the candidate can supersede.
    Replace(NodeIndex),
    /// Placing here would break a constraint.
    Conflict(ConflictSource),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ConflictSource {
    /// The target's existing child of the same name is incompatible.
    ExistingChild(NodeIndex),
    /// The target's own outgoing edge on this name rejects the candidate.
    OwnEdge(NodeIndex),
    /// A descendant's edge would start resolving to the candidate and
    /// rejects it.
    DescendantEdge(NodeIndex),
}

impl ConflictSource {
    pub(crate) fn node(&self) -> NodeIndex {
        match self {
            ConflictSource::ExistingChild(idx)
            | ConflictSource::OwnEdge(idx)
            | ConflictSource::DescendantEdge(idx) => *idx,
        }
    }
}

/// Decides whether `name@version` (requested through `requested`) can live
/// as a child of `target`.
pub(crate) fn can_place(
    graph: &Graph,
    target: NodeIndex,
    name: &UniCase<String>,
    version: &Version,
    requested: &Requested,
) -> CanPlace {
    if let Some(&existing) = graph[target].children.get(name) {
        let existing_version = graph[existing].version.clone();
        if existing_version.as_ref() == Some(version) {
            return CanPlace::Keep(existing);
        }
        if satisfied(requested, existing_version.as_ref()) {
            // The existing child already answers this request. A strictly
            // newer candidate may supersede it, but only if every edge
            // currently resolving here survives the swap; otherwise the
            // shared copy stays.
            let newer = existing_version
                .as_ref()
                .map(|existing_version| version > existing_version)
                .unwrap_or(false);
            if newer && !replacement_breaks_dependents(graph, existing, version) {
                return CanPlace::Replace(existing);
            }
            return CanPlace::Keep(existing);
        }
        return CanPlace::Conflict(ConflictSource::ExistingChild(existing));
    }

    // The target's own requirement on this name gets a say first.
    if let Some(edge) = graph[target].edges_out.get(name) {
        if !edge.satisfied_by(Some(version)) {
            return CanPlace::Conflict(ConflictSource::OwnEdge(target));
        }
    }

    // Any descendant that would start resolving this name to the new child
    // must be able to live with it. Subtrees shadowed by their own child of
    // this name never resolve up to the target, so they're skipped
    // wholesale.
    let mut stack = graph[target]
        .children
        .values()
        .rev()
        .copied()
        .collect::<Vec<_>>();
    while let Some(descendant) = stack.pop() {
        let node = &graph[descendant];
        if node.children.contains_key(name) {
            continue;
        }
        if let Some(edge) = node.edges_out.get(name) {
            if !edge.satisfied_by(Some(version)) {
                return CanPlace::Conflict(ConflictSource::DescendantEdge(descendant));
            }
        }
        stack.extend(node.children.values().rev().copied());
    }

    CanPlace::Ok
}

fn satisfied(requested: &Requested, version: Option<&Version>) -> bool {
    match requested {
        Requested::Tag(_) | Requested::Remote(_) => true,
        Requested::Version(wanted) => version == Some(wanted),
        Requested::Range(range) => version.map(|v| range.satisfies(v)).unwrap_or(false),
        Requested::Unparseable(raw) => {
            version.map(|v| v.to_string() == *raw).unwrap_or(false)
        }
    }
}

/// Would swapping `existing` for `version` invalidate any of the edges
/// currently resolving to it?
fn replacement_breaks_dependents(graph: &Graph, existing: NodeIndex, version: &Version) -> bool {
    graph.edges_in(existing).into_iter().any(|(from, name)| {
        graph[from]
            .edges_out
            .get(&name)
            .map(|edge| !edge.satisfied_by(Some(version)))
            .unwrap_or(false)
    })
}

/// Walks from the requesting node up through its ancestors looking for the
/// shallowest position that will take the candidate. `Keep` wins
/// immediately; a conflict past an already-found valid position stops the
/// walk.
pub(crate) fn find_placement(
    graph: &Graph,
    start: NodeIndex,
    name: &UniCase<String>,
    version: &Version,
    requested: &Requested,
) -> Result<(NodeIndex, CanPlace), ConflictSource> {
    let mut best: Option<(NodeIndex, CanPlace)> = None;
    let mut deepest_conflict: Option<ConflictSource> = None;
    let mut current = Some(start);
    while let Some(target) = current {
        match can_place(graph, target, name, version, requested) {
            CanPlace::Keep(existing) => return Ok((target, CanPlace::Keep(existing))),
            decision @ (CanPlace::Ok | CanPlace::Replace(_)) => {
                best = Some((target, decision));
            }
            CanPlace::Conflict(source) => {
                if deepest_conflict.is_none() {
                    deepest_conflict = Some(source);
                }
                if best.is_some() {
                    break;
                }
            }
        }
        current = graph[target].parent;
    }
    match best {
        Some(found) => Ok(found),
        None => Err(deepest_conflict.expect(
            "walk visited at least the start node, so a missing best implies a conflict",
        )),
    }
}

/// The outcome of executing a placement.
pub(crate) struct PlacedDep {
    pub(crate) idx: NodeIndex,
    /// True when a new node entered the tree (`Ok`/`Replace`); false for
    /// `Keep`.
    pub(crate) fresh: bool,
    /// Edges that resolved into a replaced subtree and were reloaded; the
    /// caller re-queues the ones that became problems.
    pub(crate) reloaded: Vec<(NodeIndex, UniCase<String>)>,
}

/// Applies a placement decision to the tree.
pub(crate) fn place_dep(
    graph: &mut Graph,
    target: NodeIndex,
    decision: CanPlace,
    node: Node,
) -> PlacedDep {
    match decision {
        CanPlace::Keep(existing) => PlacedDep {
            idx: existing,
            fresh: false,
            reloaded: Vec::new(),
        },
        CanPlace::Ok => {
            let idx = graph.add_node(node);
            graph.add_child(target, idx);
            let location = graph.node_location(idx);
            let (name, version) = {
                let n = &graph[idx];
                (n.name.clone(), n.version.clone())
            };
            graph
                .inventory
                .add(Some(location), &name, version.as_ref(), idx);
            PlacedDep {
                idx,
                fresh: true,
                reloaded: Vec::new(),
            }
        }
        CanPlace::Replace(existing) => {
            // The old node's children get dropped for re-resolution; their
            // dependents' edges are reloaded below once the replacement is
            // in place.
            let mut reloaded = graph.remove_subtree(existing);
            let idx = graph.add_node(node);
            graph.add_child(target, idx);
            let location = graph.node_location(idx);
            let (name, version) = {
                let n = &graph[idx];
                (n.name.clone(), n.version.clone())
            };
            graph
                .inventory
                .add(Some(location), &name, version.as_ref(), idx);
            reloaded.retain(|(from, _)| graph.get(*from).is_some());
            for (from, name) in &reloaded {
                graph.reload_edge(*from, name);
            }
            PlacedDep {
                idx,
                fresh: true,
                reloaded,
            }
        }
        CanPlace::Conflict(_) => {
            unreachable!("conflicts are rejected before placement executes")
        }
    }
}

/// The resolver's work queue: lowest depth first, ties broken by edge
/// name. Pushing a `(location, name, spec)` key that's already enqueued is
/// a no-op; the key frees up again once the entry is popped, because a
/// later REPLACE can put a fresh node at the same location with the same
/// declared dependency, and that edge legitimately needs re-resolving.
#[derive(Debug, Default)]
pub(crate) struct DepsQueue {
    heap: BinaryHeap<Reverse<QueueEntry>>,
    enqueued: HashSet<(String, String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct QueueEntry {
    pub(crate) depth: usize,
    pub(crate) name: UniCase<String>,
    pub(crate) from: NodeIndex,
    key: (String, String, String),
}

impl DepsQueue {
    pub(crate) fn new() -> Self {
        Default::default()
    }

    pub(crate) fn push(&mut self, graph: &Graph, from: NodeIndex, name: &UniCase<String>) {
        let Some(edge) = graph[from].edges_out.get(name) else {
            return;
        };
        let key = (
            graph.node_location(from),
            name.to_string(),
            edge.spec.clone(),
        );
        if !self.enqueued.insert(key.clone()) {
            return;
        }
        self.heap.push(Reverse(QueueEntry {
            depth: graph.depth(from),
            name: name.clone(),
            from,
            key,
        }));
    }

    pub(crate) fn pop(&mut self) -> Option<QueueEntry> {
        let entry = self.heap.pop().map(|entry| entry.0)?;
        self.enqueued.remove(&entry.key);
        Some(entry)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// A snapshot of queued entries, for packument prefetching.
    pub(crate) fn pending(&self) -> Vec<QueueEntry> {
        self.heap.iter().map(|entry| entry.0.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{DepType, Edge};
    use crate::node::Node;
    use pretty_assertions::assert_eq;
    use terra_common::Manifest;

    fn manifest(name: &str, version: &str, deps: &[(&str, &str)]) -> Manifest {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "version": version,
            "dependencies": deps
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<std::collections::BTreeMap<_, _>>(),
        }))
        .unwrap()
    }

    fn uni(name: &str) -> UniCase<String> {
        UniCase::new(name.to_string())
    }

    fn v(version: &str) -> Version {
        version.parse().unwrap()
    }

    /// root (deps a@1.x, b@1.x) with children a@1.0.0 and b@1.0.0, where b
    /// depends on a@^1.0.0.
    fn fixture() -> Graph {
        let mut graph = Graph::new(Node::new_root(manifest(
            "root",
            "1.0.0",
            &[("a", "1.x"), ("b", "1.x")],
        )));
        let root = graph.root();
        graph.build_edges(root);

        let a = graph.add_node(Node::new("a", manifest("a", "1.0.0", &[])));
        graph.add_child(root, a);
        let b = graph.add_node(Node::new(
            "b",
            manifest("b", "1.0.0", &[("a", "^1.0.0")]),
        ));
        graph.add_child(root, b);
        graph.build_edges(b);
        graph.reload_edges(root);
        graph
    }

    fn requested(spec: &str) -> Requested {
        let edge = Edge::new("x", spec, DepType::Prod);
        edge.requested.clone()
    }

    #[test]
    fn same_version_keeps() {
        let graph = fixture();
        let root = graph.root();
        let decision = can_place(&graph, root, &uni("a"), &v("1.0.0"), &requested("1.x"));
        assert!(matches!(decision, CanPlace::Keep(_)));
    }

    #[test]
    fn satisfying_older_candidate_keeps_existing() {
        // The existing a@1.0.0 satisfies the request and the candidate
        // isn't newer, so the shared copy wins over a replacement.
        let graph = fixture();
        let root = graph.root();
        let decision = can_place(&graph, root, &uni("a"), &v("0.9.0"), &requested("*"));
        assert!(matches!(decision, CanPlace::Keep(_)));
    }

    #[test]
    fn newer_candidate_replaces() {
        let graph = fixture();
        let root = graph.root();
        // b's edge a@^1.0.0 and root's a@1.x both accept 1.2.3.
        let decision = can_place(&graph, root, &uni("a"), &v("1.2.3"), &requested("1.x"));
        assert!(matches!(decision, CanPlace::Replace(_)));
    }

    #[test]
    fn replacement_that_breaks_a_dependent_keeps_instead() {
        let mut graph = fixture();
        let root = graph.root();
        // Pin b's requirement down to exactly 1.0.0.
        let b = graph[root].children[&uni("b")];
        graph[b]
            .edges_out
            .insert(uni("a"), Edge::new("a", "1.0.0", DepType::Prod));
        graph.reload_edge(b, &uni("a"));

        let decision = can_place(&graph, root, &uni("a"), &v("1.2.3"), &requested("1.x"));
        assert!(matches!(decision, CanPlace::Keep(_)));
    }

    #[test]
    fn incompatible_existing_child_conflicts() {
        let graph = fixture();
        let root = graph.root();
        let decision = can_place(&graph, root, &uni("a"), &v("2.0.0"), &requested("2.x"));
        assert!(matches!(
            decision,
            CanPlace::Conflict(ConflictSource::ExistingChild(_))
        ));
    }

    #[test]
    fn own_edge_rejects_candidate() {
        let graph = fixture();
        let root = graph.root();
        // Root has no child c, but say root itself declared c@1.x and the
        // candidate is 2.0.0.
        let mut graph = graph;
        graph[root]
            .edges_out
            .insert(uni("c"), Edge::new("c", "1.x", DepType::Prod));
        let decision = can_place(&graph, root, &uni("c"), &v("2.0.0"), &requested("2.x"));
        assert!(matches!(
            decision,
            CanPlace::Conflict(ConflictSource::OwnEdge(_))
        ));
    }

    #[test]
    fn descendant_edge_rejects_candidate() {
        let graph = fixture();
        let root = graph.root();
        // b depends on a@^1.0.0; placing c is fine, but placing a@2.0.0
        // would break b if root's own a edge didn't already conflict, so
        // test with a fresh name routed through a descendant.
        let mut graph = graph;
        let b = graph[root].children[&uni("b")];
        graph[b]
            .edges_out
            .insert(uni("c"), Edge::new("c", "^1.0.0", DepType::Prod));
        let decision = can_place(&graph, root, &uni("c"), &v("2.0.0"), &requested("*"));
        assert!(matches!(
            decision,
            CanPlace::Conflict(ConflictSource::DescendantEdge(_))
        ));
    }

    #[test]
    fn shadowed_descendants_are_skipped() {
        let mut graph = fixture();
        let root = graph.root();
        let b = graph[root].children[&uni("b")];
        // b gets its own nested c@1.0.0, so b's c edge resolves there and
        // can't object to a top-level c@2.0.0.
        graph[b]
            .edges_out
            .insert(uni("c"), Edge::new("c", "^1.0.0", DepType::Prod));
        let nested = graph.add_node(Node::new("c", manifest("c", "1.0.0", &[])));
        graph.add_child(b, nested);
        graph.reload_edge(b, &uni("c"));

        let decision = can_place(&graph, root, &uni("c"), &v("2.0.0"), &requested("*"));
        assert_eq!(decision, CanPlace::Ok);
    }

    #[test]
    fn find_placement_hoists_to_shallowest_ok() {
        let graph = fixture();
        let root = graph.root();
        let b = graph[root].children[&uni("b")];
        // A new name requested by b can live at the root.
        let placement =
            find_placement(&graph, b, &uni("d"), &v("1.0.0"), &requested("^1.0.0")).unwrap();
        assert_eq!(placement.0, root);
        assert_eq!(placement.1, CanPlace::Ok);
    }

    #[test]
    fn find_placement_nests_on_conflict() {
        let mut graph = fixture();
        let root = graph.root();
        let b = graph[root].children[&uni("b")];
        // b wants a@2.x: the root slot is taken by an incompatible
        // a@1.0.0, so the new copy stays nested under b.
        graph[b]
            .edges_out
            .insert(uni("a"), Edge::new("a", "2.x", DepType::Prod));
        graph.reload_edge(b, &uni("a"));
        let placement =
            find_placement(&graph, b, &uni("a"), &v("2.0.0"), &requested("2.x")).unwrap();
        assert_eq!(placement.0, b);
        assert_eq!(placement.1, CanPlace::Ok);
    }

    #[test]
    fn replace_detaches_old_children_and_reloads_dependents() {
        let mut graph = fixture();
        let root = graph.root();
        let a = graph[root].children[&uni("a")];
        // Give the old a@1.0.0 a nested child to prove the subtree goes.
        let nested = graph.add_node(Node::new("x", manifest("x", "1.0.0", &[])));
        graph.add_child(a, nested);
        graph.reindex();

        let replacement = Node::new("a", manifest("a", "1.2.3", &[]));
        let placed = place_dep(&mut graph, root, CanPlace::Replace(a), replacement);
        assert!(placed.fresh);
        assert!(graph.get(a).is_none());
        assert!(graph.get(nested).is_none());
        let new_a = graph[root].children[&uni("a")];
        assert_eq!(graph[new_a].version(), Some(&v("1.2.3")));
        // Dependent edges got reloaded onto the replacement.
        let b = graph[root].children[&uni("b")];
        assert_eq!(graph[b].edge("a").and_then(|e| e.to()), Some(new_a));
    }

    #[test]
    fn queue_orders_by_depth_then_name() {
        let mut graph = fixture();
        let root = graph.root();
        let b = graph[root].children[&uni("b")];
        graph[b]
            .edges_out
            .insert(uni("z"), Edge::new("z", "1.x", DepType::Prod));
        graph[root]
            .edges_out
            .insert(uni("z"), Edge::new("z", "1.x", DepType::Prod));

        let mut queue = DepsQueue::new();
        queue.push(&graph, b, &uni("z"));
        queue.push(&graph, root, &uni("z"));
        queue.push(&graph, root, &uni("a"));
        // Duplicate key is a no-op.
        queue.push(&graph, root, &uni("a"));

        let order = std::iter::from_fn(|| queue.pop())
            .map(|entry| (entry.depth, entry.name.to_string()))
            .collect::<Vec<_>>();
        assert_eq!(
            order,
            vec![
                (0, "a".to_string()),
                (0, "z".to_string()),
                (1, "z".to_string()),
            ]
        );
    }
}

