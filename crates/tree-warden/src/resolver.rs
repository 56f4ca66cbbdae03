use std::collections::{BTreeSet, VecDeque};

use petgraph::stable_graph::NodeIndex;
use terra_spec::PackageSpec;
use unicase::UniCase;
use xylem::Xylem;

use crate::edge::Requested;
use crate::error::WardenError;
use crate::graph::Graph;
use crate::lockfile::{Lockfile, LockfileNode};
use crate::node::{edge_spec_string, Node};
use crate::placement::{find_placement, place_dep, CanPlace, DepsQueue};
use crate::{PackageProgressHandler, ResolutionAddedHandler};

/// Drives ideal-tree construction: pops problem edges off the depth-ordered
/// queue, resolves them against the registry (or a lockfile pin), and
/// places the results as high in the tree as constraints allow.
pub(crate) struct Resolver<'a> {
    pub(crate) xylem: &'a Xylem,
    pub(crate) graph: Graph,
    pub(crate) concurrency: usize,
    pub(crate) lockfile: Option<Lockfile>,
    pub(crate) on_resolution_added: Option<ResolutionAddedHandler>,
    pub(crate) on_resolve_progress: Option<PackageProgressHandler>,
}

impl<'a> Resolver<'a> {
    pub(crate) async fn run(mut self) -> Result<Graph, WardenError> {
        let root = self.graph.root;
        self.graph.build_edges(root);

        let mut queue = DepsQueue::new();
        for name in self.problem_edge_names(root) {
            self.notify_added();
            queue.push(&self.graph, root, &name);
        }

        while let Some(entry) = queue.pop() {
            if self.graph.get(entry.from).is_none() {
                // The requesting node was dropped by a REPLACE.
                continue;
            }
            // Placements since this entry was queued may have satisfied it.
            self.graph.reload_edge(entry.from, &entry.name);
            let Some(edge) = self.graph[entry.from].edges_out.get(&entry.name) else {
                continue;
            };
            if !edge.is_problem() {
                continue;
            }

            let optional = edge.dep_type.is_optional();
            let spec = edge.spec.clone();
            let registry_name = edge.registry_name().to_string();
            let registry_alias = edge.registry_name.clone();
            let requested = edge.requested.clone();
            let name = entry.name.clone();

            // Fan out fetches for everything queued before resolving this
            // entry; placement decisions then consume a stable snapshot.
            if self.lockfile.is_none() {
                self.prefetch(&queue, &registry_name).await;
            }

            let package = match self
                .resolve_package(entry.from, &name, &spec, &registry_name, registry_alias)
                .await
            {
                Ok(package) => package,
                Err(e) => {
                    if optional {
                        tracing::debug!(
                            "skipping optional dependency {name}@{spec}: {e}"
                        );
                        continue;
                    }
                    return Err(WardenError::ResolveError {
                        name: name.to_string(),
                        spec,
                        source: Box::new(e),
                    });
                }
            };

            let node = Node::from_package(package);
            let version = node
                .version
                .clone()
                .expect("registry-resolved nodes always carry a version");

            let placement = find_placement(&self.graph, entry.from, &name, &version, &requested);
            match placement {
                Err(conflict) => {
                    if optional {
                        tracing::debug!(
                            "skipping optional dependency {name}@{version}: placement conflict"
                        );
                        continue;
                    }
                    let conflicting = &self.graph[conflict.node()];
                    return Err(WardenError::PlacementConflict {
                        name: name.to_string(),
                        version: version.to_string(),
                        spec,
                        conflict_name: conflicting.name().to_string(),
                        conflict_version: conflicting
                            .version()
                            .map(|v| v.to_string())
                            .unwrap_or_else(|| "unknown".into()),
                    });
                }
                Ok((target, decision)) => {
                    let keep = matches!(decision, CanPlace::Keep(_));
                    let placed = place_dep(&mut self.graph, target, decision, node);
                    if placed.fresh {
                        // Edges below the target that resolve this name now
                        // see the new node.
                        self.reload_name_below(target, &name, placed.idx);
                        self.graph.build_edges(placed.idx);
                        for problem in self.problem_edge_names(placed.idx) {
                            self.notify_added();
                            queue.push(&self.graph, placed.idx, &problem);
                        }
                        for (from, reloaded_name) in &placed.reloaded {
                            if self.graph.get(*from).is_none() {
                                continue;
                            }
                            if self.graph[*from]
                                .edges_out
                                .get(reloaded_name)
                                .map(|e| e.is_problem())
                                .unwrap_or(false)
                            {
                                self.notify_added();
                                queue.push(&self.graph, *from, reloaded_name);
                            }
                        }
                    }
                    self.graph.reload_edge(entry.from, &name);
                    if let Some(handler) = &self.on_resolve_progress {
                        let placed_node = &self.graph[placed.idx];
                        handler(&placed_node.debug_id());
                    }
                    if keep {
                        tracing::trace!(
                            "kept existing {} for {name}@{spec}",
                            self.graph[placed.idx].debug_id()
                        );
                    }
                }
            }
        }

        fix_flags(&mut self.graph);
        self.graph.reindex();
        tracing::debug!(
            "resolved ideal tree with {} nodes",
            self.graph.node_count()
        );
        Ok(self.graph)
    }

    /// Warms the packument cache for every queued entry in one bounded
    /// fan-out. Per-name failures are ignored here; they resurface when
    /// the owning entry is processed, where optional-tolerance applies.
    async fn prefetch(&self, queue: &DepsQueue, current: &str) {
        let mut names: BTreeSet<String> = BTreeSet::new();
        names.insert(current.to_string());
        for pending in queue.pending() {
            if self.graph.get(pending.from).is_none() {
                continue;
            }
            let Some(edge) = self.graph[pending.from].edges_out.get(&pending.name) else {
                continue;
            };
            if edge.is_remote() {
                continue;
            }
            names.insert(edge.registry_name().to_string());
        }
        names.retain(|name| !self.xylem.client().has_cached_packument(name));
        if names.len() > 1 {
            let _ = self.xylem.packuments(names, self.concurrency).await;
        }
    }

    fn notify_added(&self) {
        if let Some(handler) = &self.on_resolution_added {
            handler();
        }
    }

    fn problem_edge_names(&self, idx: NodeIndex) -> Vec<UniCase<String>> {
        self.graph[idx]
            .edges_out
            .values()
            .filter(|edge| edge.is_problem())
            .map(|edge| edge.name.clone())
            .collect()
    }

    /// Resolves one request to a concrete package: a satisfying lockfile
    /// pin if one is visible on the edge's resolution path, else the
    /// registry.
    async fn resolve_package(
        &self,
        from: NodeIndex,
        name: &UniCase<String>,
        spec: &str,
        registry_name: &str,
        registry_alias: Option<String>,
    ) -> Result<xylem::Package, WardenError> {
        let wanted: PackageSpec =
            edge_spec_string(name.as_ref(), registry_alias.as_deref(), spec).parse()?;

        if let Some(lockfile) = &self.lockfile {
            if let Some(pinned) =
                pinned_from_lockfile(&self.graph, lockfile, from, name, &wanted)
            {
                tracing::trace!("using lockfile pin for {name}@{spec}");
                return Ok(self.package_from_lock_entry(name, &wanted, &pinned)?);
            }
        }

        let packument = self.xylem.packument(registry_name).await?;
        Ok(self.xylem.resolve_from_packument(&wanted, &packument)?)
    }

    fn package_from_lock_entry(
        &self,
        name: &UniCase<String>,
        wanted: &PackageSpec,
        entry: &LockfileNode,
    ) -> Result<xylem::Package, WardenError> {
        let version = entry
            .version
            .clone()
            .expect("pin candidates are pre-checked for a version");
        let tarball: url::Url = entry
            .resolved
            .as_ref()
            .expect("pin candidates are pre-checked for a resolved URL")
            .parse()
            .map_err(|e: url::ParseError| WardenError::MiscError(e.to_string()))?;
        let integrity = entry
            .integrity
            .as_ref()
            .map(|i| i.parse())
            .transpose()?;
        let registry_name = entry
            .name
            .clone()
            .unwrap_or_else(|| name.to_string());
        let resolution = xylem::PackageResolution::Npm {
            name: registry_name,
            version,
            tarball,
            integrity,
        };
        Ok(self
            .xylem
            .resolve_from(name.as_ref(), wanted.clone(), resolution, entry.to_manifest()))
    }

    /// Re-resolves edges on `name` throughout `target`'s subtree after a
    /// fresh placement there, skipping branches shadowed by their own child
    /// of that name.
    fn reload_name_below(&mut self, target: NodeIndex, name: &UniCase<String>, placed: NodeIndex) {
        if self.graph[target].edges_out.contains_key(name) {
            self.graph.reload_edge(target, name);
        }
        let mut stack = self.graph[target]
            .children
            .values()
            .copied()
            .filter(|&child| child != placed)
            .collect::<Vec<_>>();
        while let Some(descendant) = stack.pop() {
            if self.graph[descendant].children.contains_key(name) {
                continue;
            }
            if self.graph[descendant].edges_out.contains_key(name) {
                self.graph.reload_edge(descendant, name);
            }
            stack.extend(self.graph[descendant].children.values().copied());
        }
    }
}

/// Looks for a lockfile entry that the consuming tools' resolution walk
/// would find for this edge, and that satisfies it. Entries missing a
/// version or resolved URL can't be pinned and fall through to registry
/// resolution.
fn pinned_from_lockfile(
    graph: &Graph,
    lockfile: &Lockfile,
    from: NodeIndex,
    name: &UniCase<String>,
    wanted: &PackageSpec,
) -> Option<LockfileNode> {
    let mut path = graph.node_path(from);
    loop {
        let last_loop = path.is_empty();
        path.push_back(name.clone());
        let location = format!(
            "node_modules/{}",
            path.iter()
                .map(|segment| segment.to_string())
                .collect::<Vec<_>>()
                .join("/node_modules/")
        );
        path.pop_back();
        if let Some(entry) = lockfile.packages.get(&location) {
            let usable = entry.version.is_some() && entry.resolved.is_some();
            if usable && entry_satisfies(entry, wanted) {
                return Some(entry.clone());
            }
            // A visible-but-wrong entry means this edge gets re-resolved.
            return None;
        }
        if last_loop {
            break;
        }
        path.pop_back();
    }
    None
}

fn entry_satisfies(entry: &LockfileNode, wanted: &PackageSpec) -> bool {
    use terra_spec::VersionSpec;
    let Some(version) = &entry.version else {
        return false;
    };
    match wanted.target() {
        PackageSpec::Npm { requested, .. } => match requested {
            None => true,
            Some(VersionSpec::Version(v)) => version == v,
            Some(VersionSpec::Range(range)) => range.satisfies(version),
            Some(VersionSpec::Tag(_)) => false,
        },
        _ => false,
    }
}

/// Recomputes dev/optional/peer/extraneous flags for the whole tree.
///
/// Placement can change which nodes are reachable from which edge types,
/// so this runs as a dedicated pass after the queue drains: a pessimistic
/// reset, a non-dev reachability pass, a dev reachability pass, then peer
/// marking.
pub(crate) fn fix_flags(graph: &mut Graph) {
    let root = graph.root;
    let all = graph.descendants(root);
    for &idx in &all {
        let node = &mut graph[idx];
        node.extraneous = true;
        node.dev = true;
        node.opt = true;
        node.peer = false;
    }

    mark_reachable(graph, false);
    mark_reachable(graph, true);

    for &idx in &all {
        let is_peer = graph[idx]
            .edges_out
            .values()
            .any(|edge| edge.dep_type.is_peer());
        graph[idx].peer = is_peer;
    }
}

/// One reachability pass. `dev_pass` selects which root edges to follow;
/// below the root, all non-dev edges are followed. Optionality ANDs
/// across paths (a node is optional only if every path to it crosses an
/// optional edge), which the revisit-on-improvement queue converges to.
fn mark_reachable(graph: &mut Graph, dev_pass: bool) {
    let root = graph.root;
    let mut queue: VecDeque<(NodeIndex, bool)> = VecDeque::new();
    for edge in graph[root].edges_out.values() {
        if edge.dep_type.is_dev() != dev_pass {
            continue;
        }
        if let Some(to) = edge.to {
            queue.push_back((to, edge.dep_type.is_optional()));
        }
    }
    while let Some((idx, opt)) = queue.pop_front() {
        if graph.get(idx).is_none() {
            continue;
        }
        let mut changed = false;
        {
            let node = &mut graph[idx];
            if node.extraneous {
                node.extraneous = false;
                changed = true;
            }
            if !dev_pass && node.dev {
                node.dev = false;
                changed = true;
            }
            if !opt && node.opt {
                node.opt = false;
                changed = true;
            }
        }
        if !changed {
            continue;
        }
        let next = graph[idx]
            .edges_out
            .values()
            .filter(|edge| !edge.dep_type.is_dev())
            .filter_map(|edge| {
                edge.to
                    .map(|to| (to, opt || edge.dep_type.is_optional()))
            })
            .collect::<Vec<_>>();
        queue.extend(next);
    }
}
