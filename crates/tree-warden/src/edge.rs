use petgraph::stable_graph::{EdgeIndex, NodeIndex};
use terra_semver::{Range, Version};
use terra_spec::{is_tag_name, PackageSpec, VersionSpec};
use unicase::UniCase;

/// Which dependency map an edge came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepType {
    Prod,
    Dev,
    Opt,
    Peer,
    PeerOpt,
}

impl DepType {
    pub fn is_optional(&self) -> bool {
        matches!(self, DepType::Opt | DepType::PeerOpt)
    }

    pub fn is_peer(&self) -> bool {
        matches!(self, DepType::Peer | DepType::PeerOpt)
    }

    pub fn is_dev(&self) -> bool {
        matches!(self, DepType::Dev)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeError {
    /// No node anywhere up the tree answers to this edge's name.
    Missing,
    /// A node answers, but its version doesn't satisfy the request.
    Invalid,
}

/// What an edge's raw spec actually asks for, pre-parsed for validity
/// checks.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Requested {
    Version(Version),
    Range(Range),
    /// A dist-tag name: always satisfied at the edge level; resolution pins
    /// it through the registry's dist-tags.
    Tag(String),
    /// git/url/workspace/dir specs: recorded verbatim, always satisfied.
    Remote(String),
    /// Not a version, range, or tag name: satisfied only by exact string
    /// match against the target's version.
    Unparseable(String),
}

/// A directed dependency relation from one node to (optionally) the node
/// that currently satisfies it.
#[derive(Debug, Clone)]
pub struct Edge {
    pub(crate) name: UniCase<String>,
    /// The canonical spec, sans any aliasing prefix (`^1.0.0`, not
    /// `npm:bar@^1.0.0`).
    pub(crate) spec: String,
    /// Registry name to fetch under, when the edge was aliased.
    pub(crate) registry_name: Option<String>,
    pub(crate) requested: Requested,
    pub(crate) dep_type: DepType,
    pub(crate) to: Option<NodeIndex>,
    pub(crate) graph_edge: Option<EdgeIndex>,
    pub(crate) error: Option<EdgeError>,
}

impl Edge {
    /// Parses a declared dependency (`name`, raw spec string) into an
    /// unresolved edge. `npm:` aliasing is split here: the edge keeps the
    /// declared name for placement and the registry name for fetching.
    pub(crate) fn new(name: impl AsRef<str>, raw_spec: impl AsRef<str>, dep_type: DepType) -> Self {
        let name = name.as_ref();
        let raw = raw_spec.as_ref().trim();
        let raw = if raw.is_empty() { "*" } else { raw };
        let (spec, registry_name, requested) = parse_raw_spec(name, raw);
        Self {
            name: UniCase::new(name.to_string()),
            spec,
            registry_name,
            requested,
            dep_type,
            to: None,
            graph_edge: None,
            error: None,
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_ref()
    }

    pub fn spec(&self) -> &str {
        &self.spec
    }

    pub fn dep_type(&self) -> DepType {
        self.dep_type
    }

    pub fn to(&self) -> Option<NodeIndex> {
        self.to
    }

    pub fn error(&self) -> Option<EdgeError> {
        self.error
    }

    pub fn valid(&self) -> bool {
        self.error.is_none()
    }

    pub fn is_missing(&self) -> bool {
        self.error == Some(EdgeError::Missing)
    }

    /// An edge is a "problem" when the resolver still has work to do on it.
    pub(crate) fn is_problem(&self) -> bool {
        self.error.is_some()
    }

    /// The name to fetch this dependency under from the registry.
    pub(crate) fn registry_name(&self) -> &str {
        self.registry_name.as_deref().unwrap_or(self.name.as_ref())
    }

    /// Whether this edge never needs registry resolution (git/url/etc.).
    pub(crate) fn is_remote(&self) -> bool {
        matches!(self.requested, Requested::Remote(_))
    }

    /// Whether `version` satisfies this edge's spec. Name equality is the
    /// caller's business (resolution only ever walks same-name nodes).
    pub(crate) fn satisfied_by(&self, version: Option<&Version>) -> bool {
        match &self.requested {
            Requested::Tag(_) | Requested::Remote(_) => true,
            Requested::Version(wanted) => version == Some(wanted),
            Requested::Range(range) => version.map(|v| range.satisfies(v)).unwrap_or(false),
            Requested::Unparseable(raw) => version
                .map(|v| v.to_string() == *raw)
                .unwrap_or(false),
        }
    }
}

fn parse_raw_spec(name: &str, raw: &str) -> (String, Option<String>, Requested) {
    match format!("{name}@{raw}").parse::<PackageSpec>() {
        Ok(PackageSpec::Alias { spec, .. }) => match *spec {
            PackageSpec::Npm {
                name: registry_name,
                requested,
                ..
            } => {
                let spec_str = requested
                    .as_ref()
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "*".to_string());
                let requested = requested
                    .map(version_spec_to_requested)
                    .unwrap_or_else(|| Requested::Range(Range::any()));
                (spec_str, Some(registry_name), requested)
            }
            // The parser only aliases to npm targets.
            _ => (raw.to_string(), None, Requested::Unparseable(raw.into())),
        },
        Ok(PackageSpec::Npm { requested, .. }) => {
            let requested = requested
                .map(version_spec_to_requested)
                .unwrap_or_else(|| Requested::Range(Range::any()));
            (raw.to_string(), None, requested)
        }
        Ok(
            PackageSpec::Workspace { .. }
            | PackageSpec::Git { .. }
            | PackageSpec::Url { .. }
            | PackageSpec::Dir { .. },
        ) => (raw.to_string(), None, Requested::Remote(raw.into())),
        Err(_) => (raw.to_string(), None, Requested::Unparseable(raw.into())),
    }
}

fn version_spec_to_requested(spec: VersionSpec) -> Requested {
    match spec {
        VersionSpec::Version(v) => Requested::Version(v),
        VersionSpec::Range(r) => Requested::Range(r),
        VersionSpec::Tag(t) => {
            if is_tag_name(&t) {
                Requested::Tag(t)
            } else {
                Requested::Unparseable(t)
            }
        }
    }
}

/// Weight for the mirror edges kept in the petgraph graph for resolved
/// relations. Used for incoming-edge queries and debug rendering.
#[derive(Debug, Clone)]
pub(crate) struct DepRequest {
    pub(crate) name: UniCase<String>,
    pub(crate) dep_type: DepType,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn plain_range_edge() {
        let edge = Edge::new("a", "^1.0.0", DepType::Prod);
        assert_eq!(edge.spec(), "^1.0.0");
        assert_eq!(edge.registry_name(), "a");
        assert!(edge.satisfied_by(Some(&v("1.5.0"))));
        assert!(!edge.satisfied_by(Some(&v("2.0.0"))));
    }

    #[test]
    fn empty_spec_is_wildcard() {
        let edge = Edge::new("a", "", DepType::Prod);
        assert_eq!(edge.spec(), "*");
        assert!(edge.satisfied_by(Some(&v("0.0.1-alpha"))));
    }

    #[test]
    fn alias_splits_registry_name() {
        let edge = Edge::new("foo", "npm:@scope/bar@^1", DepType::Prod);
        assert_eq!(edge.name(), "foo");
        assert_eq!(edge.registry_name(), "@scope/bar");
        assert_eq!(edge.spec(), ">=1.0.0 <2.0.0-0");
        assert!(edge.satisfied_by(Some(&v("1.2.0"))));
    }

    #[test]
    fn alias_without_version_tail_defaults_to_wildcard() {
        let edge = Edge::new("foo", "npm:bar", DepType::Prod);
        assert_eq!(edge.registry_name(), "bar");
        assert_eq!(edge.spec(), "*");
    }

    #[test]
    fn tags_are_always_satisfied() {
        let edge = Edge::new("a", "latest", DepType::Prod);
        assert!(edge.satisfied_by(Some(&v("42.0.0"))));
    }

    #[test]
    fn git_specs_are_always_satisfied() {
        let edge = Edge::new("a", "git+https://github.com/x/y.git", DepType::Prod);
        assert!(edge.is_remote());
        assert!(edge.satisfied_by(None));
    }

    #[test]
    fn malformed_range_falls_back_to_exact_string_match() {
        let edge = Edge::new("a", "1.2.junk", DepType::Prod);
        assert!(!edge.satisfied_by(Some(&v("1.2.0"))));
        let edge = Edge::new("a", "not a spec at all!!", DepType::Prod);
        assert!(!edge.satisfied_by(Some(&v("1.0.0"))));
    }
}
