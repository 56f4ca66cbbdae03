use indexmap::IndexMap;
use terra_semver::Version;

use crate::error::WardenError;
use crate::lockfile::{parent_location, Lockfile, LockfileFormat, LockfileNode};

/// Yarn-side state carried on a canonical lockfile so yarn input can be
/// written back out: the `__metadata` block and any entries with non-`npm`
/// resolution protocols (workspace:, patch:, portal:), which are preserved
/// opaquely and excluded from placement.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct YarnMetadata {
    pub(crate) version: u64,
    pub(crate) cache_key: String,
    pub(crate) opaque_entries: Vec<OpaqueEntry>,
}

impl Default for YarnMetadata {
    fn default() -> Self {
        Self {
            version: 6,
            cache_key: "8".into(),
            opaque_entries: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct OpaqueEntry {
    pub(crate) key: String,
    pub(crate) lines: Vec<String>,
}

/// One parsed yarn entry, before canonicalization.
#[derive(Debug, Default, Clone)]
struct YarnEntry {
    descriptors: Vec<(String, String)>,
    name: String,
    version: Option<Version>,
    protocol: String,
    dependencies: IndexMap<String, String>,
    peer_dependencies: IndexMap<String, String>,
    checksum: Option<String>,
}

pub(crate) fn from_yarn(input: &str) -> Result<Lockfile, WardenError> {
    let blocks = parse_blocks(input)?;

    let mut metadata = YarnMetadata::default();
    let mut entries: Vec<YarnEntry> = Vec::new();

    for block in blocks {
        if block.key == "__metadata" {
            if let Some(version) = block.scalar("version").and_then(|v| v.parse().ok()) {
                metadata.version = version;
            }
            if let Some(cache_key) = block.scalar("cacheKey") {
                metadata.cache_key = cache_key;
            }
            continue;
        }
        let resolution = block.scalar("resolution").unwrap_or_default();
        let (name, protocol, value) = split_resolution(&resolution);
        if protocol != "npm" {
            metadata.opaque_entries.push(OpaqueEntry {
                key: block.key.clone(),
                lines: block.raw_lines.clone(),
            });
            // Workspace entries still seed the root of the hoisted tree.
            if protocol == "workspace" {
                entries.push(YarnEntry {
                    descriptors: parse_descriptors(&block.key),
                    name,
                    version: block.scalar("version").and_then(|v| v.parse().ok()),
                    protocol: "workspace".into(),
                    dependencies: block.nested("dependencies"),
                    peer_dependencies: block.nested("peerDependencies"),
                    checksum: None,
                });
            }
            continue;
        }
        let version = value.parse().ok();
        entries.push(YarnEntry {
            descriptors: parse_descriptors(&block.key),
            name,
            version,
            protocol,
            dependencies: block.nested("dependencies"),
            peer_dependencies: block.nested("peerDependencies"),
            checksum: block.scalar("checksum"),
        });
    }

    Ok(canonicalize(entries, metadata))
}

/// Deterministic hoisting: BFS from the root's dependency maps, placing
/// each resolved entry at `node_modules/<name>` when that slot is free,
/// else nesting it under its dependent's location.
fn canonicalize(entries: Vec<YarnEntry>, metadata: YarnMetadata) -> Lockfile {
    // Descriptor -> entry index, for request resolution.
    let mut by_descriptor: IndexMap<(String, String), usize> = IndexMap::new();
    for (i, entry) in entries.iter().enumerate() {
        for descriptor in &entry.descriptors {
            by_descriptor.insert(descriptor.clone(), i);
        }
    }

    let root = entries.iter().find(|e| e.protocol == "workspace");
    let mut packages: IndexMap<String, LockfileNode> = IndexMap::new();
    let root_name = root.map(|r| r.name.clone()).filter(|n| !n.is_empty());
    packages.insert(
        String::new(),
        LockfileNode {
            name: root_name.clone(),
            version: root.and_then(|r| r.version.clone()),
            dependencies: root.map(|r| r.dependencies.clone()).unwrap_or_default(),
            peer_dependencies: root
                .map(|r| r.peer_dependencies.clone())
                .unwrap_or_default(),
            ..Default::default()
        },
    );

    let mut queue: std::collections::VecDeque<(String, String, String)> = root
        .map(|r| {
            r.dependencies
                .iter()
                .map(|(name, range)| (name.clone(), range.clone(), String::new()))
                .collect()
        })
        .unwrap_or_default();

    while let Some((name, range, dependent_location)) = queue.pop_front() {
        let stripped = range.strip_prefix("npm:").unwrap_or(&range).to_string();
        let Some(&entry_idx) = by_descriptor
            .get(&(name.clone(), range.clone()))
            .or_else(|| by_descriptor.get(&(name.clone(), stripped)))
        else {
            continue;
        };
        let entry = &entries[entry_idx];
        if entry.protocol != "npm" {
            continue;
        }

        let top_location = format!("node_modules/{name}");
        let nested_location = if dependent_location.is_empty() {
            top_location.clone()
        } else {
            format!("{dependent_location}/node_modules/{name}")
        };
        let location = match packages.get(&top_location) {
            None => top_location,
            Some(existing) if existing.version == entry.version => continue,
            Some(_) => {
                if packages.contains_key(&nested_location) {
                    continue;
                }
                nested_location
            }
        };

        packages.insert(
            location.clone(),
            LockfileNode {
                version: entry.version.clone(),
                dependencies: entry.dependencies.clone(),
                peer_dependencies: entry.peer_dependencies.clone(),
                checksum: entry.checksum.clone(),
                ..Default::default()
            },
        );
        for (dep_name, dep_range) in &entry.dependencies {
            queue.push_back((dep_name.clone(), dep_range.clone(), location.clone()));
        }
    }

    let root_version = packages[""].version.clone();
    Lockfile {
        name: root_name,
        version: root_version,
        lockfile_version: 3,
        format: LockfileFormat::YarnBerry,
        packages,
        yarn: Some(metadata),
    }
}

pub(crate) fn to_yarn(lockfile: &Lockfile) -> String {
    let metadata = lockfile.yarn.clone().unwrap_or_default();

    // Rebuild per-(name, version) entries from canonical locations,
    // gathering descriptors from every dependent's request that resolves
    // there by the walk-up rule.
    #[derive(Default)]
    struct OutEntry {
        version: Option<Version>,
        dependencies: IndexMap<String, String>,
        peer_dependencies: IndexMap<String, String>,
        checksum: Option<String>,
        descriptors: Vec<String>,
    }
    let mut out: IndexMap<String, OutEntry> = IndexMap::new();

    for (location, node) in &lockfile.packages {
        if location.is_empty() {
            continue;
        }
        let Some(name) = node.name_at(location) else {
            continue;
        };
        let key = format!(
            "{name}@{}",
            node.version
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_default()
        );
        let slot = out.entry(key).or_default();
        slot.version = node.version.clone();
        slot.dependencies = node.dependencies.clone();
        slot.peer_dependencies = node.peer_dependencies.clone();
        if slot.checksum.is_none() {
            slot.checksum = node.checksum.clone();
        }
    }

    // Requests: every entry's dependency map, resolved by walking up.
    for (location, node) in &lockfile.packages {
        for (dep_name, range) in &node.dependencies {
            let Some(target_location) = resolve_location(lockfile, location, dep_name) else {
                continue;
            };
            let Some(target) = lockfile.packages.get(&target_location) else {
                continue;
            };
            let key = format!(
                "{dep_name}@{}",
                target
                    .version
                    .as_ref()
                    .map(|v| v.to_string())
                    .unwrap_or_default()
            );
            let range = range.strip_prefix("npm:").unwrap_or(range);
            let descriptor = format!("{dep_name}@npm:{range}");
            if let Some(slot) = out.get_mut(&key) {
                if !slot.descriptors.contains(&descriptor) {
                    slot.descriptors.push(descriptor);
                }
            }
        }
    }

    let mut rendered: Vec<(String, String)> = Vec::new();
    for (key, entry) in &out {
        let mut descriptors = entry.descriptors.clone();
        if descriptors.is_empty() {
            let name = key.rsplit_once('@').map(|(n, _)| n).unwrap_or(key);
            descriptors.push(format!(
                "{name}@npm:{}",
                entry
                    .version
                    .as_ref()
                    .map(|v| v.to_string())
                    .unwrap_or_default()
            ));
        }
        descriptors.sort();
        let sort_key = descriptors.join(", ");
        let mut block = String::new();
        block.push_str(&format!(
            "{}:\n",
            descriptors
                .iter()
                .map(|d| quote(d))
                .collect::<Vec<_>>()
                .join(", ")
        ));
        if let Some(version) = &entry.version {
            block.push_str(&format!("  version: {}\n", quote(&version.to_string())));
        }
        let name = key.rsplit_once('@').map(|(n, _)| n).unwrap_or(key);
        let resolution = format!(
            "{name}@npm:{}",
            entry
                .version
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_default()
        );
        block.push_str(&format!("  resolution: {}\n", quote(&resolution)));
        if !entry.dependencies.is_empty() {
            block.push_str("  dependencies:\n");
            let mut deps = entry.dependencies.iter().collect::<Vec<_>>();
            deps.sort_by(|a, b| a.0.cmp(b.0));
            for (dep_name, range) in deps {
                let range = range.strip_prefix("npm:").unwrap_or(range);
                block.push_str(&format!(
                    "    {}: {}\n",
                    quote(dep_name),
                    quote(&format!("npm:{range}"))
                ));
            }
        }
        if !entry.peer_dependencies.is_empty() {
            block.push_str("  peerDependencies:\n");
            let mut peers = entry.peer_dependencies.iter().collect::<Vec<_>>();
            peers.sort_by(|a, b| a.0.cmp(b.0));
            for (peer_name, range) in peers {
                block.push_str(&format!(
                    "    {}: {}\n",
                    quote(peer_name),
                    quote(range)
                ));
            }
        }
        if let Some(checksum) = &entry.checksum {
            block.push_str(&format!("  checksum: {}\n", quote(checksum)));
        }
        block.push_str("  languageName: node\n");
        block.push_str("  linkType: hard\n");
        rendered.push((sort_key, block));
    }

    for opaque in &metadata.opaque_entries {
        let mut block = String::new();
        let key = opaque
            .key
            .split(", ")
            .map(quote)
            .collect::<Vec<_>>()
            .join(", ");
        block.push_str(&format!("{key}:\n"));
        for line in &opaque.lines {
            block.push_str(line);
            block.push('\n');
        }
        rendered.push((opaque.key.clone(), block));
    }

    rendered.sort_by(|a, b| a.0.cmp(&b.0));

    let mut output = String::new();
    output.push_str(
        "# This file is generated by running \"yarn install\" inside your project.\n",
    );
    output.push_str("# Manual changes might be lost - proceed with caution!\n\n");
    output.push_str("__metadata:\n");
    output.push_str(&format!("  version: {}\n", metadata.version));
    output.push_str(&format!("  cacheKey: {}\n", metadata.cache_key));
    for (_, block) in rendered {
        output.push('\n');
        output.push_str(&block);
    }
    output
}

/// Walk-up resolution over canonical locations.
fn resolve_location(lockfile: &Lockfile, from: &str, name: &str) -> Option<String> {
    let mut current = Some(from.to_string());
    while let Some(location) = current {
        let candidate = if location.is_empty() {
            format!("node_modules/{name}")
        } else {
            format!("{location}/node_modules/{name}")
        };
        if lockfile.packages.contains_key(&candidate) {
            return Some(candidate);
        }
        current = parent_location(&location);
    }
    None
}

/// `name@protocol:value` → (name, protocol, value), scope-aware.
fn split_resolution(resolution: &str) -> (String, String, String) {
    let at = if let Some(stripped) = resolution.strip_prefix('@') {
        stripped.find('@').map(|i| i + 1)
    } else {
        resolution.find('@')
    };
    let Some(at) = at else {
        return (resolution.to_string(), String::new(), String::new());
    };
    let name = resolution[..at].to_string();
    let rest = &resolution[at + 1..];
    match rest.split_once(':') {
        Some((protocol, value)) => (name, protocol.to_string(), value.to_string()),
        None => (name, "npm".to_string(), rest.to_string()),
    }
}

/// Splits a comma-separated descriptor list into `(name, range)` pairs.
fn parse_descriptors(key: &str) -> Vec<(String, String)> {
    key.split(", ")
        .filter_map(|descriptor| {
            let (name, protocol, value) = split_resolution(descriptor.trim());
            if name.is_empty() {
                return None;
            }
            let range = if protocol == "npm" || protocol.is_empty() {
                value
            } else {
                format!("{protocol}:{value}")
            };
            Some((name, range))
        })
        .collect()
}

/// A raw top-level block: entry key plus its (2-space and 4-space
/// indented) body.
struct Block {
    key: String,
    fields: IndexMap<String, FieldValue>,
    raw_lines: Vec<String>,
}

enum FieldValue {
    Scalar(String),
    Map(IndexMap<String, String>),
}

impl Block {
    fn scalar(&self, key: &str) -> Option<String> {
        match self.fields.get(key) {
            Some(FieldValue::Scalar(s)) => Some(s.clone()),
            _ => None,
        }
    }

    fn nested(&self, key: &str) -> IndexMap<String, String> {
        match self.fields.get(key) {
            Some(FieldValue::Map(map)) => map.clone(),
            _ => IndexMap::new(),
        }
    }
}

fn parse_blocks(input: &str) -> Result<Vec<Block>, WardenError> {
    let mut blocks: Vec<Block> = Vec::new();
    let mut current: Option<Block> = None;
    let mut nested_key: Option<String> = None;

    for (line_idx, raw_line) in input.lines().enumerate() {
        let line_no = line_idx + 1;
        let line = raw_line.trim_end_matches('\r');
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let indent = line.len() - trimmed.len();
        match indent {
            0 => {
                if let Some(block) = current.take() {
                    blocks.push(block);
                }
                let key = line.strip_suffix(':').ok_or_else(|| {
                    WardenError::YarnParseError {
                        line: line_no,
                        message: "expected a `key:` entry header".into(),
                    }
                })?;
                current = Some(Block {
                    key: unquote_list(key),
                    fields: IndexMap::new(),
                    raw_lines: Vec::new(),
                });
                nested_key = None;
            }
            2 => {
                let block = current.as_mut().ok_or_else(|| WardenError::YarnParseError {
                    line: line_no,
                    message: "indented line outside of any entry".into(),
                })?;
                block.raw_lines.push(line.to_string());
                if let Some(key) = trimmed.strip_suffix(':') {
                    // Opens a nested map (dependencies, peerDependencies...).
                    let key = unquote(key.trim());
                    block
                        .fields
                        .insert(key.clone(), FieldValue::Map(IndexMap::new()));
                    nested_key = Some(key);
                } else {
                    let (key, value) =
                        split_key_value(trimmed).ok_or_else(|| WardenError::YarnParseError {
                            line: line_no,
                            message: "expected `key: value`".into(),
                        })?;
                    block.fields.insert(key, FieldValue::Scalar(value));
                    nested_key = None;
                }
            }
            4 => {
                let block = current.as_mut().ok_or_else(|| WardenError::YarnParseError {
                    line: line_no,
                    message: "indented line outside of any entry".into(),
                })?;
                block.raw_lines.push(line.to_string());
                let nested = nested_key.as_ref().ok_or_else(|| {
                    WardenError::YarnParseError {
                        line: line_no,
                        message: "nested value outside of a map field".into(),
                    }
                })?;
                let (key, value) =
                    split_key_value(trimmed).ok_or_else(|| WardenError::YarnParseError {
                        line: line_no,
                        message: "expected `key: value`".into(),
                    })?;
                if let Some(FieldValue::Map(map)) = block.fields.get_mut(nested) {
                    map.insert(key, value);
                }
            }
            _ => {
                return Err(WardenError::YarnParseError {
                    line: line_no,
                    message: format!("unexpected indentation of {indent}"),
                })
            }
        }
    }
    if let Some(block) = current.take() {
        blocks.push(block);
    }
    Ok(blocks)
}

fn split_key_value(line: &str) -> Option<(String, String)> {
    // The key may be quoted and may itself contain colons; scan for the
    // first `: ` outside quotes.
    let bytes = line.as_bytes();
    let mut in_quotes = false;
    for i in 0..bytes.len() {
        match bytes[i] {
            b'"' => in_quotes = !in_quotes,
            b':' if !in_quotes => {
                let key = line[..i].trim();
                let value = line[i + 1..].trim();
                return Some((unquote(key), unquote(value)));
            }
            _ => {}
        }
    }
    None
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        s[1..s.len() - 1].replace("\\\"", "\"").replace("\\\\", "\\")
    } else {
        s.to_string()
    }
}

/// Unquotes each descriptor in a comma-separated entry key.
fn unquote_list(key: &str) -> String {
    key.split(", ")
        .map(|part| unquote(part.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Yarn's SYML quoting rule: quote anything with structural characters, a
/// leading dash, or a leading digit.
fn needs_quotes(s: &str) -> bool {
    if s.is_empty() {
        return true;
    }
    let first = s.chars().next().unwrap();
    if first == '-' || first.is_ascii_digit() {
        return true;
    }
    s.chars()
        .any(|c| ":@/#{}[]|>*&!%'\"".contains(c) || c == ' ' || c == ',')
}

fn quote(s: &str) -> String {
    if needs_quotes(s) {
        format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"# This file is generated by running "yarn install" inside your project.
# Manual changes might be lost - proceed with caution!

__metadata:
  version: 6
  cacheKey: 8

"proj@workspace:.":
  version: 0.0.0-use.local
  resolution: "proj@workspace:."
  dependencies:
    lodash: "npm:^4.17.0"
  languageName: unknown
  linkType: soft

"lodash@npm:^4.17.0":
  version: "4.17.21"
  resolution: "lodash@npm:4.17.21"
  checksum: eb835a2e51d381e561e508ce932ea50a8e5a70f
  languageName: node
  linkType: hard
"#;

    #[test]
    fn parses_entries_and_metadata() {
        let lockfile = Lockfile::from_yarn(SAMPLE).unwrap();
        assert_eq!(lockfile.format, LockfileFormat::YarnBerry);
        let meta = lockfile.yarn.as_ref().unwrap();
        assert_eq!(meta.version, 6);
        assert_eq!(meta.cache_key, "8");

        let lodash = &lockfile.packages["node_modules/lodash"];
        assert_eq!(lodash.version, Some("4.17.21".parse().unwrap()));
        assert_eq!(
            lodash.checksum.as_deref(),
            Some("eb835a2e51d381e561e508ce932ea50a8e5a70f")
        );
    }

    #[test]
    fn workspace_entries_stay_opaque() {
        let lockfile = Lockfile::from_yarn(SAMPLE).unwrap();
        let meta = lockfile.yarn.as_ref().unwrap();
        assert_eq!(meta.opaque_entries.len(), 1);
        assert!(meta.opaque_entries[0].key.contains("workspace:."));
        // The workspace entry seeds the root but is not a placed package.
        assert!(lockfile.packages.contains_key(""));
        assert_eq!(lockfile.packages.len(), 2);
    }

    #[test]
    fn hoisting_nests_on_conflict() {
        let input = r#"
__metadata:
  version: 6
  cacheKey: 8

"proj@workspace:.":
  version: 0.0.0-use.local
  resolution: "proj@workspace:."
  dependencies:
    a: "npm:^1.0.0"
    b: "npm:^1.0.0"
  languageName: unknown
  linkType: soft

"a@npm:^1.0.0":
  version: "1.0.0"
  resolution: "a@npm:1.0.0"
  dependencies:
    c: "npm:^2.0.0"
  languageName: node
  linkType: hard

"b@npm:^1.0.0":
  version: "1.0.0"
  resolution: "b@npm:1.0.0"
  dependencies:
    c: "npm:^1.0.0"
  languageName: node
  linkType: hard

"c@npm:^1.0.0":
  version: "1.5.0"
  resolution: "c@npm:1.5.0"
  languageName: node
  linkType: hard

"c@npm:^2.0.0":
  version: "2.0.0"
  resolution: "c@npm:2.0.0"
  languageName: node
  linkType: hard
"#;
        let lockfile = Lockfile::from_yarn(input).unwrap();
        // BFS: a and b at top level; a's c@2 hoists to the free top slot
        // first (a sorts before b in root deps), then b's c@1 nests.
        assert!(lockfile.packages.contains_key("node_modules/a"));
        assert!(lockfile.packages.contains_key("node_modules/b"));
        assert_eq!(
            lockfile.packages["node_modules/c"].version,
            Some("2.0.0".parse().unwrap())
        );
        assert_eq!(
            lockfile.packages["node_modules/b/node_modules/c"].version,
            Some("1.5.0".parse().unwrap())
        );
    }

    #[test]
    fn serialization_round_trips() {
        let lockfile = Lockfile::from_yarn(SAMPLE).unwrap();
        let emitted = lockfile.to_yarn_string();
        assert!(emitted.starts_with("# This file is generated"));
        assert!(emitted.contains("__metadata:"));
        assert!(emitted.contains("\"lodash@npm:^4.17.0\":"));
        assert!(emitted.contains("resolution: \"lodash@npm:4.17.21\""));
        assert!(emitted.contains("checksum: eb835a2e51d381e561e508ce932ea50a8e5a70f"));
        assert!(emitted.contains("languageName: node"));
        assert!(emitted.contains("linkType: hard"));
        // The opaque workspace entry survives verbatim.
        assert!(emitted.contains("\"proj@workspace:.\":"));

        let reparsed = Lockfile::from_yarn(&emitted).unwrap();
        assert_eq!(
            reparsed.packages["node_modules/lodash"].version,
            lockfile.packages["node_modules/lodash"].version
        );
        assert_eq!(
            reparsed.packages["node_modules/lodash"].checksum,
            lockfile.packages["node_modules/lodash"].checksum
        );
    }

    #[test]
    fn quoting_rules() {
        assert_eq!(quote("lodash"), "lodash");
        assert_eq!(quote("lodash@npm:^4.17.0"), "\"lodash@npm:^4.17.0\"");
        assert_eq!(quote("4.17.21"), "\"4.17.21\"");
        assert_eq!(quote("-leading-dash"), "\"-leading-dash\"");
        assert_eq!(quote("node"), "node");
    }

    #[test]
    fn scoped_resolutions() {
        let (name, protocol, value) = split_resolution("@scope/pkg@npm:1.2.3");
        assert_eq!(name, "@scope/pkg");
        assert_eq!(protocol, "npm");
        assert_eq!(value, "1.2.3");
    }
}
