use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use terra_semver::Version;

use crate::error::WardenError;
use crate::lockfile::{Lockfile, LockfileFormat, LockfileNode};

pub(crate) fn from_npm(input: &str) -> Result<Lockfile, WardenError> {
    let value: Value = serde_json::from_str(input).map_err(WardenError::LockfileParseError)?;
    let version = detect_version(&value);
    let mut lockfile = match version {
        1 => from_v1(&value)?,
        2 | 3 => from_packages(&value)?,
        other => return Err(WardenError::InvalidLockfileVersion(other)),
    };
    lockfile.format = match version {
        1 => LockfileFormat::NpmV1,
        2 => LockfileFormat::NpmV2,
        _ => LockfileFormat::NpmV3,
    };
    Ok(lockfile)
}

/// Explicit `lockfileVersion` wins; otherwise the shape decides.
fn detect_version(value: &Value) -> u64 {
    if let Some(version) = value.get("lockfileVersion").and_then(Value::as_u64) {
        return version;
    }
    let has_packages = value
        .get("packages")
        .map(Value::is_object)
        .unwrap_or(false);
    let has_dependencies = value
        .get("dependencies")
        .map(Value::is_object)
        .unwrap_or(false);
    match (has_packages, has_dependencies) {
        (true, false) => 3,
        (true, true) => 2,
        (false, true) => 1,
        (false, false) => 3,
    }
}

fn top_level_strings(value: &Value) -> (Option<String>, Option<Version>) {
    let name = value
        .get("name")
        .and_then(Value::as_str)
        .map(String::from);
    let version = value
        .get("version")
        .and_then(Value::as_str)
        .and_then(|v| v.parse().ok());
    (name, version)
}

/// v2/v3: take `packages` verbatim, making sure a root entry exists.
fn from_packages(value: &Value) -> Result<Lockfile, WardenError> {
    let (name, version) = top_level_strings(value);
    let mut packages: IndexMap<String, LockfileNode> = IndexMap::new();
    if let Some(raw_packages) = value.get("packages").and_then(Value::as_object) {
        for (location, entry) in raw_packages {
            let node: LockfileNode = serde_json::from_value(entry.clone())
                .map_err(WardenError::LockfileParseError)?;
            packages.insert(location.clone(), node);
        }
    }
    if !packages.contains_key("") {
        packages.insert(
            String::new(),
            LockfileNode {
                name: name.clone(),
                version: version.clone(),
                ..Default::default()
            },
        );
        // Keep the root entry first.
        packages.move_index(packages.len() - 1, 0);
    }
    Ok(Lockfile {
        name,
        version,
        lockfile_version: 3,
        format: LockfileFormat::NpmV3,
        packages,
        yarn: None,
    })
}

/// v1: flatten the nested `dependencies` tree into locations; `requires`
/// becomes the canonical `dependencies` map.
fn from_v1(value: &Value) -> Result<Lockfile, WardenError> {
    let (name, version) = top_level_strings(value);
    let mut packages: IndexMap<String, LockfileNode> = IndexMap::new();
    packages.insert(
        String::new(),
        LockfileNode {
            name: name.clone(),
            version: version.clone(),
            ..Default::default()
        },
    );
    if let Some(dependencies) = value.get("dependencies").and_then(Value::as_object) {
        walk_v1(dependencies, "", &mut packages)?;
    }
    Ok(Lockfile {
        name,
        version,
        lockfile_version: 3,
        format: LockfileFormat::NpmV1,
        packages,
        yarn: None,
    })
}

fn walk_v1(
    dependencies: &Map<String, Value>,
    prefix: &str,
    packages: &mut IndexMap<String, LockfileNode>,
) -> Result<(), WardenError> {
    for (dep_name, entry) in dependencies {
        let location = if prefix.is_empty() {
            format!("node_modules/{dep_name}")
        } else {
            format!("{prefix}/node_modules/{dep_name}")
        };
        let raw_version = entry
            .get("version")
            .and_then(Value::as_str)
            .ok_or_else(|| WardenError::MissingVersion(location.clone()))?;
        // v1 spells aliases as `"version": "npm:real-name@1.2.3"`.
        let (alias_name, version_str) = match raw_version.strip_prefix("npm:") {
            Some(rest) => match rest.rsplit_once('@') {
                Some((real_name, v)) => (Some(real_name.to_string()), v),
                None => (None, raw_version),
            },
            None => (None, raw_version),
        };
        let node = LockfileNode {
            name: alias_name,
            version: version_str.parse().ok(),
            resolved: entry
                .get("resolved")
                .and_then(Value::as_str)
                .map(String::from),
            integrity: entry
                .get("integrity")
                .and_then(Value::as_str)
                .map(String::from),
            dev: entry.get("dev").and_then(Value::as_bool).unwrap_or(false),
            optional: entry
                .get("optional")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            peer: entry.get("peer").and_then(Value::as_bool).unwrap_or(false),
            dependencies: entry
                .get("requires")
                .and_then(Value::as_object)
                .map(|requires| {
                    requires
                        .iter()
                        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                        .collect()
                })
                .unwrap_or_default(),
            ..Default::default()
        };
        packages.insert(location.clone(), node);
        if let Some(nested) = entry.get("dependencies").and_then(Value::as_object) {
            walk_v1(nested, &location, packages)?;
        }
    }
    Ok(())
}

pub(crate) fn to_npm(lockfile: &Lockfile, lockfile_version: u64) -> Result<String, WardenError> {
    let value = match lockfile_version {
        1 => v1_value(lockfile),
        2 => v2_value(lockfile),
        3 => v3_value(lockfile),
        other => return Err(WardenError::InvalidLockfileVersion(other)),
    };
    let mut out =
        serde_json::to_string_pretty(&value).map_err(WardenError::LockfileParseError)?;
    out.push('\n');
    Ok(out)
}

fn v3_value(lockfile: &Lockfile) -> Value {
    let mut top = Map::new();
    if let Some(name) = &lockfile.name {
        top.insert("name".into(), json!(name));
    }
    if let Some(version) = &lockfile.version {
        top.insert("version".into(), json!(version.to_string()));
    }
    top.insert("lockfileVersion".into(), json!(3));
    top.insert("requires".into(), json!(true));
    let mut packages = Map::new();
    for (location, node) in &lockfile.packages {
        packages.insert(location.clone(), entry_value(node));
    }
    top.insert("packages".into(), Value::Object(packages));
    Value::Object(top)
}

fn v2_value(lockfile: &Lockfile) -> Value {
    let mut top = Map::new();
    if let Some(name) = &lockfile.name {
        top.insert("name".into(), json!(name));
    }
    if let Some(version) = &lockfile.version {
        top.insert("version".into(), json!(version.to_string()));
    }
    top.insert("lockfileVersion".into(), json!(2));
    top.insert("requires".into(), json!(true));
    let mut packages = Map::new();
    for (location, node) in &lockfile.packages {
        packages.insert(location.clone(), entry_value(node));
    }
    top.insert("packages".into(), Value::Object(packages));
    top.insert("dependencies".into(), v1_dependencies(lockfile));
    Value::Object(top)
}

fn v1_value(lockfile: &Lockfile) -> Value {
    let mut top = Map::new();
    if let Some(name) = &lockfile.name {
        top.insert("name".into(), json!(name));
    }
    if let Some(version) = &lockfile.version {
        top.insert("version".into(), json!(version.to_string()));
    }
    top.insert("lockfileVersion".into(), json!(1));
    top.insert("requires".into(), json!(true));
    top.insert("dependencies".into(), v1_dependencies(lockfile));
    Value::Object(top)
}

/// Canonical entry serialization with the fixed v2/v3 key order; empty,
/// false, and null fields are pruned.
fn entry_value(node: &LockfileNode) -> Value {
    let mut entry = Map::new();
    if let Some(name) = &node.name {
        entry.insert("name".into(), json!(name));
    }
    if let Some(version) = &node.version {
        entry.insert("version".into(), json!(version.to_string()));
    }
    if let Some(resolved) = &node.resolved {
        entry.insert("resolved".into(), json!(resolved));
    }
    if let Some(integrity) = &node.integrity {
        entry.insert("integrity".into(), json!(integrity));
    }
    if node.dev {
        entry.insert("dev".into(), json!(true));
    }
    if node.optional {
        entry.insert("optional".into(), json!(true));
    }
    if node.peer {
        entry.insert("peer".into(), json!(true));
    }
    insert_map(&mut entry, "dependencies", &node.dependencies);
    insert_map(&mut entry, "devDependencies", &node.dev_dependencies);
    insert_map(&mut entry, "optionalDependencies", &node.optional_dependencies);
    insert_map(&mut entry, "peerDependencies", &node.peer_dependencies);
    if !node.peer_dependencies_meta.is_empty() {
        let mut meta = Map::new();
        for (name, value) in &node.peer_dependencies_meta {
            meta.insert(name.clone(), json!(value));
        }
        entry.insert("peerDependenciesMeta".into(), Value::Object(meta));
    }
    insert_map(&mut entry, "engines", &node.engines);
    if let Some(bin) = &node.bin {
        entry.insert("bin".into(), json!(bin));
    }
    if let Some(license) = &node.license {
        entry.insert("license".into(), json!(license));
    }
    if let Some(funding) = &node.funding {
        entry.insert("funding".into(), funding.clone());
    }
    Value::Object(entry)
}

fn insert_map(entry: &mut Map<String, Value>, key: &str, map: &IndexMap<String, String>) {
    if map.is_empty() {
        return;
    }
    let mut out = Map::new();
    for (k, v) in map {
        out.insert(k.clone(), json!(v));
    }
    entry.insert(key.into(), Value::Object(out));
}

/// Rebuilds the v1 nested `dependencies` structure by splitting each
/// location on `/node_modules/`. Hoisting metadata beyond the per-package
/// fields doesn't survive, by design of the format.
fn v1_dependencies(lockfile: &Lockfile) -> Value {
    let mut locations = lockfile
        .packages
        .keys()
        .filter(|location| !location.is_empty())
        .cloned()
        .collect::<Vec<_>>();
    // Shallow entries must exist before their nested children.
    locations.sort_by_key(|location| {
        (location.matches("/node_modules/").count(), location.clone())
    });

    let mut root = Map::new();
    for location in locations {
        let Some(node) = lockfile.packages.get(&location) else {
            continue;
        };
        let segments = split_location(&location);
        let Some((leaf, ancestors)) = segments.split_last() else {
            continue;
        };
        let lost_parent = !insert_nested(&mut root, ancestors, leaf, v1_entry(node));
        if lost_parent {
            tracing::debug!("dropping orphaned lockfile entry at {location}");
            continue;
        }
    }
    Value::Object(root)
}

/// Descends into `map` following `ancestors`, creating `dependencies`
/// containers as needed, then inserts `value` under `leaf`. Returns `false`
/// if an ancestor entry doesn't exist.
fn insert_nested(map: &mut Map<String, Value>, ancestors: &[String], leaf: &str, value: Value) -> bool {
    let Some((ancestor, rest)) = ancestors.split_first() else {
        map.insert(leaf.to_string(), value);
        return true;
    };
    let Some(parent_entry) = map.get_mut(ancestor.as_str()).and_then(Value::as_object_mut) else {
        return false;
    };
    if !parent_entry.contains_key("dependencies") {
        parent_entry.insert("dependencies".into(), Value::Object(Map::new()));
    }
    let deps = parent_entry
        .get_mut("dependencies")
        .and_then(Value::as_object_mut)
        .expect("just inserted");
    insert_nested(deps, rest, leaf, value)
}

fn split_location(location: &str) -> Vec<String> {
    location
        .strip_prefix("node_modules/")
        .map(|rest| {
            rest.split("/node_modules/")
                .map(String::from)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default()
}

fn v1_entry(node: &LockfileNode) -> Value {
    let mut entry = Map::new();
    let version = match (&node.name, &node.version) {
        // Aliases round-trip through the v1 `npm:` version syntax.
        (Some(name), Some(version)) => format!("npm:{name}@{version}"),
        (Some(name), None) => format!("npm:{name}"),
        (None, Some(version)) => version.to_string(),
        (None, None) => String::new(),
    };
    if !version.is_empty() {
        entry.insert("version".into(), json!(version));
    }
    if let Some(resolved) = &node.resolved {
        entry.insert("resolved".into(), json!(resolved));
    }
    if let Some(integrity) = &node.integrity {
        entry.insert("integrity".into(), json!(integrity));
    }
    if node.dev {
        entry.insert("dev".into(), json!(true));
    }
    if node.optional {
        entry.insert("optional".into(), json!(true));
    }
    if !node.dependencies.is_empty() {
        let mut requires = Map::new();
        for (name, spec) in &node.dependencies {
            requires.insert(name.clone(), json!(spec));
        }
        entry.insert("requires".into(), Value::Object(requires));
    }
    Value::Object(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn version_detection() {
        let explicit: Value = json!({"lockfileVersion": 2});
        assert_eq!(detect_version(&explicit), 2);
        let v3: Value = json!({"packages": {}});
        assert_eq!(detect_version(&v3), 3);
        let v2: Value = json!({"packages": {}, "dependencies": {}});
        assert_eq!(detect_version(&v2), 2);
        let v1: Value = json!({"dependencies": {}});
        assert_eq!(detect_version(&v1), 1);
        let bare: Value = json!({});
        assert_eq!(detect_version(&bare), 3);
    }

    #[test]
    fn v1_walk_flattens_nesting() {
        let input = r#"
        {
            "name": "proj",
            "version": "1.0.0",
            "dependencies": {
                "a": {
                    "version": "1.0.0",
                    "resolved": "https://example.com/a-1.0.0.tgz",
                    "integrity": "sha512-aaa",
                    "requires": { "b": "^2.0.0" },
                    "dependencies": {
                        "b": {
                            "version": "2.0.0",
                            "resolved": "https://example.com/b-2.0.0.tgz",
                            "integrity": "sha512-bbb"
                        }
                    }
                }
            }
        }
        "#;
        let lockfile = from_npm(input).unwrap();
        assert_eq!(lockfile.format, LockfileFormat::NpmV1);
        assert!(lockfile.packages.contains_key(""));
        let a = &lockfile.packages["node_modules/a"];
        assert_eq!(a.version, Some("1.0.0".parse().unwrap()));
        assert_eq!(a.dependencies.get("b").map(String::as_str), Some("^2.0.0"));
        let b = &lockfile.packages["node_modules/a/node_modules/b"];
        assert_eq!(b.version, Some("2.0.0".parse().unwrap()));
    }

    #[test]
    fn v1_alias_versions() {
        let input = r#"
        {
            "dependencies": {
                "foo": { "version": "npm:@scope/bar@1.2.3" }
            }
        }
        "#;
        let lockfile = from_npm(input).unwrap();
        let foo = &lockfile.packages["node_modules/foo"];
        assert_eq!(foo.name.as_deref(), Some("@scope/bar"));
        assert_eq!(foo.version, Some("1.2.3".parse().unwrap()));
    }

    #[test]
    fn v1_round_trip() {
        let input = r#"
        {
            "name": "proj",
            "version": "1.0.0",
            "dependencies": {
                "lodash": {
                    "version": "4.17.21",
                    "resolved": "https://registry.npmjs.org/lodash/-/lodash-4.17.21.tgz",
                    "integrity": "sha512-lodash"
                }
            }
        }
        "#;
        let lockfile = from_npm(input).unwrap();
        let entry = &lockfile.packages["node_modules/lodash"];
        assert_eq!(entry.version, Some("4.17.21".parse().unwrap()));
        assert!(entry.dependencies.is_empty());

        let emitted = to_npm(&lockfile, 1).unwrap();
        let reparsed: Value = serde_json::from_str(&emitted).unwrap();
        assert_eq!(
            reparsed["dependencies"]["lodash"]["version"],
            json!("4.17.21")
        );
        assert_eq!(
            reparsed["dependencies"]["lodash"]["integrity"],
            json!("sha512-lodash")
        );
        // Round-tripping back through the parser is lossless for v1 data.
        let again = from_npm(&emitted).unwrap();
        assert_eq!(again.packages, lockfile.packages);
    }

    #[test]
    fn v3_key_order_and_trailing_newline() {
        let mut lockfile = Lockfile {
            name: Some("proj".into()),
            version: Some("1.0.0".parse().unwrap()),
            ..Default::default()
        };
        lockfile.packages.insert(
            String::new(),
            LockfileNode {
                name: Some("proj".into()),
                version: Some("1.0.0".parse().unwrap()),
                dependencies: [("a".to_string(), "^1.0.0".to_string())].into_iter().collect(),
                ..Default::default()
            },
        );
        lockfile.packages.insert(
            "node_modules/a".into(),
            LockfileNode {
                version: Some("1.2.3".parse().unwrap()),
                resolved: Some("https://example.com/a-1.2.3.tgz".into()),
                integrity: Some("sha512-aaa".into()),
                dev: true,
                ..Default::default()
            },
        );
        let emitted = to_npm(&lockfile, 3).unwrap();
        assert!(emitted.ends_with('\n'));
        let entry_pos = |field: &str| {
            emitted
                .find(&format!("\"{field}\""))
                .unwrap_or_else(|| panic!("{field} missing from output"))
        };
        assert!(entry_pos("version") < entry_pos("resolved"));
        assert!(entry_pos("resolved") < entry_pos("integrity"));
        assert!(entry_pos("integrity") < entry_pos("dev"));
        // False/empty fields are pruned.
        assert!(!emitted.contains("\"optional\""));
        assert!(!emitted.contains("\"peer\""));

        let reparsed = from_npm(&emitted).unwrap();
        assert_eq!(reparsed.packages, lockfile.packages);
    }

    #[test]
    fn v2_is_a_union() {
        let mut lockfile = Lockfile::default();
        lockfile.packages.insert(String::new(), LockfileNode::default());
        lockfile.packages.insert(
            "node_modules/a".into(),
            LockfileNode {
                version: Some("1.0.0".parse().unwrap()),
                resolved: Some("https://example.com/a.tgz".into()),
                ..Default::default()
            },
        );
        let emitted = to_npm(&lockfile, 2).unwrap();
        let value: Value = serde_json::from_str(&emitted).unwrap();
        assert_eq!(value["lockfileVersion"], json!(2));
        assert_eq!(value["requires"], json!(true));
        assert!(value["packages"].get("node_modules/a").is_some());
        assert!(value["dependencies"].get("a").is_some());

        // The packages block wins on re-parse, so v2 round-trips cleanly.
        let reparsed = from_npm(&emitted).unwrap();
        assert_eq!(reparsed.format, LockfileFormat::NpmV2);
        assert_eq!(reparsed.packages, lockfile.packages);
    }
}
