use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use terra_semver::Version;

/// A `package.json`, as read from disk, a registry packument entry, or a
/// lockfile. Fields this tool doesn't act on are preserved in `_rest` so
/// writes don't lose data.
#[derive(Clone, Default, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, alias = "licence", skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bin: Option<Bin>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub funding: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub private: Option<bool>,

    // NOTE: engines is object_or_bust'd because some popular packages have
    // shipped `"engines": []`.
    #[serde(
        default,
        deserialize_with = "object_or_bust",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub engines: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dev_dependencies: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub optional_dependencies: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub peer_dependencies: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub peer_dependencies_meta: BTreeMap<String, PeerDependencyMeta>,

    #[serde(flatten, default, skip_serializing_if = "HashMap::is_empty")]
    pub _rest: HashMap<String, Value>,
}

/// Per-entry metadata for `peerDependencies`. `optional: true` turns the
/// corresponding peer edge into a peer-optional one.
#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDependencyMeta {
    #[serde(default)]
    pub optional: bool,
}

/// Representation for the `bin` field in package manifests.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Bin {
    Str(String),
    Hash(BTreeMap<String, String>),
}

impl Bin {
    /// Normalizes to a name → relative-path map. The string form takes the
    /// package's own name (sans scope) as the bin name.
    pub fn entries(&self, package_name: &str) -> BTreeMap<String, String> {
        match self {
            Bin::Str(path) => {
                let name = package_name
                    .rsplit_once('/')
                    .map(|(_, name)| name)
                    .unwrap_or(package_name);
                let mut map = BTreeMap::new();
                map.insert(name.to_string(), path.clone());
                map
            }
            Bin::Hash(map) => map.clone(),
        }
    }
}

fn object_or_bust<'de, D, V>(deserializer: D) -> std::result::Result<BTreeMap<String, V>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    let val: ObjectOrBust<V> = Deserialize::deserialize(deserializer)?;
    if let ObjectOrBust::Object(map) = val {
        Ok(map)
    } else {
        Ok(BTreeMap::new())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ObjectOrBust<V> {
    Object(BTreeMap<String, V>),
    Value(serde_json::Value),
}

#[cfg(test)]
mod tests {
    use super::*;

    use miette::{IntoDiagnostic, Result};
    use pretty_assertions::assert_eq;

    #[test]
    fn basic_from_json() -> Result<()> {
        let string = r#"
{
    "name": "hello",
    "version": "1.2.3",
    "description": "description",
    "devDependencies": {
        "foo": "^3.2.1"
    }
}
        "#;
        let parsed = serde_json::from_str::<Manifest>(string).into_diagnostic()?;
        assert_eq!(parsed.name.as_deref(), Some("hello"));
        assert_eq!(parsed.version, Some("1.2.3".parse()?));
        assert_eq!(
            parsed.dev_dependencies.get("foo").map(|s| s.as_str()),
            Some("^3.2.1")
        );
        Ok(())
    }

    #[test]
    fn empty() -> Result<()> {
        let parsed = serde_json::from_str::<Manifest>("{}").into_diagnostic()?;
        assert_eq!(parsed, Manifest::default());
        Ok(())
    }

    #[test]
    fn peer_dependencies_meta() -> Result<()> {
        let string = r#"
{
    "peerDependencies": {
        "react": ">=16"
    },
    "peerDependenciesMeta": {
        "react": { "optional": true }
    }
}
        "#;
        let parsed = serde_json::from_str::<Manifest>(string).into_diagnostic()?;
        assert!(parsed.peer_dependencies_meta["react"].optional);
        Ok(())
    }

    #[test]
    fn bin_forms() -> Result<()> {
        let string_form = serde_json::from_str::<Manifest>(r#"{"bin": "./cli.js"}"#)
            .into_diagnostic()?;
        assert_eq!(
            string_form.bin.unwrap().entries("@scope/tool"),
            [("tool".to_string(), "./cli.js".to_string())].into()
        );

        let hash_form = serde_json::from_str::<Manifest>(
            r#"{"bin": {"tool": "./cli.js", "helper": "./helper.js"}}"#,
        )
        .into_diagnostic()?;
        let entries = hash_form.bin.unwrap().entries("tool");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries["helper"], "./helper.js");
        Ok(())
    }

    #[test]
    fn array_engines() -> Result<()> {
        let parsed =
            serde_json::from_str::<Manifest>(r#"{"engines": []}"#).into_diagnostic()?;
        assert!(parsed.engines.is_empty());
        Ok(())
    }

    #[test]
    fn unknown_fields_round_trip() -> Result<()> {
        let string = r#"{"name":"x","browserslist":["defaults"]}"#;
        let parsed = serde_json::from_str::<Manifest>(string).into_diagnostic()?;
        assert!(parsed._rest.contains_key("browserslist"));
        let emitted = serde_json::to_value(&parsed).into_diagnostic()?;
        assert_eq!(emitted["browserslist"][0], "defaults");
        Ok(())
    }
}
