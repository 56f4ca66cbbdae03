use std::collections::HashMap;
use std::fmt::Display;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use terra_semver::Version;
use url::Url;

use crate::Manifest;

/// The toplevel registry metadata document for one package: every published
/// version plus dist-tags.
#[derive(Clone, Default, Debug, PartialEq, Serialize, Deserialize)]
pub struct Packument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub versions: HashMap<Version, VersionMetadata>,
    #[serde(default, rename = "dist-tags")]
    pub tags: HashMap<String, Version>,
    #[serde(flatten, default, skip_serializing_if = "HashMap::is_empty")]
    pub rest: HashMap<String, Value>,
}

/// Metadata for an individual package version: its manifest plus
/// distribution information.
#[derive(Clone, Default, Debug, PartialEq, Serialize, Deserialize)]
pub struct VersionMetadata {
    #[serde(default)]
    pub dist: Dist,
    #[serde(
        default,
        deserialize_with = "deserialize_deprecation_info",
        skip_serializing_if = "Option::is_none"
    )]
    pub deprecated: Option<DeprecationInfo>,
    #[serde(flatten)]
    pub manifest: Manifest,
}

/// Distribution information for a particular package version.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Dist {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shasum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tarball: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "HashMap::is_empty")]
    pub rest: HashMap<String, Value>,
}

/// Represents the deprecation state of a package version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeprecationInfo {
    Reason(String),
    UnknownReason,
}

impl Display for DeprecationInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reason(s) => write!(f, "{s:?}"),
            Self::UnknownReason => write!(f, "Unknown Reason"),
        }
    }
}

impl Serialize for DeprecationInfo {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            DeprecationInfo::Reason(s) => serializer.serialize_str(s),
            DeprecationInfo::UnknownReason => serializer.serialize_bool(true),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrBool {
    String(String),
    Bool(bool),
}

fn deserialize_deprecation_info<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<DeprecationInfo>, D::Error>
where
    D: Deserializer<'de>,
{
    let val: StringOrBool = Deserialize::deserialize(deserializer)?;
    Ok(match val {
        StringOrBool::String(s) => Some(DeprecationInfo::Reason(s)),
        StringOrBool::Bool(b) => {
            if b {
                Some(DeprecationInfo::UnknownReason)
            } else {
                None
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_minimal_packument() {
        let raw = r#"
{
    "name": "a",
    "dist-tags": { "latest": "1.2.3" },
    "versions": {
        "1.2.3": {
            "name": "a",
            "version": "1.2.3",
            "dist": {
                "tarball": "https://example.com/a-1.2.3.tgz",
                "integrity": "sha512-deadbeef"
            },
            "dependencies": { "b": "^2.0.0" }
        }
    }
}
        "#;
        let packument: Packument = serde_json::from_str(raw).unwrap();
        let latest = &packument.tags["latest"];
        let metadata = &packument.versions[latest];
        assert_eq!(
            metadata.dist.tarball.as_ref().map(|t| t.as_str()),
            Some("https://example.com/a-1.2.3.tgz")
        );
        assert_eq!(
            metadata.manifest.dependencies.get("b").map(|s| s.as_str()),
            Some("^2.0.0")
        );
    }

    #[test]
    fn deprecation_forms() {
        let reason: VersionMetadata =
            serde_json::from_str(r#"{"deprecated": "use v2 instead"}"#).unwrap();
        assert_eq!(
            reason.deprecated,
            Some(DeprecationInfo::Reason("use v2 instead".into()))
        );

        let flag: VersionMetadata = serde_json::from_str(r#"{"deprecated": true}"#).unwrap();
        assert_eq!(flag.deprecated, Some(DeprecationInfo::UnknownReason));

        let not: VersionMetadata = serde_json::from_str(r#"{"deprecated": false}"#).unwrap();
        assert_eq!(not.deprecated, None);
    }
}
