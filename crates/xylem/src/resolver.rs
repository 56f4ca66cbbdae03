use std::fmt::Display;

use terra_common::{Packument, VersionMetadata};
use terra_integrity::Integrity;
use terra_semver::{max_satisfying, Range, Version};
use terra_spec::{PackageSpec, VersionSpec};
use url::Url;

use crate::error::XylemError;

/// A fully-resolved, specific version of a package as it would be fetched.
#[derive(Clone, PartialEq)]
pub enum PackageResolution {
    Npm {
        name: String,
        version: Version,
        tarball: Url,
        integrity: Option<Integrity>,
    },
}

impl PackageResolution {
    pub fn npm_version(&self) -> &Version {
        match self {
            Self::Npm { version, .. } => version,
        }
    }

    pub fn tarball(&self) -> &Url {
        match self {
            Self::Npm { tarball, .. } => tarball,
        }
    }

    pub fn integrity(&self) -> Option<&Integrity> {
        match self {
            Self::Npm { integrity, .. } => integrity.as_ref(),
        }
    }

    pub fn satisfies(&self, spec: &PackageSpec) -> bool {
        use PackageSpec as Ps;
        match (self, spec.target()) {
            (Self::Npm { version, .. }, Ps::Npm { requested, .. }) => match requested {
                Some(VersionSpec::Version(v)) => version == v,
                Some(VersionSpec::Range(r)) => r.satisfies(version),
                // Tags are expected to have been pinned down to a concrete
                // version before satisfaction checks.
                Some(VersionSpec::Tag(_)) => false,
                None => true,
            },
            _ => false,
        }
    }
}

impl Display for PackageResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Npm { tarball, .. } => write!(f, "{tarball}"),
        }
    }
}

impl std::fmt::Debug for PackageResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Npm {
                name,
                version,
                tarball,
                ..
            } => write!(f, "{name}@{version} ({tarball})"),
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct PackageResolver {
    pub(crate) default_tag: String,
}

impl PackageResolver {
    /// Picks the concrete version a spec resolves to within a packument.
    ///
    /// Precedence: an exactly-requested version; the named dist-tag for tag
    /// requests; the default dist-tag when it satisfies a range request;
    /// the max satisfying version; the default dist-tag for wildcards.
    pub(crate) fn resolve(
        &self,
        name: &str,
        wanted: &PackageSpec,
        packument: &Packument,
    ) -> Result<PackageResolution, XylemError> {
        let spec = wanted.target();
        let requested = match spec {
            PackageSpec::Npm { requested, .. } => requested,
            _ => return Err(XylemError::UnsupportedSpec(spec.clone())),
        };

        if packument.versions.is_empty() {
            return Err(XylemError::NoVersion {
                name: name.into(),
                requested: wanted.requested(),
                versions: Vec::new(),
            });
        }

        // Exact versions win outright; tag requests go through dist-tags;
        // everything else picks the max satisfying published version.
        let mut target: Option<&Version> = match requested {
            Some(VersionSpec::Version(version)) => Some(version),
            Some(VersionSpec::Tag(tag)) => packument.tags.get(tag.as_str()),
            Some(VersionSpec::Range(range)) => max_satisfying(packument.versions.keys(), range),
            None => None,
        };

        let tag_version = packument.tags.get(&self.default_tag);

        // A bare name resolves through the default dist-tag.
        if target.is_none()
            && requested.is_none()
            && tag_version.is_some()
            && packument
                .versions
                .contains_key(tag_version.as_ref().unwrap())
        {
            target = tag_version;
        }

        if target.is_none() {
            if let Some(VersionSpec::Range(range)) = requested {
                if range == &Range::any() {
                    target = tag_version;
                }
            }
        }

        let metadata = target
            .and_then(|v| packument.versions.get(v))
            .ok_or_else(|| XylemError::NoVersion {
                name: name.into(),
                requested: wanted.requested(),
                versions: packument.versions.keys().map(|k| k.to_string()).collect(),
            })?;

        if let Some(deprecated) = &metadata.deprecated {
            tracing::warn!(
                "deprecated {}@{}: {}",
                name,
                metadata
                    .manifest
                    .version
                    .as_ref()
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "unknown".into()),
                deprecated
            );
        }

        Self::resolution_from_metadata(name, wanted, metadata)
    }

    pub(crate) fn resolution_from_metadata(
        name: &str,
        wanted: &PackageSpec,
        metadata: &VersionMetadata,
    ) -> Result<PackageResolution, XylemError> {
        let version = metadata
            .manifest
            .version
            .clone()
            .unwrap_or_else(|| Version::new(0, 0, 0));
        let tarball = metadata.dist.tarball.clone().ok_or_else(|| {
            XylemError::NoTarball(name.into(), wanted.requested())
        })?;
        let integrity = metadata
            .dist
            .integrity
            .as_ref()
            .map(|i| i.parse())
            .transpose()?;
        Ok(PackageResolution::Npm {
            name: name.into(),
            version,
            tarball,
            integrity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn packument(versions: &[&str], tags: &[(&str, &str)]) -> Packument {
        let raw = serde_json::json!({
            "dist-tags": tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<std::collections::HashMap<_, _>>(),
            "versions": versions
                .iter()
                .map(|v| {
                    (
                        v.to_string(),
                        serde_json::json!({
                            "name": "pkg",
                            "version": v,
                            "dist": { "tarball": format!("https://example.com/pkg-{v}.tgz") }
                        }),
                    )
                })
                .collect::<std::collections::HashMap<_, _>>(),
        });
        serde_json::from_value(raw).unwrap()
    }

    fn resolver() -> PackageResolver {
        PackageResolver {
            default_tag: "latest".into(),
        }
    }

    fn resolve(spec: &str, packument: &Packument) -> Result<PackageResolution, XylemError> {
        let wanted: PackageSpec = spec.parse().unwrap();
        resolver().resolve(wanted.target().name(), &wanted, packument)
    }

    #[test]
    fn range_picks_max_satisfying() {
        let packument = packument(&["1.0.0", "1.2.3", "2.0.0"], &[("latest", "2.0.0")]);
        let resolution = resolve("pkg@^1.0.0", &packument).unwrap();
        assert_eq!(resolution.npm_version(), &"1.2.3".parse().unwrap());
    }

    #[test]
    fn exact_version_wins() {
        let packument = packument(&["1.0.0", "1.2.3"], &[("latest", "1.2.3")]);
        let resolution = resolve("pkg@1.0.0", &packument).unwrap();
        assert_eq!(resolution.npm_version(), &"1.0.0".parse().unwrap());
    }

    #[test]
    fn tag_request_uses_dist_tags() {
        let packument = packument(
            &["1.0.0", "2.0.0-beta.1"],
            &[("latest", "1.0.0"), ("beta", "2.0.0-beta.1")],
        );
        let resolution = resolve("pkg@beta", &packument).unwrap();
        assert_eq!(resolution.npm_version(), &"2.0.0-beta.1".parse().unwrap());
    }

    #[test]
    fn ranges_ignore_dist_tags() {
        // The dist-tag points at an older version, but a range request
        // still picks the max satisfying one.
        let packument = packument(
            &["1.0.0", "1.5.0", "1.9.0"],
            &[("latest", "1.5.0")],
        );
        let resolution = resolve("pkg@^1.0.0", &packument).unwrap();
        assert_eq!(resolution.npm_version(), &"1.9.0".parse().unwrap());
    }

    #[test]
    fn bare_name_takes_default_tag() {
        let packument = packument(&["1.0.0", "3.0.0"], &[("latest", "1.0.0")]);
        let resolution = resolve("pkg", &packument).unwrap();
        assert_eq!(resolution.npm_version(), &"1.0.0".parse().unwrap());
    }

    #[test]
    fn no_satisfying_version_errors() {
        let packument = packument(&["1.0.0"], &[("latest", "1.0.0")]);
        let err = resolve("pkg@^2.0.0", &packument).unwrap_err();
        assert!(matches!(err, XylemError::NoVersion { .. }));
    }

    #[test]
    fn alias_resolves_through_target() {
        let packument = packument(&["1.0.0", "1.4.0"], &[("latest", "1.4.0")]);
        let resolution = resolve("local@npm:pkg@~1.4.0", &packument).unwrap();
        assert_eq!(resolution.npm_version(), &"1.4.0".parse().unwrap());
    }
}
