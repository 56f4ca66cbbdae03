//! Package specifier parser. This is the stuff that takes something like
//! `foo@^1.2.3` or `foo@npm:@scope/bar@2.x` and turns it into something
//! meaningful.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use nom::combinator::all_consuming;
use nom::Err;
use terra_semver::{Range, Version};
use url::Url;

pub use crate::error::{PackageSpecError, SpecErrorKind};
use crate::parsers::package;

mod error;
mod parsers;

#[derive(Debug, Clone, PartialEq)]
pub enum VersionSpec {
    Tag(String),
    Version(Version),
    Range(Range),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PackageSpec {
    Npm {
        scope: Option<String>,
        name: String,
        requested: Option<VersionSpec>,
    },
    Alias {
        name: String,
        spec: Box<PackageSpec>,
    },
    /// `name@workspace:<raw>`, recorded verbatim and resolved elsewhere.
    Workspace { name: String, raw: String },
    /// Any git-flavored spec, recorded verbatim and resolved elsewhere.
    Git { name: String, raw: String },
    /// A plain http(s) artifact URL, recorded verbatim and resolved
    /// elsewhere.
    Url { name: String, url: Url },
    /// A local directory, recorded verbatim and resolved elsewhere.
    Dir { name: String, path: PathBuf },
}

impl PackageSpec {
    pub fn is_alias(&self) -> bool {
        matches!(self, PackageSpec::Alias { .. })
    }

    pub fn is_npm(&self) -> bool {
        use PackageSpec::*;
        match self {
            Alias { spec, .. } => spec.is_npm(),
            Npm { .. } => true,
            _ => false,
        }
    }

    /// The name this spec is installed under (for aliases, the alias).
    pub fn name(&self) -> &str {
        use PackageSpec::*;
        match self {
            Npm { name, .. }
            | Alias { name, .. }
            | Workspace { name, .. }
            | Git { name, .. }
            | Url { name, .. }
            | Dir { name, .. } => name,
        }
    }

    /// Unwraps aliases down to the spec they point at.
    pub fn target(&self) -> &PackageSpec {
        match self {
            PackageSpec::Alias { spec, .. } => spec.target(),
            _ => self,
        }
    }

    /// The requested version portion, as a string. Specs with no version
    /// tail request `*`.
    pub fn requested(&self) -> String {
        use PackageSpec::*;
        match self {
            Npm { requested, .. } => requested
                .as_ref()
                .map(|r| r.to_string())
                .unwrap_or_else(|| "*".to_string()),
            Alias { spec, .. } => spec.requested(),
            Workspace { raw, .. } => format!("workspace:{raw}"),
            Git { raw, .. } => raw.clone(),
            Url { url, .. } => url.to_string(),
            Dir { path, .. } => format!("file:{}", path.display()),
        }
    }
}

impl FromStr for PackageSpec {
    type Err = PackageSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_package_spec(s)
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use PackageSpec::*;
        match self {
            Npm {
                ref name,
                ref requested,
                ..
            } => {
                write!(f, "{name}")?;
                if let Some(req) = requested {
                    write!(f, "@{req}")?;
                }
                Ok(())
            }
            Alias { ref name, ref spec } => {
                write!(f, "{name}@")?;
                if let Npm { .. } = **spec {
                    write!(f, "npm:")?;
                }
                write!(f, "{spec}")
            }
            Workspace { name, raw } => write!(f, "{name}@workspace:{raw}"),
            Git { name, raw } => write!(f, "{name}@{raw}"),
            Url { name, url } => write!(f, "{name}@{url}"),
            Dir { name, path } => write!(f, "{name}@file:{}", path.display()),
        }
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use VersionSpec::*;
        match self {
            Tag(tag) => write!(f, "{tag}"),
            Version(v) => write!(f, "{v}"),
            Range(range) => write!(f, "{range}"),
        }
    }
}

/// Whether a raw spec string is shaped like a dist-tag name (rather than a
/// malformed range): leading ASCII letter, then name-safe characters.
pub fn is_tag_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

fn parse_package_spec<I>(input: I) -> Result<PackageSpec, PackageSpecError>
where
    I: AsRef<str>,
{
    let input = input.as_ref();
    match all_consuming(package::package_spec)(input) {
        Ok((_, arg)) => Ok(arg),
        Err(err) => Err(match err {
            Err::Error(e) | Err::Failure(e) => PackageSpecError {
                input: input.into(),
                span: (input.len() - e.input.len(), 0).into(),
                kind: if let Some(kind) = e.kind {
                    kind
                } else if let Some(ctx) = e.context {
                    SpecErrorKind::Context(ctx)
                } else {
                    SpecErrorKind::Other
                },
            },
            Err::Incomplete(_) => PackageSpecError {
                input: input.into(),
                span: (input.len().saturating_sub(1), 0).into(),
                kind: SpecErrorKind::IncompleteInput,
            },
        }),
    }
}
