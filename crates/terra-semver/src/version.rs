use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{digit1, space0};
use nom::combinator::{all_consuming, map, map_res, opt, recognize};
use nom::error::context;
use nom::multi::separated_list1;
use nom::sequence::{preceded, tuple};
use nom::IResult;

use crate::error::{into_error, SemverError, SemverErrorKind, SemverParseError};

pub(crate) const MAX_SAFE_INTEGER: u64 = 9_007_199_254_740_991;

/// A single pre-release (or build) identifier. Numeric identifiers sort
/// below alphanumeric ones, and numerically among themselves.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Numeric(u64),
    AlphaNumeric(String),
}

impl Ord for Identifier {
    fn cmp(&self, other: &Self) -> Ordering {
        use Identifier::*;
        match (self, other) {
            (Numeric(a), Numeric(b)) => a.cmp(b),
            (Numeric(_), AlphaNumeric(_)) => Ordering::Less,
            (AlphaNumeric(_), Numeric(_)) => Ordering::Greater,
            (AlphaNumeric(a), AlphaNumeric(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Numeric(n) => write!(f, "{n}"),
            Identifier::AlphaNumeric(s) => write!(f, "{s}"),
        }
    }
}

/// A parsed semantic version. Build metadata is carried for display but
/// ignored by comparison, equality, and hashing.
#[derive(Debug, Clone)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre_release: Vec<Identifier>,
    pub build: Vec<Identifier>,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre_release: Vec::new(),
            build: Vec::new(),
        }
    }

    pub fn parse(input: impl AsRef<str>) -> Result<Self, SemverError> {
        let input = input.as_ref();
        match all_consuming(version)(input) {
            Ok((_, version)) => Ok(version),
            Err(err) => Err(into_error(input, err)),
        }
    }

    pub fn is_prerelease(&self) -> bool {
        !self.pre_release.is_empty()
    }

    /// The `(major, minor, patch)` tuple, without pre-release or build.
    pub(crate) fn tuple(&self) -> (u64, u64, u64) {
        (self.major, self.minor, self.patch)
    }

    pub fn satisfies(&self, range: &crate::Range) -> bool {
        range.satisfies(self)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.tuple() == other.tuple() && self.pre_release == other.pre_release
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tuple().hash(state);
        self.pre_release.hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.tuple().cmp(&other.tuple()) {
            Ordering::Equal => {}
            other => return other,
        }
        // A release always outranks any of its pre-releases.
        match (self.pre_release.is_empty(), other.pre_release.is_empty()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => self.pre_release.cmp(&other.pre_release),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.pre_release.is_empty() {
            write!(f, "-")?;
            for (i, ident) in self.pre_release.iter().enumerate() {
                if i > 0 {
                    write!(f, ".")?;
                }
                write!(f, "{ident}")?;
            }
        }
        if !self.build.is_empty() {
            write!(f, "+")?;
            for (i, ident) in self.build.iter().enumerate() {
                if i > 0 {
                    write!(f, ".")?;
                }
                write!(f, "{ident}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = SemverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl serde::Serialize for Version {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Version {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct VersionVisitor;

        impl<'de> serde::de::Visitor<'de> for VersionVisitor {
            type Value = Version;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a semantic version string")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Version::parse(v).map_err(serde::de::Error::custom)
            }
        }

        deserializer.deserialize_str(VersionVisitor)
    }
}

/// Extract the first `M[.m[.p]]` digit run from an arbitrary string and
/// zero-pad it into a full version. Returns `None` when the input contains
/// no digits at all.
pub fn coerce(input: impl AsRef<str>) -> Option<Version> {
    let input = input.as_ref();
    let bytes = input.as_bytes();
    let start = bytes.iter().position(|b| b.is_ascii_digit())?;
    let mut rest = &input[start..];
    let mut parts = Vec::with_capacity(3);
    for _ in 0..3 {
        let end = rest
            .as_bytes()
            .iter()
            .position(|b| !b.is_ascii_digit())
            .unwrap_or(rest.len());
        if end == 0 {
            break;
        }
        match rest[..end].parse::<u64>() {
            Ok(n) if n <= MAX_SAFE_INTEGER => parts.push(n),
            _ => break,
        }
        rest = &rest[end..];
        if rest.as_bytes().first() == Some(&b'.')
            && rest.as_bytes().get(1).map(|b| b.is_ascii_digit()) == Some(true)
        {
            rest = &rest[1..];
        } else {
            break;
        }
    }
    parts.first().map(|major| {
        Version::new(
            *major,
            parts.get(1).copied().unwrap_or(0),
            parts.get(2).copied().unwrap_or(0),
        )
    })
}

pub(crate) fn version(input: &str) -> IResult<&str, Version, SemverParseError<&str>> {
    context(
        "version",
        map(
            tuple((
                preceded(space0, opt(alt((tag("v"), tag("="))))),
                preceded(space0, number),
                preceded(tag("."), number),
                preceded(tag("."), number),
                extras,
            )),
            |(_, major, minor, patch, (pre_release, build))| Version {
                major,
                minor,
                patch,
                pre_release,
                build,
            },
        ),
    )(input)
}

pub(crate) fn extras(
    input: &str,
) -> IResult<&str, (Vec<Identifier>, Vec<Identifier>), SemverParseError<&str>> {
    map(
        tuple((
            opt(preceded(tag("-"), identifiers)),
            opt(preceded(tag("+"), identifiers)),
        )),
        |(pre, build)| (pre.unwrap_or_default(), build.unwrap_or_default()),
    )(input)
}

pub(crate) fn identifiers(input: &str) -> IResult<&str, Vec<Identifier>, SemverParseError<&str>> {
    context("identifiers", separated_list1(tag("."), identifier))(input)
}

fn identifier(input: &str) -> IResult<&str, Identifier, SemverParseError<&str>> {
    map(
        recognize(nom::multi::many1(alt((
            nom::character::complete::alphanumeric1,
            tag("-"),
        )))),
        |s: &str| {
            // Purely-numeric identifiers compare numerically, so they're
            // parsed eagerly. Anything too large for u64 stays textual.
            if s.bytes().all(|b| b.is_ascii_digit()) {
                s.parse::<u64>()
                    .map(Identifier::Numeric)
                    .unwrap_or_else(|_| Identifier::AlphaNumeric(s.into()))
            } else {
                Identifier::AlphaNumeric(s.into())
            }
        },
    )(input)
}

pub(crate) fn number(input: &str) -> IResult<&str, u64, SemverParseError<&str>> {
    context(
        "number component",
        map_res(digit1, |raw: &str| {
            let value = raw.parse::<u64>().map_err(|_| SemverParseError {
                input,
                context: None,
                kind: Some(SemverErrorKind::MaxIntOverflow(MAX_SAFE_INTEGER)),
            })?;
            if value > MAX_SAFE_INTEGER {
                return Err(SemverParseError {
                    input,
                    context: None,
                    kind: Some(SemverErrorKind::MaxIntOverflow(MAX_SAFE_INTEGER)),
                });
            }
            Ok(value)
        }),
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn basic_parse() {
        let v = Version::parse("1.2.3").unwrap();
        assert_eq!(v, Version::new(1, 2, 3));
        assert_eq!(v.to_string(), "1.2.3");
    }

    #[test]
    fn loose_prefixes() {
        assert_eq!(Version::parse("v1.2.3").unwrap(), Version::new(1, 2, 3));
        assert_eq!(Version::parse("=1.2.3").unwrap(), Version::new(1, 2, 3));
    }

    #[test]
    fn prerelease_and_build() {
        let v = Version::parse("1.2.3-alpha.1+build.5").unwrap();
        assert_eq!(
            v.pre_release,
            vec![
                Identifier::AlphaNumeric("alpha".into()),
                Identifier::Numeric(1)
            ]
        );
        assert_eq!(v.to_string(), "1.2.3-alpha.1+build.5");
    }

    #[test]
    fn build_metadata_ignored_by_comparison() {
        let a = Version::parse("1.2.3+build.1").unwrap();
        let b = Version::parse("1.2.3+build.2").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.cmp(&b), Ordering::Equal);
    }

    #[test]
    fn prerelease_sorts_below_release() {
        let release = Version::parse("1.2.3").unwrap();
        let pre = Version::parse("1.2.3-rc.1").unwrap();
        assert!(pre < release);
        assert!(release > pre);
    }

    #[test]
    fn numeric_identifiers_sort_below_alphanumeric() {
        let zero = Version::parse("3.0.0-0").unwrap();
        let alpha = Version::parse("3.0.0-alpha").unwrap();
        assert!(zero < alpha);
    }

    #[test]
    fn prerelease_ordering() {
        let mut versions = vec![
            Version::parse("1.0.0-alpha.beta").unwrap(),
            Version::parse("1.0.0-alpha").unwrap(),
            Version::parse("1.0.0-rc.1").unwrap(),
            Version::parse("1.0.0").unwrap(),
            Version::parse("1.0.0-alpha.1").unwrap(),
            Version::parse("1.0.0-beta").unwrap(),
        ];
        versions.sort();
        let rendered = versions.iter().map(|v| v.to_string()).collect::<Vec<_>>();
        assert_eq!(
            rendered,
            vec![
                "1.0.0-alpha",
                "1.0.0-alpha.1",
                "1.0.0-alpha.beta",
                "1.0.0-beta",
                "1.0.0-rc.1",
                "1.0.0",
            ]
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(Version::parse("not-a-version").is_err());
        assert!(Version::parse("1.2").is_err());
        assert!(Version::parse("1.2.3.4").is_err());
    }

    #[test]
    fn coerce_extracts_versions() {
        assert_eq!(coerce("1"), Some(Version::new(1, 0, 0)));
        assert_eq!(coerce("1.2"), Some(Version::new(1, 2, 0)));
        assert_eq!(coerce("1.2.3"), Some(Version::new(1, 2, 3)));
        assert_eq!(coerce("version 2.4"), Some(Version::new(2, 4, 0)));
        assert_eq!(coerce("v3.1.4.5"), Some(Version::new(3, 1, 4)));
        assert_eq!(coerce("no digits here"), None);
    }

    #[test]
    fn serde_round_trip() {
        let v: Version = serde_json::from_str("\"1.2.3-beta.1\"").unwrap();
        assert_eq!(v, Version::parse("1.2.3-beta.1").unwrap());
        assert_eq!(serde_json::to_string(&v).unwrap(), "\"1.2.3-beta.1\"");
    }
}
