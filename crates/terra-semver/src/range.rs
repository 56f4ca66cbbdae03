use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{space0, space1};
use nom::combinator::{all_consuming, map, opt};
use nom::error::context;
use nom::multi::separated_list1;
use nom::sequence::{delimited, preceded, tuple};
use nom::IResult;

use crate::error::{into_error, SemverError, SemverParseError};
use crate::version::{extras, number, Identifier, Version};

/// A version range: a disjunction (`||`) of contiguous version intervals.
///
/// All of the surface syntax (`^`, `~`, x-ranges, hyphen ranges, comparator
/// conjunctions) desugars into intervals, so `^2.0.0` displays as
/// `>=2.0.0 <3.0.0-0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range(Vec<BoundSet>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BoundSet {
    lower: Bound,
    upper: Bound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Bound {
    Unbounded,
    Including(Version),
    Excluding(Version),
}

impl Range {
    /// The range that admits every version, including pre-releases.
    pub fn any() -> Self {
        Range(vec![BoundSet::any()])
    }

    pub fn parse(input: impl AsRef<str>) -> Result<Self, SemverError> {
        let input = input.as_ref();
        if input.trim().is_empty() {
            return Ok(Range::any());
        }
        match all_consuming(range_set)(input) {
            Ok((_, range)) => Ok(range),
            Err(err) => Err(into_error(input, err)),
        }
    }

    pub fn satisfies(&self, version: &Version) -> bool {
        self.0.iter().any(|bounds| bounds.satisfies(version))
    }

    /// Whether this range can never match any version (e.g. `>5 <3`).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for Range {
    type Err = SemverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Range::parse(s)
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "<0.0.0-0");
        }
        for (i, bounds) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " || ")?;
            }
            write!(f, "{bounds}")?;
        }
        Ok(())
    }
}

impl serde::Serialize for Range {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Range {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct RangeVisitor;

        impl<'de> serde::de::Visitor<'de> for RangeVisitor {
            type Value = Range;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a semver range string")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Range::parse(v).map_err(serde::de::Error::custom)
            }
        }

        deserializer.deserialize_str(RangeVisitor)
    }
}

/// Picks the numerically greatest version that satisfies `range`, or `None`
/// if nothing does.
pub fn max_satisfying<'a, I>(versions: I, range: &Range) -> Option<&'a Version>
where
    I: IntoIterator<Item = &'a Version>,
{
    versions
        .into_iter()
        .filter(|v| range.satisfies(v))
        .max()
}

impl BoundSet {
    fn any() -> Self {
        BoundSet {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    fn is_any(&self) -> bool {
        self.lower == Bound::Unbounded && self.upper == Bound::Unbounded
    }

    fn satisfies(&self, version: &Version) -> bool {
        let above_lower = match &self.lower {
            Bound::Unbounded => true,
            Bound::Including(lower) => version >= lower,
            Bound::Excluding(lower) => version > lower,
        };
        let below_upper = match &self.upper {
            Bound::Unbounded => true,
            Bound::Including(upper) => version <= upper,
            Bound::Excluding(upper) => version < upper,
        };
        if !above_lower || !below_upper {
            return false;
        }
        // A pre-release only matches when one of the interval endpoints
        // carries a pre-release on the same (major, minor, patch) tuple.
        // The wildcard interval matches everything.
        if version.is_prerelease() && !self.is_any() {
            let tuple_matches = [&self.lower, &self.upper].into_iter().any(|bound| {
                match bound {
                    Bound::Including(b) | Bound::Excluding(b) => {
                        b.is_prerelease() && b.tuple() == version.tuple()
                    }
                    Bound::Unbounded => false,
                }
            });
            if !tuple_matches {
                return false;
            }
        }
        true
    }

    fn intersect(self, other: BoundSet) -> Option<BoundSet> {
        let lower = max_lower(self.lower, other.lower);
        let upper = min_upper(self.upper, other.upper);
        use Bound::*;
        match (&lower, &upper) {
            (Including(l), Including(u)) if l > u => None,
            (Including(l), Excluding(u)) | (Excluding(l), Including(u)) if l >= u => None,
            (Excluding(l), Excluding(u)) if l >= u => None,
            _ => Some(BoundSet { lower, upper }),
        }
    }
}

fn max_lower(a: Bound, b: Bound) -> Bound {
    use Bound::*;
    match (a, b) {
        (Unbounded, other) | (other, Unbounded) => other,
        (Including(x), Including(y)) => Including(x.max(y)),
        (Excluding(x), Excluding(y)) => Excluding(x.max(y)),
        (Including(x), Excluding(y)) | (Excluding(y), Including(x)) => {
            if y >= x {
                Excluding(y)
            } else {
                Including(x)
            }
        }
    }
}

fn min_upper(a: Bound, b: Bound) -> Bound {
    use Bound::*;
    match (a, b) {
        (Unbounded, other) | (other, Unbounded) => other,
        (Including(x), Including(y)) => Including(x.min(y)),
        (Excluding(x), Excluding(y)) => Excluding(x.min(y)),
        (Including(x), Excluding(y)) | (Excluding(y), Including(x)) => {
            if y <= x {
                Excluding(y)
            } else {
                Including(x)
            }
        }
    }
}

impl fmt::Display for BoundSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Bound::*;
        match (&self.lower, &self.upper) {
            (Unbounded, Unbounded) => write!(f, "*"),
            (Including(l), Including(u)) if l == u => write!(f, "{l}"),
            (Unbounded, Including(u)) => write!(f, "<={u}"),
            (Unbounded, Excluding(u)) => write!(f, "<{u}"),
            (Including(l), Unbounded) => write!(f, ">={l}"),
            (Excluding(l), Unbounded) => write!(f, ">{l}"),
            (Including(l), Including(u)) => write!(f, ">={l} <={u}"),
            (Including(l), Excluding(u)) => write!(f, ">={l} <{u}"),
            (Excluding(l), Including(u)) => write!(f, ">{l} <={u}"),
            (Excluding(l), Excluding(u)) => write!(f, ">{l} <{u}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Exact,
    GreaterThan,
    GreaterThanEquals,
    LessThan,
    LessThanEquals,
}

#[derive(Debug, Clone)]
struct Partial {
    major: Option<u64>,
    minor: Option<u64>,
    patch: Option<u64>,
    pre_release: Vec<Identifier>,
    build: Vec<Identifier>,
}

impl Partial {
    fn filled(&self) -> Version {
        Version {
            major: self.major.unwrap_or(0),
            minor: self.minor.unwrap_or(0),
            patch: self.patch.unwrap_or(0),
            pre_release: self.pre_release.clone(),
            build: self.build.clone(),
        }
    }

    fn is_full(&self) -> bool {
        self.major.is_some() && self.minor.is_some() && self.patch.is_some()
    }
}

fn sentinel(major: u64, minor: u64, patch: u64) -> Version {
    Version {
        major,
        minor,
        patch,
        pre_release: vec![Identifier::Numeric(0)],
        build: Vec::new(),
    }
}

fn range_set(input: &str) -> IResult<&str, Range, SemverParseError<&str>> {
    context(
        "range set",
        map(
            delimited(
                space0,
                separated_list1(delimited(space0, tag("||"), space0), range),
                space0,
            ),
            |sets| Range(sets.into_iter().flatten().collect()),
        ),
    )(input)
}

fn range(input: &str) -> IResult<&str, Option<BoundSet>, SemverParseError<&str>> {
    alt((hyphen_range, conjunction))(input)
}

fn conjunction(input: &str) -> IResult<&str, Option<BoundSet>, SemverParseError<&str>> {
    map(separated_list1(space1, simple), |sets| {
        let mut iter = sets.into_iter();
        let first = iter.next().expect("separated_list1 is non-empty");
        iter.fold(first, |acc, next| match (acc, next) {
            (Some(a), Some(b)) => a.intersect(b),
            _ => None,
        })
    })(input)
}

fn hyphen_range(input: &str) -> IResult<&str, Option<BoundSet>, SemverParseError<&str>> {
    context(
        "hyphen range",
        map(
            tuple((partial, space1, tag("-"), space1, partial)),
            |(from, _, _, _, to)| {
                let lower = match from.major {
                    None => Bound::Unbounded,
                    Some(_) => Bound::Including(from.filled()),
                };
                let upper = match (to.major, to.minor, to.patch) {
                    (None, _, _) => Bound::Unbounded,
                    (Some(major), None, _) => Bound::Excluding(sentinel(major + 1, 0, 0)),
                    (Some(major), Some(minor), None) => {
                        Bound::Excluding(sentinel(major, minor + 1, 0))
                    }
                    (Some(_), Some(_), Some(_)) => Bound::Including(to.filled()),
                };
                Some(BoundSet { lower, upper })
            },
        ),
    )(input)
}

fn simple(input: &str) -> IResult<&str, Option<BoundSet>, SemverParseError<&str>> {
    alt((tilde, caret, primitive, plain))(input)
}

fn tilde(input: &str) -> IResult<&str, Option<BoundSet>, SemverParseError<&str>> {
    context(
        "tilde range",
        map(
            preceded(tuple((tag("~"), opt(tag(">")), space0)), partial),
            |p| {
                let bounds = match (p.major, p.minor, p.patch) {
                    (None, _, _) => BoundSet::any(),
                    (Some(major), None, _) => BoundSet {
                        lower: Bound::Including(Version::new(major, 0, 0)),
                        upper: Bound::Excluding(sentinel(major + 1, 0, 0)),
                    },
                    (Some(major), Some(minor), None) => BoundSet {
                        lower: Bound::Including(Version::new(major, minor, 0)),
                        upper: Bound::Excluding(sentinel(major, minor + 1, 0)),
                    },
                    (Some(major), Some(minor), Some(_)) => BoundSet {
                        lower: Bound::Including(p.filled()),
                        upper: Bound::Excluding(sentinel(major, minor + 1, 0)),
                    },
                };
                Some(bounds)
            },
        ),
    )(input)
}

fn caret(input: &str) -> IResult<&str, Option<BoundSet>, SemverParseError<&str>> {
    context(
        "caret range",
        map(preceded(tuple((tag("^"), space0)), partial), |p| {
            let bounds = match (p.major, p.minor, p.patch) {
                (None, _, _) => BoundSet::any(),
                (Some(major), None, _) => BoundSet {
                    lower: Bound::Including(Version::new(major, 0, 0)),
                    upper: Bound::Excluding(sentinel(major + 1, 0, 0)),
                },
                (Some(0), Some(minor), None) => BoundSet {
                    lower: Bound::Including(Version::new(0, minor, 0)),
                    upper: Bound::Excluding(sentinel(0, minor + 1, 0)),
                },
                (Some(major), Some(minor), None) => BoundSet {
                    lower: Bound::Including(Version::new(major, minor, 0)),
                    upper: Bound::Excluding(sentinel(major + 1, 0, 0)),
                },
                (Some(0), Some(0), Some(patch)) => BoundSet {
                    lower: Bound::Including(p.filled()),
                    upper: Bound::Excluding(sentinel(0, 0, patch + 1)),
                },
                (Some(0), Some(minor), Some(_)) => BoundSet {
                    lower: Bound::Including(p.filled()),
                    upper: Bound::Excluding(sentinel(0, minor + 1, 0)),
                },
                (Some(major), Some(_), Some(_)) => BoundSet {
                    lower: Bound::Including(p.filled()),
                    upper: Bound::Excluding(sentinel(major + 1, 0, 0)),
                },
            };
            Some(bounds)
        }),
    )(input)
}

fn primitive(input: &str) -> IResult<&str, Option<BoundSet>, SemverParseError<&str>> {
    context(
        "comparator",
        map(
            tuple((operation, space0, partial)),
            |(op, _, p)| primitive_bounds(op, p),
        ),
    )(input)
}

fn primitive_bounds(op: Operation, p: Partial) -> Option<BoundSet> {
    use Operation::*;
    match op {
        Exact => plain_bounds(p),
        GreaterThanEquals => match p.major {
            None => Some(BoundSet::any()),
            Some(_) => Some(BoundSet {
                lower: Bound::Including(p.filled()),
                upper: Bound::Unbounded,
            }),
        },
        GreaterThan => match (p.major, p.minor, p.patch) {
            // `>*` can never match.
            (None, _, _) => None,
            (Some(major), None, _) => Some(BoundSet {
                lower: Bound::Including(Version::new(major + 1, 0, 0)),
                upper: Bound::Unbounded,
            }),
            (Some(major), Some(minor), None) => Some(BoundSet {
                lower: Bound::Including(Version::new(major, minor + 1, 0)),
                upper: Bound::Unbounded,
            }),
            (Some(_), Some(_), Some(_)) => Some(BoundSet {
                lower: Bound::Excluding(p.filled()),
                upper: Bound::Unbounded,
            }),
        },
        LessThan => match (p.major, p.minor, p.patch) {
            (None, _, _) => None,
            (Some(major), None, _) => Some(BoundSet {
                lower: Bound::Unbounded,
                upper: Bound::Excluding(sentinel(major, 0, 0)),
            }),
            (Some(major), Some(minor), None) => Some(BoundSet {
                lower: Bound::Unbounded,
                upper: Bound::Excluding(sentinel(major, minor, 0)),
            }),
            (Some(_), Some(_), Some(_)) => Some(BoundSet {
                lower: Bound::Unbounded,
                upper: Bound::Excluding(p.filled()),
            }),
        },
        LessThanEquals => match (p.major, p.minor, p.patch) {
            (None, _, _) => Some(BoundSet::any()),
            (Some(major), None, _) => Some(BoundSet {
                lower: Bound::Unbounded,
                upper: Bound::Excluding(sentinel(major + 1, 0, 0)),
            }),
            (Some(major), Some(minor), None) => Some(BoundSet {
                lower: Bound::Unbounded,
                upper: Bound::Excluding(sentinel(major, minor + 1, 0)),
            }),
            (Some(_), Some(_), Some(_)) => Some(BoundSet {
                lower: Bound::Unbounded,
                upper: Bound::Including(p.filled()),
            }),
        },
    }
}

fn plain(input: &str) -> IResult<&str, Option<BoundSet>, SemverParseError<&str>> {
    map(partial, plain_bounds)(input)
}

fn plain_bounds(p: Partial) -> Option<BoundSet> {
    let bounds = match (p.major, p.minor, p.patch) {
        (None, _, _) => BoundSet::any(),
        (Some(major), None, _) => BoundSet {
            lower: Bound::Including(Version::new(major, 0, 0)),
            upper: Bound::Excluding(sentinel(major + 1, 0, 0)),
        },
        (Some(major), Some(minor), None) => BoundSet {
            lower: Bound::Including(Version::new(major, minor, 0)),
            upper: Bound::Excluding(sentinel(major, minor + 1, 0)),
        },
        (Some(_), Some(_), Some(_)) => BoundSet {
            lower: Bound::Including(p.filled()),
            upper: Bound::Including(p.filled()),
        },
    };
    Some(bounds)
}

fn operation(input: &str) -> IResult<&str, Operation, SemverParseError<&str>> {
    use Operation::*;
    alt((
        map(tag(">="), |_| GreaterThanEquals),
        map(tag("<="), |_| LessThanEquals),
        map(tag(">"), |_| GreaterThan),
        map(tag("<"), |_| LessThan),
        map(tag("="), |_| Exact),
    ))(input)
}

fn partial(input: &str) -> IResult<&str, Partial, SemverParseError<&str>> {
    context(
        "partial version",
        map(
            tuple((
                opt(alt((tag("v"), tag("=")))),
                xr,
                opt(preceded(tag("."), xr)),
                opt(preceded(tag("."), xr)),
                extras,
            )),
            |(_, major, minor, patch, (pre_release, build))| {
                let minor = minor.flatten();
                // `1.x.3` collapses to `1.x`.
                let patch = if minor.is_none() {
                    None
                } else {
                    patch.flatten()
                };
                Partial {
                    major,
                    minor,
                    patch,
                    pre_release: if patch.is_some() { pre_release } else { Vec::new() },
                    build: if patch.is_some() { build } else { Vec::new() },
                }
            },
        ),
    )(input)
}

fn xr(input: &str) -> IResult<&str, Option<u64>, SemverParseError<&str>> {
    alt((
        map(alt((tag("x"), tag("X"), tag("*"))), |_| None),
        map(number, Some),
    ))(input)
}
