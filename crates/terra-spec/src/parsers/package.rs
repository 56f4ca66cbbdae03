use nom::branch::alt;
use nom::error::context;
use nom::IResult;

use crate::error::SpecParseError;
use crate::parsers::{alias, npm};
use crate::PackageSpec;

/// package-spec := alias | npm-pkg
///
/// Workspace, git, url, and file specs appear as the version tail of an
/// npm-pkg (dependency-map values are parsed as `name@value`).
pub(crate) fn package_spec<'a>(
    input: &'a str,
) -> IResult<&'a str, PackageSpec, SpecParseError<&'a str>> {
    context("package spec", alt((alias::alias_spec, npm::npm_spec)))(input)
}
