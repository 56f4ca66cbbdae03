use std::path::PathBuf;

use nom::branch::alt;
use nom::bytes::complete::{tag_no_case as tag, take_till1};
use nom::character::complete::char;
use nom::combinator::{cut, map, map_res, opt, peek, recognize};
use nom::error::context;
use nom::sequence::{delimited, preceded, tuple};
use nom::IResult;
use terra_semver::{Range, Version};
use url::Url;

use crate::error::SpecParseError;
use crate::parsers::util;
use crate::{PackageSpec, VersionSpec};

enum Tail {
    Version(VersionSpec),
    Workspace(String),
    Git(String),
    Url(Url),
    Dir(PathBuf),
}

/// npm-spec := [ '@' not('/')+ '/' ] not('@/')+ [ '@' tail ]
pub(crate) fn npm_spec<'a>(
    input: &'a str,
) -> IResult<&'a str, PackageSpec, SpecParseError<&'a str>> {
    context(
        "npm package spec",
        map(
            tuple((
                opt(scope),
                map_res(take_till1(|x| x == '@' || x == '/'), util::no_url_encode),
                opt(preceded(char('@'), cut(tail))),
            )),
            |(scope_opt, name, tail)| {
                let name = if let Some(scope) = &scope_opt {
                    format!("@{scope}/{name}")
                } else {
                    name.into()
                };
                match tail {
                    None => PackageSpec::Npm {
                        scope: scope_opt,
                        name,
                        requested: None,
                    },
                    Some(Tail::Version(requested)) => PackageSpec::Npm {
                        scope: scope_opt,
                        name,
                        requested: Some(requested),
                    },
                    Some(Tail::Workspace(raw)) => PackageSpec::Workspace { name, raw },
                    Some(Tail::Git(raw)) => PackageSpec::Git { name, raw },
                    Some(Tail::Url(url)) => PackageSpec::Url { name, url },
                    Some(Tail::Dir(path)) => PackageSpec::Dir { name, path },
                }
            },
        ),
    )(input)
}

pub(crate) fn scope<'a>(input: &'a str) -> IResult<&'a str, String, SpecParseError<&'a str>> {
    context(
        "scope",
        map(
            delimited(
                char('@'),
                map_res(take_till1(|c| c == '/' || c == '@'), util::no_url_encode),
                char('/'),
            ),
            String::from,
        ),
    )(input)
}

fn tail<'a>(input: &'a str) -> IResult<&'a str, Tail, SpecParseError<&'a str>> {
    context(
        "version tail",
        alt((workspace_tail, dir_tail, git_tail, url_tail, version_req)),
    )(input)
}

fn workspace_tail<'a>(input: &'a str) -> IResult<&'a str, Tail, SpecParseError<&'a str>> {
    map(preceded(tag("workspace:"), util::rest1), |raw: &str| {
        Tail::Workspace(raw.into())
    })(input)
}

fn dir_tail<'a>(input: &'a str) -> IResult<&'a str, Tail, SpecParseError<&'a str>> {
    alt((
        map(preceded(tag("file:"), util::rest1), |path: &str| {
            Tail::Dir(PathBuf::from(path))
        }),
        map(
            recognize(preceded(
                peek(alt((tag("./"), tag("../"), tag("/"), tag("~/")))),
                util::rest1,
            )),
            |path: &str| Tail::Dir(PathBuf::from(path)),
        ),
    ))(input)
}

fn git_tail<'a>(input: &'a str) -> IResult<&'a str, Tail, SpecParseError<&'a str>> {
    map(
        recognize(preceded(
            peek(alt((
                tag("git+"),
                tag("git:"),
                tag("github:"),
                tag("gitlab:"),
                tag("bitbucket:"),
                tag("gist:"),
                tag("ssh://"),
            ))),
            util::rest1,
        )),
        |raw: &str| Tail::Git(raw.into()),
    )(input)
}

fn url_tail<'a>(input: &'a str) -> IResult<&'a str, Tail, SpecParseError<&'a str>> {
    map_res(
        recognize(preceded(
            peek(alt((tag("http://"), tag("https://")))),
            util::rest1,
        )),
        |raw: &str| Url::parse(raw).map(Tail::Url),
    )(input)
}

fn version_req<'a>(input: &'a str) -> IResult<&'a str, Tail, SpecParseError<&'a str>> {
    context(
        "version requirement",
        map(
            alt((semver_version, semver_range, version_tag)),
            Tail::Version,
        ),
    )(input)
}

fn semver_version<'a>(input: &'a str) -> IResult<&'a str, VersionSpec, SpecParseError<&'a str>> {
    let (input, version) = map_res(util::rest1, Version::parse)(input)?;
    Ok((input, VersionSpec::Version(version)))
}

fn semver_range<'a>(input: &'a str) -> IResult<&'a str, VersionSpec, SpecParseError<&'a str>> {
    let (input, range) = map_res(util::rest1, Range::parse)(input)?;
    Ok((input, VersionSpec::Range(range)))
}

fn version_tag<'a>(input: &'a str) -> IResult<&'a str, VersionSpec, SpecParseError<&'a str>> {
    context(
        "dist tag",
        map(map_res(util::rest1, util::no_url_encode), |t| {
            VersionSpec::Tag(t.into())
        }),
    )(input)
}
