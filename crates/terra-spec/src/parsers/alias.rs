use nom::bytes::complete::{tag_no_case as tag, take_till1};
use nom::combinator::{cut, map, map_res, opt};
use nom::error::context;
use nom::sequence::{preceded, tuple};
use nom::IResult;

use crate::error::SpecParseError;
use crate::parsers::{npm, util};
use crate::PackageSpec;

// alias_spec := [ scope '/' ] not('@/')+ '@npm:' npm-pkg
pub(crate) fn alias_spec<'a>(
    input: &'a str,
) -> IResult<&'a str, PackageSpec, SpecParseError<&'a str>> {
    context(
        "alias",
        map(
            tuple((
                opt(npm::scope),
                map_res(take_till1(|c| c == '@' || c == '/'), util::no_url_encode),
                tag("@"),
                preceded(tag("npm:"), cut(npm::npm_spec)),
            )),
            |(scope, name, _, spec)| {
                let mut fullname = String::new();
                if let Some(scope) = scope {
                    fullname.push('@');
                    fullname.push_str(&scope);
                    fullname.push('/');
                }
                fullname.push_str(name);
                PackageSpec::Alias {
                    name: fullname,
                    spec: Box::new(spec),
                }
            },
        ),
    )(input)
}
