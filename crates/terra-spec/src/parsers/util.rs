use nom::bytes::complete::take_till1;
use nom::IResult;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::error::{SpecErrorKind, SpecParseError};

const JS_ENCODED: &AsciiSet = {
    &NON_ALPHANUMERIC
        .remove(b'-')
        .remove(b'_')
        .remove(b'.')
        .remove(b'!')
        .remove(b'~')
        .remove(b'*')
        .remove(b'\'')
        .remove(b'(')
        .remove(b')')
};

/// Validates that a name segment wouldn't change under URL encoding.
pub(crate) fn no_url_encode(tag: &str) -> Result<&str, SpecErrorKind> {
    if utf8_percent_encode(tag, JS_ENCODED).to_string() == tag {
        Ok(tag)
    } else {
        Err(SpecErrorKind::InvalidCharacters(tag.into()))
    }
}

/// Consumes the entire (non-empty) remaining input.
pub(crate) fn rest1(input: &str) -> IResult<&str, &str, SpecParseError<&str>> {
    take_till1(|_| false)(input)
}
