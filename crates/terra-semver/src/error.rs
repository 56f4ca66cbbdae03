use miette::{Diagnostic, SourceSpan};
use nom::error::{ContextError, ErrorKind, FromExternalError, ParseError};
use thiserror::Error;

/// Error returned when a version or range string fails to parse.
#[derive(Debug, Error, Diagnostic)]
#[error("{kind}")]
#[diagnostic(
    code(terra_semver::parse_error),
    help("Check the version or range string for typos.")
)]
pub struct SemverError {
    #[source_code]
    pub input: String,
    #[label("here")]
    pub span: SourceSpan,
    pub kind: SemverErrorKind,
}

impl SemverError {
    pub fn offset(&self) -> usize {
        self.span.offset()
    }
}

#[derive(Debug, Error)]
pub enum SemverErrorKind {
    #[error("Component value is larger than the maximum of {0}.")]
    MaxIntOverflow(u64),
    #[error("Failed to parse the {0} component of the semver string.")]
    Context(&'static str),
    #[error("No valid ranges could be parsed.")]
    NoValidRanges,
    #[error("Incomplete input to semver parser.")]
    IncompleteInput,
    #[error("An unspecified error occurred.")]
    Other,
}

#[derive(Debug)]
pub(crate) struct SemverParseError<I> {
    pub(crate) input: I,
    pub(crate) context: Option<&'static str>,
    pub(crate) kind: Option<SemverErrorKind>,
}

impl<I> ParseError<I> for SemverParseError<I> {
    fn from_error_kind(input: I, _kind: nom::error::ErrorKind) -> Self {
        Self {
            input,
            context: None,
            kind: None,
        }
    }

    fn append(_input: I, _kind: nom::error::ErrorKind, other: Self) -> Self {
        other
    }
}

impl<I> ContextError<I> for SemverParseError<I> {
    fn add_context(_input: I, ctx: &'static str, mut other: Self) -> Self {
        other.context = Some(ctx);
        other
    }
}

impl<'a> FromExternalError<&'a str, SemverParseError<&'a str>> for SemverParseError<&'a str> {
    fn from_external_error(_input: &'a str, _kind: ErrorKind, e: SemverParseError<&'a str>) -> Self {
        e
    }
}

pub(crate) fn into_error(input: &str, err: nom::Err<SemverParseError<&str>>) -> SemverError {
    match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => SemverError {
            input: input.into(),
            span: (input.len() - e.input.len(), 0).into(),
            kind: if let Some(kind) = e.kind {
                kind
            } else if let Some(ctx) = e.context {
                SemverErrorKind::Context(ctx)
            } else {
                SemverErrorKind::Other
            },
        },
        nom::Err::Incomplete(_) => SemverError {
            input: input.into(),
            span: (input.len().saturating_sub(1), 0).into(),
            kind: SemverErrorKind::IncompleteInput,
        },
    }
}
