use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum IntegrityError {
    /// Asked to hash with an algorithm outside the supported SRI set.
    #[error("`{0}` is not a supported subresource integrity algorithm.")]
    #[diagnostic(
        code(terra_integrity::unsupported_algorithm),
        help("Supported algorithms are sha512, sha384, sha256, and sha1.")
    )]
    UnsupportedAlgorithm(String),

    /// An integrity token didn't look like `<algorithm>-<base64 digest>`.
    #[error("Failed to parse subresource integrity token `{0}`.")]
    #[diagnostic(code(terra_integrity::parse_error))]
    ParseIntegrityError(String),

    /// Data did not match any of the digests it was checked against.
    #[error("Integrity check failed.\n\nWanted: {expected}\n Found: {actual}")]
    #[diagnostic(
        code(terra_integrity::integrity_check_failure),
        help("This usually means the downloaded data was corrupted or truncated in transit. Retrying the download may help.")
    )]
    IntegrityCheckFailed { expected: String, actual: String },
}
