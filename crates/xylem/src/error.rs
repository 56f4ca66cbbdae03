use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;
use terra_spec::PackageSpec;

pub type Result<T> = std::result::Result<T, XylemError>;

#[derive(Debug, Error, Diagnostic)]
pub enum XylemError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    ClientError(#[from] terra_client::ClientError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    PackageSpecError(#[from] terra_spec::PackageSpecError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    IntegrityError(#[from] terra_integrity::IntegrityError),

    /// No version in the packument satisfied the requested spec.
    #[error("No version of {name} satisfied {requested}. Available versions: {}", .versions.join(", "))]
    #[diagnostic(
        code(xylem::no_version),
        help("Try widening the requested range, or check whether the version you want was unpublished.")
    )]
    NoVersion {
        name: String,
        requested: String,
        versions: Vec<String>,
    },

    /// The registry metadata for a version is missing its tarball URL.
    #[error("{0}@{1} has no tarball URL in its registry metadata.")]
    #[diagnostic(code(xylem::no_tarball))]
    NoTarball(String, String),

    /// Only registry specs can be resolved here; git/url/dir sources are
    /// recorded but fetched through other channels.
    #[error("`{0}` cannot be resolved against a registry.")]
    #[diagnostic(code(xylem::unsupported_spec))]
    UnsupportedSpec(PackageSpec),

    #[error("{2}")]
    #[diagnostic(code(xylem::extract_io_error))]
    ExtractIoError(#[source] std::io::Error, Option<PathBuf>, String),

    /// A tarball entry tried to escape the extraction directory.
    #[error("Tarball entry `{0}` escapes the extraction directory.")]
    #[diagnostic(code(xylem::malicious_tarball))]
    MaliciousTarball(String),
}
