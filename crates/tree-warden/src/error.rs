use miette::Diagnostic;
use thiserror::Error;

#[allow(clippy::large_enum_variant)]
#[derive(Debug, Error, Diagnostic)]
pub enum WardenError {
    /// A dependency could not be resolved to any version.
    #[error("Failed to resolve {name}@{spec}.")]
    #[diagnostic(
        code(tree_warden::resolve_error),
        help("Retrying the install may help if this was a network hiccup. Otherwise, check that the requested range matches a published version.")
    )]
    ResolveError {
        name: String,
        spec: String,
        #[source]
        source: Box<WardenError>,
    },

    /// No tree position could accept the resolved package.
    #[error("Could not place {name}@{version} (requested as {name}@{spec}): it conflicts with {conflict_name}@{conflict_version}.")]
    #[diagnostic(
        code(tree_warden::placement_conflict),
        help("Some already-placed dependency requires an incompatible version of this package.")
    )]
    PlacementConflict {
        name: String,
        version: String,
        spec: String,
        conflict_name: String,
        conflict_version: String,
    },

    /// The resolved tree doesn't match the lockfile, and `--locked` was
    /// requested.
    #[error("The resolved dependency tree does not match the lockfile ({added} added, {removed} removed, {updated} updated).")]
    #[diagnostic(
        code(tree_warden::locked_mismatch),
        help("Rerun without --locked to update the lockfile, or restore the previous manifest.")
    )]
    LockedMismatch {
        added: usize,
        removed: usize,
        updated: usize,
    },

    /// Lockfile JSON failed to parse at all.
    #[error("Failed to parse lockfile.")]
    #[diagnostic(code(tree_warden::lockfile_parse_error))]
    LockfileParseError(#[source] serde_json::Error),

    #[error("Unsupported lockfile version: {0}.")]
    #[diagnostic(code(tree_warden::invalid_lockfile_version))]
    InvalidLockfileVersion(u64),

    /// Missing version for a package entry in a lockfile.
    #[error("Missing version for lockfile entry `{0}`.")]
    #[diagnostic(code(tree_warden::missing_version))]
    MissingVersion(String),

    #[error("Failed to parse yarn lockfile at line {line}: {message}")]
    #[diagnostic(code(tree_warden::yarn_parse_error))]
    YarnParseError { line: usize, message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    XylemError(#[from] xylem::XylemError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    ClientError(#[from] terra_client::ClientError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    SemverError(#[from] terra_semver::SemverError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    PackageSpecError(#[from] terra_spec::PackageSpecError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    IntegrityError(#[from] terra_integrity::IntegrityError),

    #[error("{context}")]
    #[diagnostic(code(tree_warden::io_error))]
    IoError {
        #[source]
        source: std::io::Error,
        context: String,
    },

    #[error("{0}")]
    #[diagnostic(code(tree_warden::miscellaneous_error))]
    MiscError(String),
}

/// Attaches human-readable context to io errors at the call site.
pub(crate) trait IoContext<T> {
    fn io_context(self, context: impl FnOnce() -> String) -> Result<T, WardenError>;
}

impl<T> IoContext<T> for std::result::Result<T, std::io::Error> {
    fn io_context(self, context: impl FnOnce() -> String) -> Result<T, WardenError> {
        self.map_err(|source| WardenError::IoError {
            source,
            context: context(),
        })
    }
}
