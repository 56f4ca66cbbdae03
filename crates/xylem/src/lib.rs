//! Package-level interface for the Terrane stack: resolving a spec against
//! a registry packument to one concrete version, then downloading and
//! extracting that version's tarball.

pub use client::{Xylem, XylemOpts};
pub use error::{Result, XylemError};
pub use package::Package;
pub use resolver::PackageResolution;
pub use tarball::{extract_tarball, extract_to_dir, read_entry};

mod client;
mod error;
mod package;
mod resolver;
mod tarball;
