//! Subresource Integrity (SRI) support: calculating, parsing, and verifying
//! `sha512-…`-style integrity strings over artifact bytes.

pub use algorithm::Algorithm;
pub use checker::IntegrityChecker;
pub use error::IntegrityError;
pub use integrity::{Hash, Integrity};
pub use opts::IntegrityOpts;

mod algorithm;
mod checker;
mod error;
mod integrity;
mod opts;
