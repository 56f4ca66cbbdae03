//! Version and range algebra for the `node_modules/` ecosystem. This is the
//! stuff that decides whether `1.2.3` satisfies `^1.2.0`, and which of a
//! packument's published versions wins for a given request.

pub use error::{SemverError, SemverErrorKind};
pub use range::{max_satisfying, Range};
pub use version::{coerce, Identifier, Version};

mod error;
mod range;
mod version;
