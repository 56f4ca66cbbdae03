use std::fmt;
use std::str::FromStr;

use digest::DynDigest;
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};

use crate::error::IntegrityError;

/// Supported SRI hash algorithms. Ordering is by strength: `sha512` sorts
/// first, so the *minimum* of a set of algorithms is the strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Algorithm {
    Sha512,
    Sha384,
    Sha256,
    Sha1,
}

impl Algorithm {
    pub(crate) fn hasher(&self) -> Box<dyn DynDigest> {
        match self {
            Algorithm::Sha512 => Box::new(Sha512::default()),
            Algorithm::Sha384 => Box::new(Sha384::default()),
            Algorithm::Sha256 => Box::new(Sha256::default()),
            Algorithm::Sha1 => Box::new(Sha1::default()),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Algorithm::Sha512 => "sha512",
                Algorithm::Sha384 => "sha384",
                Algorithm::Sha256 => "sha256",
                Algorithm::Sha1 => "sha1",
            }
        )
    }
}

impl FromStr for Algorithm {
    type Err = IntegrityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha512" => Ok(Algorithm::Sha512),
            "sha384" => Ok(Algorithm::Sha384),
            "sha256" => Ok(Algorithm::Sha256),
            "sha1" => Ok(Algorithm::Sha1),
            _ => Err(IntegrityError::UnsupportedAlgorithm(s.into())),
        }
    }
}
