use digest::DynDigest;

use crate::algorithm::Algorithm;
use crate::integrity::{encode_digest, Hash, Integrity};

/// Incremental builder for [`Integrity`] values. Feed it data in chunks and
/// call [`IntegrityOpts::result`] to get the finished SRI value.
pub struct IntegrityOpts {
    hashers: Vec<(Algorithm, Box<dyn DynDigest>)>,
}

impl IntegrityOpts {
    pub fn new() -> Self {
        Self {
            hashers: Vec::new(),
        }
    }

    /// Add an algorithm to hash with. Can be called multiple times.
    pub fn algorithm(mut self, algorithm: Algorithm) -> Self {
        if !self.hashers.iter().any(|(a, _)| *a == algorithm) {
            self.hashers.push((algorithm, algorithm.hasher()));
        }
        self
    }

    pub fn input(&mut self, data: impl AsRef<[u8]>) {
        for (_, hasher) in &mut self.hashers {
            hasher.update(data.as_ref());
        }
    }

    pub fn chain(mut self, data: impl AsRef<[u8]>) -> Self {
        self.input(data);
        self
    }

    pub fn result(self) -> Integrity {
        let mut hashes = self
            .hashers
            .into_iter()
            .map(|(algorithm, hasher)| Hash {
                algorithm,
                digest: encode_digest(&hasher.finalize()),
            })
            .collect::<Vec<_>>();
        hashes.sort();
        Integrity {
            hashes,
            opaque: Vec::new(),
        }
    }
}

impl Default for IntegrityOpts {
    fn default() -> Self {
        Self::new()
    }
}
