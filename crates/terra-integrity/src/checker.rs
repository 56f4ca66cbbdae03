use crate::algorithm::Algorithm;
use crate::error::IntegrityError;
use crate::integrity::Integrity;
use crate::opts::IntegrityOpts;

/// Streaming verifier: hashes data as it arrives and compares against the
/// strongest supported token of the expected [`Integrity`] at the end.
pub struct IntegrityChecker {
    expected: Integrity,
    opts: IntegrityOpts,
}

impl IntegrityChecker {
    pub fn new(expected: Integrity) -> Self {
        let mut opts = IntegrityOpts::new();
        if let Some(algorithm) = expected.strongest() {
            opts = opts.algorithm(algorithm);
        }
        Self { expected, opts }
    }

    pub fn input(&mut self, data: impl AsRef<[u8]>) {
        self.opts.input(data);
    }

    pub fn result(self) -> Result<Algorithm, IntegrityError> {
        let algorithm = self.expected.strongest().ok_or_else(|| {
            IntegrityError::IntegrityCheckFailed {
                expected: self.expected.to_string(),
                actual: "(no supported algorithms)".into(),
            }
        })?;
        let actual = self.opts.result();
        let expected_hash = self
            .expected
            .strongest_hash()
            .expect("strongest() was Some, so a hash exists");
        if actual.hashes.first().map(|h| &h.digest) == Some(&expected_hash.digest) {
            Ok(algorithm)
        } else {
            Err(IntegrityError::IntegrityCheckFailed {
                expected: self.expected.to_string(),
                actual: actual.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streaming_matches_one_shot() {
        let expected = Integrity::calculate(b"chunk one chunk two", Algorithm::Sha256);
        let mut checker = IntegrityChecker::new(expected);
        checker.input(b"chunk one ");
        checker.input(b"chunk two");
        assert_eq!(checker.result().unwrap(), Algorithm::Sha256);
    }

    #[test]
    fn streaming_mismatch_fails() {
        let expected = Integrity::calculate(b"the real data", Algorithm::Sha512);
        let mut checker = IntegrityChecker::new(expected);
        checker.input(b"not the real data");
        assert!(checker.result().is_err());
    }
}
