use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::algorithm::Algorithm;
use crate::error::IntegrityError;
use crate::opts::IntegrityOpts;

/// A single `<algorithm>-<base64 digest>` hash entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash {
    pub algorithm: Algorithm,
    pub digest: String,
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.algorithm, self.digest)
    }
}

/// A parsed SRI string: one or more whitespace-separated hash tokens.
///
/// Tokens for algorithms outside the supported set are preserved verbatim
/// for round-tripping, but never used for verification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Integrity {
    pub hashes: Vec<Hash>,
    pub(crate) opaque: Vec<String>,
}

impl Integrity {
    /// Hash `data` with `algorithm` and wrap the result in an SRI string.
    pub fn calculate(data: impl AsRef<[u8]>, algorithm: Algorithm) -> Integrity {
        IntegrityOpts::new()
            .algorithm(algorithm)
            .chain(data)
            .result()
    }

    /// True if `data` hashes to a digest matching *any* supported token.
    /// An integrity with no supported tokens never verifies.
    pub fn verify(&self, data: impl AsRef<[u8]>) -> bool {
        let data = data.as_ref();
        self.hashes.iter().any(|hash| {
            let computed = Integrity::calculate(data, hash.algorithm);
            computed
                .hashes
                .first()
                .map(|c| constant_time_eq(c.digest.as_bytes(), hash.digest.as_bytes()))
                .unwrap_or(false)
        })
    }

    /// Like [`Integrity::verify`], but returns a descriptive error on
    /// mismatch, naming the strongest expected digest.
    pub fn check(&self, data: impl AsRef<[u8]>) -> Result<Algorithm, IntegrityError> {
        let data = data.as_ref();
        if self.verify(data) {
            Ok(self
                .strongest()
                .expect("verification cannot succeed without a supported hash"))
        } else {
            let actual = self
                .strongest()
                .map(|algo| Integrity::calculate(data, algo).to_string())
                .unwrap_or_else(|| "(no supported algorithms)".into());
            Err(IntegrityError::IntegrityCheckFailed {
                expected: self.to_string(),
                actual,
            })
        }
    }

    /// The strongest supported algorithm present, if any.
    pub fn strongest(&self) -> Option<Algorithm> {
        self.hashes.iter().map(|h| h.algorithm).min()
    }

    /// The hash entry for the strongest supported algorithm present.
    pub fn strongest_hash(&self) -> Option<&Hash> {
        self.hashes.iter().min_by_key(|h| h.algorithm)
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty() && self.opaque.is_empty()
    }
}

impl fmt::Display for Integrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for hash in &self.hashes {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{hash}")?;
            first = false;
        }
        for token in &self.opaque {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{token}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for Integrity {
    type Err = IntegrityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut hashes = Vec::new();
        let mut opaque = Vec::new();
        for token in s.split_whitespace() {
            let (algorithm, rest) = token
                .split_once('-')
                .ok_or_else(|| IntegrityError::ParseIntegrityError(token.into()))?;
            if rest.is_empty() {
                return Err(IntegrityError::ParseIntegrityError(token.into()));
            }
            // `?option=value` suffixes are tolerated and dropped.
            let digest = rest.split('?').next().unwrap_or(rest);
            match algorithm.parse::<Algorithm>() {
                Ok(algorithm) => hashes.push(Hash {
                    algorithm,
                    digest: digest.into(),
                }),
                Err(_) => opaque.push(token.into()),
            }
        }
        Ok(Integrity { hashes, opaque })
    }
}

impl serde::Serialize for Integrity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Integrity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct IntegrityVisitor;

        impl<'de> serde::de::Visitor<'de> for IntegrityVisitor {
            type Value = Integrity;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a subresource integrity string")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                v.parse().map_err(serde::de::Error::custom)
            }
        }

        deserializer.deserialize_str(IntegrityVisitor)
    }
}

pub(crate) fn encode_digest(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Equality that doesn't leak, through timing, how much of a digest matched.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case(Algorithm::Sha512)]
    #[test_case(Algorithm::Sha384)]
    #[test_case(Algorithm::Sha256)]
    #[test_case(Algorithm::Sha1)]
    fn calculate_verify_round_trip(algorithm: Algorithm) {
        let data = b"Hello, World!";
        let integrity = Integrity::calculate(data, algorithm);
        assert!(integrity.verify(data));
        assert!(!integrity.verify(b"Different"));
    }

    #[test]
    fn known_sha512_digest() {
        let integrity = Integrity::calculate(b"hello world", Algorithm::Sha512);
        assert_eq!(
            integrity.to_string(),
            "sha512-MJ7MSJwS1utMxA9QyQLytNDtd+5RGnx6m808qG1M2G+YndNbxf9JlnDaNCVbRbDP2DDoH2Bdz33FVC6TrpzXbw=="
        );
    }

    #[test]
    fn parse_multi_hash_picks_strongest() {
        let integrity: Integrity = "sha1-deadbeef sha512-c0ffee".parse().unwrap();
        assert_eq!(integrity.strongest(), Some(Algorithm::Sha512));
        assert_eq!(
            integrity.strongest_hash().map(|h| h.digest.as_str()),
            Some("c0ffee")
        );
    }

    #[test]
    fn parse_tolerates_case_and_options() {
        let integrity: Integrity = "SHA256-abc123?foo=bar".parse().unwrap();
        assert_eq!(integrity.hashes[0].algorithm, Algorithm::Sha256);
        assert_eq!(integrity.hashes[0].digest, "abc123");
    }

    #[test]
    fn unknown_algorithms_are_preserved_but_not_verified() {
        let integrity: Integrity = "md5-abcdef".parse().unwrap();
        assert!(integrity.hashes.is_empty());
        assert_eq!(integrity.to_string(), "md5-abcdef");
        assert!(!integrity.verify(b"anything"));
        assert_eq!(integrity.strongest(), None);
    }

    #[test]
    fn empty_integrity_never_verifies() {
        let integrity: Integrity = "".parse().unwrap();
        assert!(!integrity.verify(b"anything"));
    }

    #[test]
    fn bad_tokens_fail_to_parse() {
        assert!("justgarbage".parse::<Integrity>().is_err());
        assert!("sha512-".parse::<Integrity>().is_err());
    }

    #[test]
    fn check_reports_mismatch() {
        let integrity = Integrity::calculate(b"original", Algorithm::Sha512);
        let err = integrity.check(b"tampered").unwrap_err();
        assert!(matches!(
            err,
            IntegrityError::IntegrityCheckFailed { .. }
        ));
    }
}
