//! Content digests for row values

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

/// Checksum algorithm type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChecksumAlgorithm::Sha256 => write!(f, "sha256"),
            ChecksumAlgorithm::Sha512 => write!(f, "sha512"),
        }
    }
}

/// Hash a sequence of string parts joined by `separator`.
///
/// Equivalent to hashing `parts.join(separator)` without allocating the
/// joined string.
pub fn digest_parts<I, S>(parts: I, separator: &str, algorithm: ChecksumAlgorithm) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    match algorithm {
        ChecksumAlgorithm::Sha256 => digest_joined::<Sha256, I, S>(parts, separator),
        ChecksumAlgorithm::Sha512 => digest_joined::<Sha512, I, S>(parts, separator),
    }
}

fn digest_joined<D, I, S>(parts: I, separator: &str) -> String
where
    D: Digest,
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = D::new();
    for (i, part) in parts.into_iter().enumerate() {
        if i > 0 {
            hasher.update(separator.as_bytes());
        }
        hasher.update(part.as_ref().as_bytes());
    }
    hex::encode(hasher.finalize())
}
