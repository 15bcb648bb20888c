//! Checksum utilities for columnar artifact integrity

use sha2::{Digest, Sha256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// SHA256 checksum, hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Incremental checksum over a sequence of chunks.
///
/// Each chunk is hashed with a trailing newline so that the split points
/// are part of the digest.
#[derive(Default)]
pub struct ChecksumBuilder {
    hasher: Sha256,
}

impl ChecksumBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.hasher.update(b"\n");
    }

    pub fn finish(self) -> Checksum {
        Checksum(format!("{:x}", self.hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checksum_of(chunks: &[&[u8]]) -> Checksum {
        let mut builder = ChecksumBuilder::new();
        for chunk in chunks {
            builder.update(chunk);
        }
        builder.finish()
    }

    #[test]
    fn test_checksum_consistency() {
        let content: &[u8] = b"1|2|widget";
        assert_eq!(checksum_of(&[content]), checksum_of(&[content]));
        assert_ne!(checksum_of(&[content]), checksum_of(&[b"1|2|gadget"]));
    }

    #[test]
    fn test_split_points_change_the_digest() {
        assert_ne!(checksum_of(&[b"first", b"second"]), checksum_of(&[b"firstsecond"]));
        assert_ne!(checksum_of(&[b"first", b"second"]), checksum_of(&[b"second", b"first"]));
    }

    #[test]
    fn test_display_is_hex_sha256() {
        let shown = checksum_of(&[b"row group"]).to_string();
        assert_eq!(shown.len(), 64);
        assert!(shown.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
