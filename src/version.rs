//! Release identifiers and their ordering
//!
//! A release is `major[.minor[.patch]][-tag]`, or `major.minor.patch.tag` with
//! the tag as a fourth dot segment (`1.0.0.SNAPSHOT`). An untagged release
//! outranks any tagged release with the same numbers, the same precedence
//! semver gives a release over its pre-releases.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use semver::Prerelease;
use serde::{Deserialize, Serialize};

use crate::error::{CompatError, Result};
use crate::ordering::{lexicographic, Comparator};

/// At most `major.minor.patch.tag`.
const MAX_SEGMENTS: usize = 4;

/// A parsed release identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionId {
    major: u64,
    minor: u64,
    patch: u64,
    tag: Prerelease,
}

const FULL_KEYS: [Comparator<VersionId>; 4] = [
    |a, b| a.major.cmp(&b.major),
    |a, b| a.minor.cmp(&b.minor),
    |a, b| a.patch.cmp(&b.patch),
    // Prerelease orders the empty tag above every non-empty one.
    |a, b| a.tag.cmp(&b.tag),
];

const MAJOR_MINOR_KEYS: [Comparator<VersionId>; 2] = [
    |a, b| a.major.cmp(&b.major),
    |a, b| a.minor.cmp(&b.minor),
];

impl VersionId {
    /// Create an untagged release.
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            tag: Prerelease::EMPTY,
        }
    }

    /// Parse a release identifier, accepting an optional leading `v`.
    ///
    /// At most four `.`-separated segments are allowed, and dots inside the
    /// `-tag` count toward that limit: `1.0.0-rc.1` parses but
    /// `1.0.0-rc.1.2` is rejected as malformed.
    pub fn parse(input: &str) -> Result<Self> {
        let malformed = |reason: String| CompatError::MalformedVersion {
            input: input.to_string(),
            reason,
        };

        let trimmed = input.trim();
        let body = trimmed.strip_prefix('v').unwrap_or(trimmed);
        if body.is_empty() {
            return Err(malformed("empty version".to_string()));
        }

        let segment_count = body.split('.').count();
        if segment_count > MAX_SEGMENTS {
            return Err(malformed(format!(
                "{} segments, at most {} allowed",
                segment_count, MAX_SEGMENTS
            )));
        }

        let (core, mut tag) = match body.split_once('-') {
            Some((core, tag)) => (core, Some(tag.to_string())),
            None => (body, None),
        };

        let mut numbers: Vec<&str> = core.split('.').collect();
        if numbers.len() == MAX_SEGMENTS {
            if tag.is_some() {
                return Err(malformed(
                    "tag given both as fourth segment and '-' suffix".to_string(),
                ));
            }
            tag = numbers.pop().map(str::to_string);
        }

        let mut parsed = [0u64; 3];
        for (slot, segment) in parsed.iter_mut().zip(&numbers) {
            if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
                return Err(malformed(format!("'{}' is not numeric", segment)));
            }
            *slot = segment
                .parse()
                .map_err(|e| malformed(format!("'{}': {}", segment, e)))?;
        }

        let tag = match tag {
            None => Prerelease::EMPTY,
            Some(t) if t.is_empty() => return Err(malformed("empty tag".to_string())),
            Some(t) => Prerelease::new(&t).map_err(|e| malformed(format!("tag '{}': {}", t, e)))?,
        };

        Ok(Self {
            major: parsed[0],
            minor: parsed[1],
            patch: parsed[2],
            tag,
        })
    }

    pub fn major(&self) -> u64 {
        self.major
    }

    pub fn minor(&self) -> u64 {
        self.minor
    }

    pub fn patch(&self) -> u64 {
        self.patch
    }

    /// The pre-release tag, if any (e.g. `SNAPSHOT`)
    pub fn tag(&self) -> Option<&str> {
        if self.tag.is_empty() {
            None
        } else {
            Some(self.tag.as_str())
        }
    }

    /// Total order over (major, minor, patch, tag); untagged beats tagged.
    pub fn compare_full(&self, other: &Self) -> Ordering {
        lexicographic(self, other, &FULL_KEYS)
    }

    /// Order by (major, minor) only, ignoring patch level and tag.
    pub fn compare_major_minor(&self, other: &Self) -> Ordering {
        lexicographic(self, other, &MAJOR_MINOR_KEYS)
    }

    /// Same API line as `other` (equal major.minor)
    pub fn same_line_as(&self, other: &Self) -> bool {
        self.compare_major_minor(other) == Ordering::Equal
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.tag.is_empty() {
            write!(f, "-{}", self.tag)?;
        }
        Ok(())
    }
}

impl FromStr for VersionId {
    type Err = CompatError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VersionId {
    type Error = CompatError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<VersionId> for String {
    fn from(v: VersionId) -> Self {
        v.to_string()
    }
}

impl PartialOrd for VersionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare_full(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn v(s: &str) -> VersionId {
        VersionId::parse(s).unwrap()
    }

    #[test]
    fn test_version_parsing() {
        let id = v("1.2.3");
        assert_eq!((id.major(), id.minor(), id.patch()), (1, 2, 3));
        assert_eq!(id.tag(), None);
        assert_eq!(id.to_string(), "1.2.3");
    }

    #[test]
    fn test_version_with_v_prefix() {
        assert_eq!(v("v1.2.3"), v("1.2.3"));
    }

    #[rstest]
    #[case("1.0.0-SNAPSHOT", "SNAPSHOT")]
    #[case("1.0.0.SNAPSHOT", "SNAPSHOT")]
    #[case("1.0.0-rc.1", "rc.1")]
    #[case("2.1-beta", "beta")]
    fn test_tag_forms(#[case] input: &str, #[case] tag: &str) {
        assert_eq!(v(input).tag(), Some(tag));
    }

    #[test]
    fn test_short_forms_default_to_zero() {
        assert_eq!(v("1"), VersionId::new(1, 0, 0));
        assert_eq!(v("1.4"), VersionId::new(1, 4, 0));
    }

    #[rstest]
    #[case("1.2.3.4.5")]
    #[case("1.x.0")]
    #[case("")]
    #[case("1..2")]
    #[case("1.0.0-")]
    #[case("1.0.0.rc-1.2")]
    #[case("1.0.0-rc.1.2")]
    fn test_malformed(#[case] input: &str) {
        assert!(matches!(
            VersionId::parse(input),
            Err(CompatError::MalformedVersion { .. })
        ));
    }

    #[test]
    fn test_version_comparator() {
        let v1 = v("1.0.0");
        let v2 = v("1.0.1");
        assert_eq!(v1.compare_major_minor(&v2), Ordering::Equal);
        assert!(v1.compare_full(&v2).is_lt());

        let v2 = v("1.1.0");
        assert!(v1.compare_major_minor(&v2).is_lt());
        assert!(v1.compare_full(&v2).is_lt());

        let v2 = v("1.0.0-SNAPSHOT");
        assert!(v1.compare_full(&v2).is_gt());
    }

    #[rstest]
    #[case("1.0.0-alpha", "1.0.0-beta", Ordering::Less)]
    #[case("1.10.0", "1.9.0", Ordering::Greater)]
    #[case("1.0.0.SNAPSHOT", "1.0.0-SNAPSHOT", Ordering::Equal)]
    #[case("0.9.9", "1.0.0-SNAPSHOT", Ordering::Less)]
    fn test_compare_full_table(#[case] a: &str, #[case] b: &str, #[case] expected: Ordering) {
        assert_eq!(v(a).compare_full(&v(b)), expected);
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&v("1.2.0-SNAPSHOT")).unwrap();
        assert_eq!(json, "\"1.2.0-SNAPSHOT\"");
        let back: VersionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v("1.2.0-SNAPSHOT"));
        assert!(serde_json::from_str::<VersionId>("\"1.2.3.4.5\"").is_err());
    }
}
