//! Release version tags and update negotiation.

use std::fmt;
use thiserror::Error;

/// A client or server release version: `major.minor`.
///
/// Comparison is purely numeric per component, left to right, so
/// `2.0 > 1.9` and `10.0 > 9.5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionTag {
    pub major: u16,
    pub minor: u16,
}

impl VersionTag {
    /// The release line this build belongs to.
    pub const CURRENT: VersionTag = VersionTag { major: 1, minor: 1 };

    /// Creates a new VersionTag.
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Parses a version string like "1.0".
    ///
    /// Exactly two numeric components are accepted; anything else is an
    /// `InvalidFormat` error. Callers negotiating an update treat that
    /// error as "no update needed" (fail closed).
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let (major, minor) = s
            .split_once('.')
            .ok_or_else(|| VersionError::InvalidFormat(s.to_string()))?;

        let major = major
            .parse::<u16>()
            .map_err(|_| VersionError::InvalidFormat(s.to_string()))?;
        let minor = minor
            .parse::<u16>()
            .map_err(|_| VersionError::InvalidFormat(s.to_string()))?;

        Ok(Self { major, minor })
    }

    /// Returns true if this version is strictly newer than another.
    pub fn is_newer_than(&self, other: &VersionTag) -> bool {
        (self.major, self.minor) > (other.major, other.minor)
    }
}

impl Default for VersionTag {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Decides whether a client must update to the server's release.
///
/// The client is outdated iff its major is smaller, or the majors are
/// equal and its minor is smaller. A client ahead of the server is not
/// asked to "update" backwards.
pub fn needs_update(client: &VersionTag, server: &VersionTag) -> bool {
    server.is_newer_than(client)
}

/// Errors that can occur when handling version strings.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("invalid version format: {0:?} (expected major.minor)")]
    InvalidFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let v = VersionTag::parse("1.0").unwrap();
        assert_eq!(v.major, 1);
        assert_eq!(v.minor, 0);

        let v = VersionTag::parse("12.34").unwrap();
        assert_eq!(v, VersionTag::new(12, 34));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(VersionTag::parse("").is_err());
        assert!(VersionTag::parse("1").is_err());
        assert!(VersionTag::parse("1.0.0").is_err());
        assert!(VersionTag::parse("abc").is_err());
        assert!(VersionTag::parse("a.b").is_err());
        assert!(VersionTag::parse("1.").is_err());
        assert!(VersionTag::parse(".1").is_err());
        assert!(VersionTag::parse(" 1.0").is_err());
        assert!(VersionTag::parse("-1.0").is_err());
    }

    #[test]
    fn test_needs_update_policy() {
        let parse = |s| VersionTag::parse(s).unwrap();

        assert!(needs_update(&parse("1.0"), &parse("1.1")));
        assert!(!needs_update(&parse("1.1"), &parse("1.1")));
        assert!(!needs_update(&parse("2.0"), &parse("1.9")));
    }

    #[test]
    fn test_comparison_is_numeric_not_lexical() {
        // "10" > "9" numerically even though it sorts lower as a string.
        assert!(VersionTag::new(10, 0).is_newer_than(&VersionTag::new(9, 5)));
        assert!(VersionTag::new(1, 10).is_newer_than(&VersionTag::new(1, 9)));
        assert!(needs_update(&VersionTag::new(1, 9), &VersionTag::new(1, 10)));
    }

    #[test]
    fn test_major_dominates_minor() {
        assert!(VersionTag::new(2, 0).is_newer_than(&VersionTag::new(1, 99)));
        assert!(!VersionTag::new(1, 99).is_newer_than(&VersionTag::new(2, 0)));
    }

    #[test]
    fn test_display_round_trip() {
        let v = VersionTag::new(1, 2);
        assert_eq!(format!("{v}"), "1.2");
        assert_eq!(VersionTag::parse(&v.to_string()).unwrap(), v);
    }

    #[test]
    fn test_current_is_not_outdated_against_itself() {
        assert!(!needs_update(&VersionTag::CURRENT, &VersionTag::CURRENT));
    }
}
