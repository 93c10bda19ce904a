//! Semantic version requirements.
//!
//! Versions are `major.minor.patch` (an optional leading `v` and any
//! pre-release or build suffix are ignored). Requirements:
//!
//! - `""`, `*` - any version
//! - `1.2.3`, `=1.2.3` - exact
//! - `>=1.2.3`, `>1.2.3`, `<=1.2.3`, `<1.2.3` - comparison
//! - `^1.2.3` - same major, at least the given version
//! - `~1.2.3` - same major and minor, at least the given version

use std::fmt;
use std::str::FromStr;

/// A parsed `major.minor.patch` version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SemVer {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SemVer {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a version string.
    ///
    /// Missing minor or patch components default to zero (`"2"` is `2.0.0`).
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let s = s.strip_prefix('v').unwrap_or(s);
        let core = s.split(['-', '+']).next()?;
        if core.is_empty() {
            return None;
        }

        let mut parts = core.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().map_or(Some(0), |p| p.parse().ok())?;
        let patch = parts.next().map_or(Some(0), |p| p.parse().ok())?;
        if parts.next().is_some() {
            return None;
        }

        Some(Self::new(major, minor, patch))
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for SemVer {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or("Invalid version format")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Requirement {
    Any,
    Exact(SemVer),
    GreaterOrEqual(SemVer),
    Greater(SemVer),
    LessOrEqual(SemVer),
    Less(SemVer),
    Caret(SemVer),
    Tilde(SemVer),
}

impl Requirement {
    fn parse(pattern: &str) -> Option<Self> {
        let pattern = pattern.trim();
        if pattern.is_empty() || pattern == "*" {
            return Some(Requirement::Any);
        }

        let (constructor, rest): (fn(SemVer) -> Requirement, &str) =
            if let Some(rest) = pattern.strip_prefix(">=") {
                (Requirement::GreaterOrEqual, rest)
            } else if let Some(rest) = pattern.strip_prefix("<=") {
                (Requirement::LessOrEqual, rest)
            } else if let Some(rest) = pattern.strip_prefix('>') {
                (Requirement::Greater, rest)
            } else if let Some(rest) = pattern.strip_prefix('<') {
                (Requirement::Less, rest)
            } else if let Some(rest) = pattern.strip_prefix('^') {
                (Requirement::Caret, rest)
            } else if let Some(rest) = pattern.strip_prefix('~') {
                (Requirement::Tilde, rest)
            } else if let Some(rest) = pattern.strip_prefix('=') {
                (Requirement::Exact, rest)
            } else {
                (Requirement::Exact, pattern)
            };

        SemVer::parse(rest).map(constructor)
    }

    fn matches(&self, version: SemVer) -> bool {
        match *self {
            Requirement::Any => true,
            Requirement::Exact(v) => version == v,
            Requirement::GreaterOrEqual(v) => version >= v,
            Requirement::Greater(v) => version > v,
            Requirement::LessOrEqual(v) => version <= v,
            Requirement::Less(v) => version < v,
            Requirement::Caret(v) => version.major == v.major && version >= v,
            Requirement::Tilde(v) => {
                version.major == v.major && version.minor == v.minor && version >= v
            }
        }
    }
}

/// Whether `version` satisfies `pattern`. Unparseable input never matches,
/// except that `*` and the empty pattern accept anything.
pub fn version_matches(version: &str, pattern: &str) -> bool {
    let Some(requirement) = Requirement::parse(pattern) else {
        return false;
    };
    if requirement == Requirement::Any {
        return true;
    }
    SemVer::parse(version).is_some_and(|v| requirement.matches(v))
}

/// Whether `pattern` is a well-formed requirement.
pub fn is_valid_requirement(pattern: &str) -> bool {
    Requirement::parse(pattern).is_some()
}
