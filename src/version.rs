//! Three-part version parsing and ordering
//!
//! Every version string in the registry — release versions, mod versions and
//! game versions — uses the same `major.minor.patch` format with exactly
//! three non-negative integer components. There is no pre-release or build
//! metadata; anything that is not `digits.digits.digits` fails to parse.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VersionParseError {
    #[error("expected 3 version components, found {found}")]
    WrongComponentCount { found: usize },

    #[error("invalid version component: {component:?}")]
    InvalidComponent { component: String },
}

/// An immutable `major.minor.patch` triple.
///
/// The derived `Ord` compares component-wise, major first, which is the
/// total order used for release sorting and compatibility gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a version string into a [`Version`].
    ///
    /// Unlike lenient parsers, partial versions are not padded: `"1.2"` is
    /// an error, not `1.2.0`. Components must be plain ASCII digits, so
    /// `"1.2.x"`, `"1.2.-3"` and `"1.2.3-beta"` are all rejected.
    pub fn parse(text: &str) -> Result<Self, VersionParseError> {
        let parts: Vec<&str> = text.split('.').collect();
        if parts.len() != 3 {
            return Err(VersionParseError::WrongComponentCount { found: parts.len() });
        }

        let mut components = [0u32; 3];
        for (slot, part) in components.iter_mut().zip(&parts) {
            *slot = parse_component(part)?;
        }

        Ok(Self::new(components[0], components[1], components[2]))
    }

    /// Whether `text` is a well-formed three-part version.
    pub fn is_valid(text: &str) -> bool {
        Self::parse(text).is_ok()
    }
}

fn parse_component(part: &str) -> Result<u32, VersionParseError> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(VersionParseError::InvalidComponent {
            component: part.to_string(),
        });
    }
    part.parse()
        .map_err(|_| VersionParseError::InvalidComponent {
            component: part.to_string(),
        })
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
