//! Version compatibility checks

use std::cmp::Ordering;
use std::str::FromStr;

/// Version of this build of isle
pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("Invalid version: {0}")]
    Invalid(String),

    #[error("This project requires isle {required} or newer, but {current} is installed. Run `cargo install isle` to update.")]
    Incompatible { required: Version, current: Version },
}

impl FromStr for Version {
    type Err = VersionError;

    /// Accepts `1.2.3`, `1.2` and a leading `v`. Pre-release and build
    /// suffixes (`-rc.1`, `+abc`) are ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let unprefixed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let numeric = unprefixed.split(['-', '+']).next().unwrap_or(unprefixed);

        let parts: Vec<&str> = numeric.split('.').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(VersionError::Invalid(s.to_string()));
        }
        let number = |part: &str| {
            part.parse::<u64>()
                .map_err(|_| VersionError::Invalid(s.to_string()))
        };
        Ok(Version {
            major: number(parts[0])?,
            minor: number(parts[1])?,
            patch: match parts.get(2) {
                Some(&p) => number(p)?,
                None => 0,
            },
        })
    }
}

/// Fail unless `current` is at least `required`
pub fn ensure_min_version(current: &str, required: &str) -> Result<(), VersionError> {
    let current: Version = current.parse()?;
    let required: Version = required.parse()?;
    match current.cmp(&required) {
        Ordering::Less => Err(VersionError::Incompatible { required, current }),
        _ => Ok(()),
    }
}

/// Whether `candidate` is strictly newer than `current`
pub fn is_newer(candidate: &str, current: &str) -> bool {
    match (candidate.parse::<Version>(), current.parse::<Version>()) {
        (Ok(candidate), Ok(current)) => candidate > current,
        _ => false,
    }
}
