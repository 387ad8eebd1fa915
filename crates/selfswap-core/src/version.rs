use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Dotted numeric version such as `1.0.12`.
///
/// The string is kept as given and only interpreted when compared, so a
/// malformed value can be carried around (for example inside a persisted
/// record) and rejected at the point of use.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn parse(&self) -> Result<Vec<u64>> {
        let trimmed = self.0.trim();
        let mut parts = Vec::new();
        for segment in trimmed.split('.') {
            if segment.is_empty() {
                continue;
            }
            if segment.starts_with('-') {
                return Err(self.invalid(format!("negative component '{segment}'")));
            }
            if !segment.bytes().all(|b| b.is_ascii_digit()) {
                return Err(self.invalid(format!("non-numeric component '{segment}'")));
            }
            let value = segment
                .parse::<u64>()
                .map_err(|err| self.invalid(format!("component '{segment}': {err}")))?;
            parts.push(value);
        }

        if parts.is_empty() {
            return Err(self.invalid("version is empty".to_string()));
        }
        Ok(parts)
    }

    /// Component-wise comparison; missing trailing components count as zero.
    pub fn compare(&self, other: &Version) -> Result<Ordering> {
        let left = self.parse()?;
        let right = other.parse()?;

        let len = left.len().max(right.len());
        for index in 0..len {
            let l = left.get(index).copied().unwrap_or(0);
            let r = right.get(index).copied().unwrap_or(0);
            match l.cmp(&r) {
                Ordering::Equal => continue,
                decided => return Ok(decided),
            }
        }
        Ok(Ordering::Equal)
    }

    pub fn is_greater(&self, other: &Version) -> Result<bool> {
        Ok(self.compare(other)? == Ordering::Greater)
    }

    pub fn is_lesser(&self, other: &Version) -> Result<bool> {
        Ok(self.compare(other)? == Ordering::Less)
    }

    pub fn is_equal(&self, other: &Version) -> Result<bool> {
        Ok(self.compare(other)? == Ordering::Equal)
    }

    pub fn valid(&self) -> bool {
        self.parse().is_ok()
    }

    fn invalid(&self, reason: String) -> Error {
        Error::InvalidVersion {
            input: self.0.clone(),
            reason,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Version {
    type Err = Error;

    /// Unlike [`Version::new`], rejects malformed input up front.
    fn from_str(s: &str) -> Result<Self> {
        let version = Self::new(s);
        version.parse()?;
        Ok(version)
    }
}

impl From<&str> for Version {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Version {
    fn from(value: String) -> Self {
        Self(value)
    }
}
