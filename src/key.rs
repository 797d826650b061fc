//! Deterministic cache-key construction and parsing.
//!
//! Keys have the wire-visible form `prefix:identifier[:suffix][:vN]`.
//! Parsing is the exact inverse of generation for every combination of the
//! optional fields, with two caller obligations: the identifier must not
//! contain `:` (suffixes may), and a suffix's final segment must not look
//! like a version tag (`v` followed by digits), since a trailing `vN`
//! segment always parses as the version.

use std::fmt;
use std::str::FromStr;

use crate::error::CacheError;

/// The fixed set of key prefixes visible in the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyPrefix {
    User,
    Work,
    Ranking,
    Kg,
    Session,
    Api,
    Temp,
}

impl KeyPrefix {
    pub const ALL: [KeyPrefix; 7] = [
        KeyPrefix::User,
        KeyPrefix::Work,
        KeyPrefix::Ranking,
        KeyPrefix::Kg,
        KeyPrefix::Session,
        KeyPrefix::Api,
        KeyPrefix::Temp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyPrefix::User => "user",
            KeyPrefix::Work => "work",
            KeyPrefix::Ranking => "ranking",
            KeyPrefix::Kg => "kg",
            KeyPrefix::Session => "session",
            KeyPrefix::Api => "api",
            KeyPrefix::Temp => "temp",
        }
    }
}

impl fmt::Display for KeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyPrefix {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(KeyPrefix::User),
            "work" => Ok(KeyPrefix::Work),
            "ranking" => Ok(KeyPrefix::Ranking),
            "kg" => Ok(KeyPrefix::Kg),
            "session" => Ok(KeyPrefix::Session),
            "api" => Ok(KeyPrefix::Api),
            "temp" => Ok(KeyPrefix::Temp),
            other => Err(CacheError::Config(format!(
                "unknown cache key prefix '{}'",
                other
            ))),
        }
    }
}

/// A structured cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub prefix: KeyPrefix,
    pub identifier: String,
    pub suffix: Option<String>,
    pub version: Option<u32>,
}

impl CacheKey {
    pub fn new(prefix: KeyPrefix, identifier: impl Into<String>) -> Self {
        CacheKey {
            prefix,
            identifier: identifier.into(),
            suffix: None,
            version: None,
        }
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    /// Render the key: the non-empty parts joined with `:`.
    pub fn generate(&self) -> String {
        let mut key = format!("{}:{}", self.prefix, self.identifier);
        if let Some(suffix) = self.suffix.as_deref().filter(|s| !s.is_empty()) {
            key.push(':');
            key.push_str(suffix);
        }
        if let Some(version) = self.version {
            key.push_str(&format!(":v{}", version));
        }
        key
    }

    /// Parse a key back into its parts. Exact inverse of [`Self::generate`].
    ///
    /// A trailing segment of the form `vN` (N all digits) is the version;
    /// everything between the identifier and the version is the suffix.
    pub fn parse(key: &str) -> Result<Self, CacheError> {
        let mut segments: Vec<&str> = key.split(':').collect();
        if segments.len() < 2 {
            return Err(CacheError::Config(format!(
                "malformed cache key '{}': expected at least prefix:identifier",
                key
            )));
        }

        let prefix: KeyPrefix = segments[0].parse()?;
        let version = match segments.last().and_then(|s| parse_version_segment(s)) {
            Some(v) => {
                segments.pop();
                Some(v)
            }
            None => None,
        };

        if segments.len() < 2 || segments[1].is_empty() {
            return Err(CacheError::Config(format!(
                "malformed cache key '{}': identifier must be non-empty",
                key
            )));
        }

        let identifier = segments[1].to_string();
        let suffix = if segments.len() > 2 {
            Some(segments[2..].join(":"))
        } else {
            None
        };

        Ok(CacheKey {
            prefix,
            identifier,
            suffix,
            version,
        })
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.generate())
    }
}

fn parse_version_segment(segment: &str) -> Option<u32> {
    let digits = segment.strip_prefix('v')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
