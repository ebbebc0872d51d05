use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A SemVer version: `{major, minor, patch, pre?, build?}`, totally ordered
/// per the SemVer 2.0 precedence rules. A version is a *preview* (what the
/// rest of the workspace calls a prerelease, e.g. for npm's `--tag=next`
/// selection) iff `pre` is set. Immutable once parsed.
#[derive(Debug, Clone, Eq)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Option<String>,
    pub build: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VersionParseError {
    #[error("version {0:?} is missing a major.minor.patch triple")]
    MissingComponent(String),
    #[error("version {0:?} has a non-numeric component: {1:?}")]
    NonNumericComponent(String, String),
    #[error("version {0:?} has an empty pre-release or build identifier")]
    EmptyIdentifier(String),
}

impl Version {
    /// `true` iff this version carries a pre-release identifier — the
    /// signal every preview-aware policy (npm's `--tag=next`, release-registry
    /// `linkPrereleases`) keys off.
    pub fn is_preview(&self) -> bool {
        self.pre.is_some()
    }

    pub fn parse(input: &str) -> Result<Self, VersionParseError> {
        let (core, build) = match input.split_once('+') {
            Some((core, build)) => {
                if build.is_empty() {
                    return Err(VersionParseError::EmptyIdentifier(input.to_string()));
                }
                (core, Some(build.to_string()))
            }
            None => (input, None),
        };

        let (core, pre) = match core.split_once('-') {
            Some((core, pre)) => {
                if pre.is_empty() {
                    return Err(VersionParseError::EmptyIdentifier(input.to_string()));
                }
                (core, Some(pre.to_string()))
            }
            None => (core, None),
        };

        let mut parts = core.split('.');
        let mut next = |label: &str| -> Result<u64, VersionParseError> {
            let raw = parts
                .next()
                .ok_or_else(|| VersionParseError::MissingComponent(input.to_string()))?;
            raw.parse::<u64>()
                .map_err(|_| VersionParseError::NonNumericComponent(input.to_string(), label.to_string()))
        };

        let major = next("major")?;
        let minor = next("minor")?;
        let patch = next("patch")?;
        if parts.next().is_some() {
            return Err(VersionParseError::MissingComponent(input.to_string()));
        }

        Ok(Version {
            major,
            minor,
            patch,
            pre,
            build,
        })
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre {
            write!(f, "-{pre}")?;
        }
        if let Some(build) = &self.build {
            write!(f, "+{build}")?;
        }
        Ok(())
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    /// SemVer precedence: compare `major.minor.patch` numerically; a version
    /// with no `pre` outranks one with `pre` set (`1.0.0 > 1.0.0-rc.1`); two
    /// pre-release strings compare by per-dot-separated-identifier rules
    /// (numeric identifiers compare numerically, lower than any alphanumeric
    /// identifier, otherwise ASCII lexicographic). Build metadata never
    /// affects ordering.
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => compare_pre_release(a, b),
            })
    }
}

fn compare_pre_release(a: &str, b: &str) -> Ordering {
    let mut a_ids = a.split('.');
    let mut b_ids = b.split('.');
    loop {
        match (a_ids.next(), b_ids.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(a_id), Some(b_id)) => {
                let ord = match (a_id.parse::<u64>(), b_id.parse::<u64>()) {
                    (Ok(a_num), Ok(b_num)) => a_num.cmp(&b_num),
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => a_id.cmp(b_id),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

impl Serialize for Version {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Version::parse(&raw).map_err(serde::de::Error::custom)
    }
}
