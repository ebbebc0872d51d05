use std::fmt;

use regex::Regex;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A config-supplied artifact/workflow name pattern, compiled once to a
/// single `Regex` at load time. Accepts three surface forms, tried in order:
///
/// 1. A regex literal `/…/[flags]` (only `i` is recognized as a flag).
/// 2. A glob containing `*` or `?`, translated to an anchored regex.
/// 3. An exact string, compiled as `^escaped$`.
///
/// This is the tagged union described for artifact-filter and workflow-name
/// matching: the surface syntax is free-form but resolves to one regex
/// engine, so matching code never has to branch on which form was used.
#[derive(Debug, Clone)]
pub struct FilterPattern {
    source: String,
    compiled: Regex,
}

impl FilterPattern {
    pub fn compile(source: impl Into<String>) -> Result<Self, FilterPatternError> {
        let source = source.into();
        let compiled = compile_pattern(&source)?;
        Ok(Self { source, compiled })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.compiled.is_match(text)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl PartialEq for FilterPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}
impl Eq for FilterPattern {}

impl fmt::Display for FilterPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FilterPatternError {
    #[error("invalid regex literal {0:?}: {1}")]
    InvalidRegex(String, regex::Error),
    #[error("unrecognized regex flag {0:?} in pattern {1:?}")]
    UnknownFlag(char, String),
}

fn compile_pattern(source: &str) -> Result<Regex, FilterPatternError> {
    if let Some(rest) = source.strip_prefix('/') {
        if let Some(end) = rest.rfind('/') {
            let body = &rest[..end];
            let flags = &rest[end + 1..];
            let mut pattern = String::new();
            for flag in flags.chars() {
                match flag {
                    'i' => pattern.push_str("(?i)"),
                    other => {
                        return Err(FilterPatternError::UnknownFlag(
                            other,
                            source.to_string(),
                        ));
                    }
                }
            }
            pattern.push_str(body);
            return Regex::new(&pattern)
                .map_err(|e| FilterPatternError::InvalidRegex(source.to_string(), e));
        }
    }

    if source.contains('*') || source.contains('?') {
        let mut pattern = String::from("^");
        for ch in source.chars() {
            match ch {
                '*' => pattern.push_str(".*"),
                '?' => pattern.push('.'),
                other => pattern.push_str(&regex::escape(&other.to_string())),
            }
        }
        pattern.push('$');
        return Regex::new(&pattern)
            .map_err(|e| FilterPatternError::InvalidRegex(source.to_string(), e));
    }

    let pattern = format!("^{}$", regex::escape(source));
    Regex::new(&pattern).map_err(|e| FilterPatternError::InvalidRegex(source.to_string(), e))
}

impl Serialize for FilterPattern {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for FilterPattern {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let source = String::deserialize(deserializer)?;
        FilterPattern::compile(source).map_err(D::Error::custom)
    }
}
