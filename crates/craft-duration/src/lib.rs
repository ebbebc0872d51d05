//! Duration parsing and serde codecs shared across craft's configuration types.
//!
//! Every timing knob in a `.craft.yml` (poll intervals, deadlines, backoff
//! delays) accepts either a human-readable string (`"10s"`, `"2m"`) or a
//! plain integer number of milliseconds. `deserialize_duration` normalizes
//! both forms; `serialize_duration` always writes milliseconds so the value
//! round-trips.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Deserialize a `Duration` from either a human-readable string or a `u64` of milliseconds.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum DurationHelper {
        String(String),
        U64(u64),
    }

    match DurationHelper::deserialize(deserializer)? {
        DurationHelper::String(s) => humantime::parse_duration(&s)
            .map_err(|e| serde::de::Error::custom(format!("invalid duration: {e}"))),
        DurationHelper::U64(ms) => Ok(Duration::from_millis(ms)),
    }
}

/// Serialize a `Duration` as milliseconds (`u64`) so it round-trips through `deserialize_duration`.
pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Parse a human-readable duration string (`"10s"`, `"2m"`, `"500ms"`).
pub fn parse_duration(s: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s)
}

/// A standalone wrapper for use where a dedicated newtype is preferable to the
/// field-level `deserialize_with`/`serialize_with` attribute pair above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct HumanDuration(#[serde(serialize_with = "serialize_duration")] pub Duration);

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserialize_duration(deserializer).map(HumanDuration)
    }
}

impl From<Duration> for HumanDuration {
    fn from(d: Duration) -> Self {
        HumanDuration(d)
    }
}

impl From<HumanDuration> for Duration {
    fn from(h: HumanDuration) -> Self {
        h.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Wrapper {
        #[serde(
            deserialize_with = "deserialize_duration",
            serialize_with = "serialize_duration"
        )]
        delay: Duration,
    }

    #[test]
    fn parses_human_readable_string() {
        let w: Wrapper = serde_json::from_str(r#"{"delay":"10s"}"#).unwrap();
        assert_eq!(w.delay, Duration::from_secs(10));
    }

    #[test]
    fn parses_milliseconds_integer() {
        let w: Wrapper = serde_json::from_str(r#"{"delay":1500}"#).unwrap();
        assert_eq!(w.delay, Duration::from_millis(1500));
    }

    #[test]
    fn rejects_garbage_strings() {
        let err = serde_json::from_str::<Wrapper>(r#"{"delay":"not-a-duration"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn serializes_as_milliseconds() {
        let w = Wrapper {
            delay: Duration::from_secs(2),
        };
        let json = serde_json::to_string(&w).unwrap();
        assert_eq!(json, r#"{"delay":2000}"#);
    }

    #[test]
    fn human_duration_roundtrips_through_toml() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct T {
            poll: HumanDuration,
        }
        let t = T {
            poll: Duration::from_millis(2500).into(),
        };
        let s = toml::to_string(&t).unwrap();
        let back: T = toml::from_str(&s).unwrap();
        assert_eq!(back, t);
    }

    proptest::proptest! {
        #[test]
        fn millis_roundtrip(ms in 0u64..10_000_000) {
            let w = Wrapper { delay: Duration::from_millis(ms) };
            let json = serde_json::to_string(&w).unwrap();
            let back: Wrapper = serde_json::from_str(&json).unwrap();
            proptest::prop_assert_eq!(back.delay, w.delay);
        }
    }
}
