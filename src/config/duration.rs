//! Compact human-readable duration parsing ("5s", "30s", "2m").
//!
//! Mirrors the hand-rolled suffix parsers the container driver uses for
//! memory/CPU limits rather than pulling in a dedicated duration crate.

use std::time::Duration;

use serde::{de, Deserialize, Deserializer};

pub fn parse_compact_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let (digits, suffix) = raw.split_at(raw.find(|c: char| !c.is_ascii_digit())?);
    let value: u64 = digits.parse().ok()?;

    let secs = match suffix {
        "ms" => return Some(Duration::from_millis(value)),
        "s" => value,
        "m" => value * 60,
        "h" => value * 3600,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}

pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_compact_duration(&raw)
        .ok_or_else(|| de::Error::custom(format!("invalid duration '{}' (expected e.g. 5s, 30s, 2m)", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_seconds_minutes_hours() {
        assert_eq!(parse_compact_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_compact_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_compact_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_compact_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_compact_duration("250ms"), Some(Duration::from_millis(250)));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_compact_duration(""), None);
        assert_eq!(parse_compact_duration("five"), None);
        assert_eq!(parse_compact_duration("5"), None);
        assert_eq!(parse_compact_duration("5x"), None);
    }
}
