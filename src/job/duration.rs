use std::fmt;
use std::time::Duration;

use serde::de::{self, Visitor};
use serde::{Deserializer, Serializer};

/// Parse a walltime written as `[D-]HH:MM:SS`, `MM:SS` or plain seconds
pub fn parse(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    let (days, clock) = match text.split_once('-') {
        Some((days, clock)) => {
            let days: u64 = days.parse().map_err(|_| format!("bad day count in {text:?}"))?;
            (days, clock)
        }
        None => (0, text),
    };

    let too_long = || format!("walltime {text:?} is too long");
    let mut seconds: u64 = 0;
    let fields: Vec<&str> = clock.split(':').collect();
    if fields.is_empty() || fields.len() > 3 {
        return Err(format!("expected [D-]HH:MM:SS, got {text:?}"));
    }
    for field in fields {
        let value: u64 = field.parse().map_err(|_| format!("bad walltime field in {text:?}"))?;
        seconds = seconds
            .checked_mul(60)
            .and_then(|seconds| seconds.checked_add(value))
            .ok_or_else(too_long)?;
    }
    let total = days
        .checked_mul(86_400)
        .and_then(|days| days.checked_add(seconds))
        .ok_or_else(too_long)?;
    Ok(Duration::from_secs(total))
}

/// Format as HH:MM:SS, hours may exceed 24
pub fn format_hms(duration: &Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

pub fn serialize<S: Serializer>(
    value: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(duration) => serializer.serialize_str(&format_hms(duration)),
        None => serializer.serialize_none(),
    }
}

pub fn deserialize<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error> {
    deserializer.deserialize_option(OptionalWalltime)
}

struct OptionalWalltime;

impl<'de> Visitor<'de> for OptionalWalltime {
    type Value = Option<Duration>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a number of seconds or a [D-]HH:MM:SS string")
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_any(Walltime).map(Some)
    }
}

struct Walltime;

impl<'de> Visitor<'de> for Walltime {
    type Value = Duration;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a number of seconds or a [D-]HH:MM:SS string")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Duration::from_secs(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        u64::try_from(v)
            .map(Duration::from_secs)
            .map_err(|_| E::custom("walltime can't be negative"))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        parse(v).map_err(E::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clock_formats() {
        assert_eq!(parse("01:00:00"), Ok(Duration::from_secs(3600)));
        assert_eq!(parse("2-00:30:00"), Ok(Duration::from_secs(2 * 86_400 + 1800)));
        assert_eq!(parse("10:05"), Ok(Duration::from_secs(605)));
        assert_eq!(parse("90"), Ok(Duration::from_secs(90)));
        assert!(parse("1:2:3:4").is_err());
        assert!(parse("an hour").is_err());
    }

    #[test]
    fn overflowing_walltimes_are_errors() {
        assert!(parse("999999999999999999-00:00:00").unwrap_err().contains("too long"));
        assert!(parse("18446744073709551615:00").unwrap_err().contains("too long"));
        assert!(parse("213503982334602-00:00:00").is_err());
        assert_eq!(parse("18446744073709551615"), Ok(Duration::from_secs(u64::MAX)));
    }

    #[test]
    fn formats_long_walltimes() {
        assert_eq!(format_hms(&Duration::from_secs(59)), "00:00:59");
        assert_eq!(format_hms(&Duration::from_secs(26 * 3600 + 61)), "26:01:01");
    }
}
