//! Timestamp formatting and numeric-string serialization.
//!
//! The wire format renders timestamps as RFC 3339 UTC with millisecond
//! precision and a trailing `Z`, and renders 64-bit counters (generations,
//! metagenerations, sizes) as decimal strings.

use chrono::{DateTime, SecondsFormat, Utc};

/// Render a timestamp the way the public APIs do: `2026-08-01T12:34:56.789Z`.
pub fn format_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Serde adapter for `i64` fields carried as decimal strings on the wire.
pub mod i64_as_string {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<i64>().map_err(|_| D::Error::custom(format!("not a decimal string: '{raw}'")))
    }
}

/// Serde adapter for optional `i64` numeric-string fields.
pub mod opt_i64_as_string {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_str(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<i64>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(raw) => raw
                .parse::<i64>()
                .map(Some)
                .map_err(|_| D::Error::custom(format!("not a decimal string: '{raw}'"))),
        }
    }
}
