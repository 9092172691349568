//! Wire format for stored timestamps.
//!
//! Contacts keep Unix epoch milliseconds (the store's native unit and the
//! seniority key) but are exchanged as RFC 3339 UTC strings with millisecond
//! precision, e.g. `2023-04-01T00:00:00.374Z`. Use through
//! `#[serde(with = "...")]`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serializer};

pub fn to_rfc3339(epoch_ms: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp_millis(epoch_ms)
        .map(|at| at.to_rfc3339_opts(SecondsFormat::Millis, true))
}

pub fn from_rfc3339(value: &str) -> Result<i64, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|at| at.timestamp_millis())
}

pub mod epoch_ms {
    use super::*;
    use serde::de::Error as _;

    pub fn serialize<S: Serializer>(epoch_ms: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        match to_rfc3339(*epoch_ms) {
            Some(text) => serializer.serialize_str(&text),
            None => Err(serde::ser::Error::custom(format!(
                "timestamp {epoch_ms} ms is out of range"
            ))),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        let text = String::deserialize(deserializer)?;
        from_rfc3339(&text).map_err(D::Error::custom)
    }
}

pub mod option_epoch_ms {
    use super::*;
    use serde::de::Error as _;

    pub fn serialize<S: Serializer>(
        epoch_ms: &Option<i64>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match epoch_ms {
            Some(epoch_ms) => super::epoch_ms::serialize(epoch_ms, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<i64>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|text| from_rfc3339(&text).map_err(D::Error::custom))
            .transpose()
    }
}
