//! Serde helpers for the backend's epoch-second timestamps.

use serde::{Deserialize, Deserializer, Serializer};
use time::OffsetDateTime;

/// Converts epoch seconds into an `OffsetDateTime`.
pub fn from_epoch_seconds(seconds: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(seconds).ok()
}

/// Deserialize an optional epoch-seconds integer into an `OffsetDateTime`.
///
/// Out-of-range values deserialize as `None` rather than failing the whole
/// document.
pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let seconds = Option::<i64>::deserialize(deserializer)?;
    Ok(seconds.and_then(from_epoch_seconds))
}

/// Serialize an optional `OffsetDateTime` as epoch seconds.
pub fn serialize<S>(datetime: &Option<OffsetDateTime>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match datetime {
        Some(datetime) => serializer.serialize_i64(datetime.unix_timestamp()),
        None => serializer.serialize_none(),
    }
}
