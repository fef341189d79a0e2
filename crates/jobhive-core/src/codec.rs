//! Value encoding for job record fields.
//!
//! Values are stored as JSON text. Timestamps are JSON strings holding an
//! RFC 3339 instant, quotes included.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreResult;

pub fn encode<T: Serialize + ?Sized>(value: &T) -> StoreResult<String> {
    Ok(serde_json::to_string(value)?)
}

pub fn decode<T: DeserializeOwned>(raw: &str) -> StoreResult<T> {
    Ok(serde_json::from_str(raw)?)
}

/// Encode a timestamp the way every `*At` field is stored.
pub fn encode_time(at: DateTime<Utc>) -> String {
    format!("\"{}\"", at.to_rfc3339_opts(SecondsFormat::Micros, true))
}

/// Decode a stored timestamp, `None` when it is not one.
pub fn decode_time(raw: &str) -> Option<DateTime<Utc>> {
    serde_json::from_str(raw).ok()
}
