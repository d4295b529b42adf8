//! JSON blob (de)serialization shared by both backends.
//!
//! Every rich field (task config, trigger, options, conditions, handler
//! lists, trigger context, tool calls, SDK usage) is stored as a plain
//! `TEXT` column holding its `serde_json` encoding, round-tripped verbatim
//! (§6). Neither backend uses a native JSON/JSONB column type, which keeps
//! the two schemas structurally identical and avoids sqlx's `json` feature.

use claudecron_scheduler::StorageError;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|e| StorageError::Backend { reason: e.to_string() })
}

pub(crate) fn encode_opt<T: Serialize>(value: &Option<T>) -> Result<Option<String>, StorageError> {
    value.as_ref().map(encode).transpose()
}

pub(crate) fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, StorageError> {
    serde_json::from_str(raw).map_err(|e| StorageError::Backend { reason: e.to_string() })
}

pub(crate) fn decode_opt<T: DeserializeOwned>(raw: Option<&str>) -> Result<Option<T>, StorageError> {
    raw.map(decode).transpose()
}

pub(crate) fn parse_id<T: std::str::FromStr>(raw: &str, id_type: &'static str) -> Result<T, StorageError>
where
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| StorageError::Backend {
        reason: format!("invalid {id_type} '{raw}': {e}"),
    })
}
