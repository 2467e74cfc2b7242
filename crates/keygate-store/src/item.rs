//! DynamoDB item mapping helpers shared by the three stores.

use std::collections::HashMap;

use aws_sdk_dynamodb::types::AttributeValue;
use jiff::Timestamp;

use crate::error::StoreError;

pub type Item = HashMap<String, AttributeValue>;

pub fn s(value: impl Into<String>) -> AttributeValue {
    AttributeValue::S(value.into())
}

pub fn n(value: i64) -> AttributeValue {
    AttributeValue::N(value.to_string())
}

pub fn ts(value: Timestamp) -> AttributeValue {
    AttributeValue::S(value.to_string())
}

pub fn get_s(item: &Item, key: &str) -> Result<String, StoreError> {
    item.get(key)
        .and_then(|v| v.as_s().ok())
        .cloned()
        .ok_or_else(|| StoreError::MalformedRow(format!("missing string attribute: {key}")))
}

/// Missing or non-string attributes read as empty.
pub fn get_s_or_default(item: &Item, key: &str) -> String {
    item.get(key)
        .and_then(|v| v.as_s().ok())
        .cloned()
        .unwrap_or_default()
}

pub fn get_opt_s(item: &Item, key: &str) -> Option<String> {
    item.get(key).and_then(|v| v.as_s().ok()).cloned()
}

pub fn get_i64(item: &Item, key: &str) -> Result<i64, StoreError> {
    item.get(key)
        .and_then(|v| v.as_n().ok())
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| StoreError::MalformedRow(format!("missing numeric attribute: {key}")))
}

pub fn get_u64(item: &Item, key: &str) -> Result<u64, StoreError> {
    item.get(key)
        .and_then(|v| v.as_n().ok())
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| StoreError::MalformedRow(format!("missing numeric attribute: {key}")))
}

pub fn get_ts(item: &Item, key: &str) -> Result<Timestamp, StoreError> {
    let raw = get_s(item, key)?;
    raw.parse()
        .map_err(|e| StoreError::MalformedRow(format!("bad timestamp in {key}: {e}")))
}

pub fn get_opt_ts(item: &Item, key: &str) -> Result<Option<Timestamp>, StoreError> {
    match get_opt_s(item, key) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| StoreError::MalformedRow(format!("bad timestamp in {key}: {e}"))),
    }
}

/// Composite GSI key for (invoker, profile) style lookups. `#` cannot
/// appear in a principal name or profile, so the join is unambiguous.
pub fn composite(a: &str, b: &str) -> String {
    format!("{a}#{b}")
}
