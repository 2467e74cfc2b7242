//! Opaque request/event/session identifiers.
//!
//! Every entity in the system is keyed by a 16-character lowercase-hex ID;
//! device IDs are 64 hex characters. `validate` / `validate_device` are the
//! single predicates the stores and workflows reuse.

use rand::RngCore;

use crate::error::CoreError;

/// Length of a request, break-glass event, or session ID.
pub const ID_LEN: usize = 16;

/// Length of a device ID.
pub const DEVICE_ID_LEN: usize = 64;

/// Generate a fresh 16-char lowercase-hex ID.
pub fn generate() -> String {
    let mut bytes = [0u8; ID_LEN / 2];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Generate a fresh 64-char lowercase-hex device ID.
pub fn generate_device() -> String {
    let mut bytes = [0u8; DEVICE_ID_LEN / 2];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Validate a request/event/session ID: exactly 16 lowercase hex chars.
pub fn validate(id: &str) -> Result<(), CoreError> {
    validate_hex(id, ID_LEN)
}

/// Validate a device ID: exactly 64 lowercase hex chars.
pub fn validate_device(id: &str) -> Result<(), CoreError> {
    validate_hex(id, DEVICE_ID_LEN)
}

fn validate_hex(id: &str, expected_len: usize) -> Result<(), CoreError> {
    if id.is_empty() {
        return Err(CoreError::validation("id is empty"));
    }
    if id.len() != expected_len {
        return Err(CoreError::Validation(format!(
            "id must be {expected_len} characters, got {}",
            id.len()
        )));
    }
    if !id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return Err(CoreError::Validation(format!(
            "id must be lowercase hex: {id}"
        )));
    }
    Ok(())
}
