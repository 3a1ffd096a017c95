//! Row identity derivation
//!
//! The bus tags every record-bearing message with a state-of-the-world key.
//! That key, not the payload, is what identifies a row: two messages with
//! the same key describe the same record.

use grid_types::errors::ViewError;
use grid_types::row::RowKey;

use crate::events::Message;

/// Derive the `RowKey` for a message from its identity metadata.
///
/// Pure and deterministic. Fails with `MalformedIdentity` when the message
/// carries no key, or an empty one.
pub fn key_of(message: &Message) -> Result<RowKey, ViewError> {
    match message.sow_key.as_deref() {
        Some(key) if !key.trim().is_empty() => Ok(RowKey::new(key)),
        Some(_) => Err(ViewError::malformed(format!(
            "empty sow key on '{}' message",
            message.command
        ))),
        None => Err(ViewError::malformed(format!(
            "missing sow key on '{}' message",
            message.command
        ))),
    }
}
