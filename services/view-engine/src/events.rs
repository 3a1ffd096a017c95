//! Event definitions for the view engine
//!
//! Transports hand the engine `Message`s: a command tag, an optional
//! state-of-the-world key and an optional field payload. `Event::classify`
//! turns a message into the typed `Event` a `MaterializedView` applies.
//!
//! Command tags follow the bus vocabulary:
//!
//! | command          | event           |
//! |------------------|-----------------|
//! | `group_begin`    | `SnapshotBegin` |
//! | `sow`            | `SnapshotRow`   |
//! | `group_end`      | `SnapshotEnd`   |
//! | `oof`            | `Remove`        |
//! | `p`, `publish`   | `Upsert`        |
//! | `delta_publish`  | `Upsert`        |
//!
//! Any other tag is unknown and is ignored by the session.

use std::collections::BTreeMap;

use grid_types::errors::ViewError;
use grid_types::row::{Row, RowKey};
use grid_types::value::Value;
use serde::{Deserialize, Serialize};

use crate::identity::key_of;

/// Recognised message commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    GroupBegin,
    Sow,
    GroupEnd,
    Oof,
    Publish,
    DeltaPublish,
}

impl Command {
    /// Parse a command tag. Returns `None` for tags the engine does not know.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "group_begin" => Some(Command::GroupBegin),
            "sow" => Some(Command::Sow),
            "group_end" => Some(Command::GroupEnd),
            "oof" => Some(Command::Oof),
            "p" | "publish" => Some(Command::Publish),
            "delta_publish" => Some(Command::DeltaPublish),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::GroupBegin => "group_begin",
            Command::Sow => "sow",
            Command::GroupEnd => "group_end",
            Command::Oof => "oof",
            Command::Publish => "p",
            Command::DeltaPublish => "delta_publish",
        }
    }
}

/// A transport-level message before classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Command tag (`c` on the wire).
    #[serde(rename = "c")]
    pub command: String,
    /// State-of-the-world key identifying the record (`k` on the wire).
    #[serde(rename = "k", default, skip_serializing_if = "Option::is_none")]
    pub sow_key: Option<String>,
    /// Record fields, absent for control messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<BTreeMap<String, Value>>,
}

impl Message {
    fn control(command: Command) -> Self {
        Self {
            command: command.as_str().to_string(),
            sow_key: None,
            data: None,
        }
    }

    fn record<I, K, V>(command: Command, sow_key: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            command: command.as_str().to_string(),
            sow_key: Some(sow_key.into()),
            data: Some(
                fields
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    pub fn group_begin() -> Self {
        Self::control(Command::GroupBegin)
    }

    pub fn group_end() -> Self {
        Self::control(Command::GroupEnd)
    }

    pub fn sow<I, K, V>(sow_key: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self::record(Command::Sow, sow_key, fields)
    }

    pub fn publish<I, K, V>(sow_key: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self::record(Command::Publish, sow_key, fields)
    }

    pub fn delta_publish<I, K, V>(sow_key: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self::record(Command::DeltaPublish, sow_key, fields)
    }

    pub fn oof(sow_key: impl Into<String>) -> Self {
        Self {
            command: Command::Oof.as_str().to_string(),
            sow_key: Some(sow_key.into()),
            data: None,
        }
    }

    /// Decode a JSON wire frame.
    pub fn from_json(frame: &str) -> serde_json::Result<Self> {
        serde_json::from_str(frame)
    }

    /// Encode as a JSON wire frame.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Any other command tag, for exercising unknown-message handling.
    pub fn custom(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            sow_key: None,
            data: None,
        }
    }

    fn to_row(&self) -> Result<Row, ViewError> {
        let key = key_of(self)?;
        Ok(match &self.data {
            Some(data) => Row::from_fields(key, data.clone()),
            None => Row::new(key),
        })
    }
}

/// Typed event applied to a materialized view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    SnapshotBegin,
    SnapshotRow(Row),
    SnapshotEnd,
    Remove(RowKey),
    Upsert(Row),
}

impl Event {
    /// Classify a transport message.
    ///
    /// Returns `Ok(None)` for unknown commands and `MalformedIdentity` for a
    /// record-bearing message without a usable key.
    pub fn classify(message: &Message) -> Result<Option<Event>, ViewError> {
        let command = match Command::parse(&message.command) {
            Some(c) => c,
            None => return Ok(None),
        };

        let event = match command {
            Command::GroupBegin => Event::SnapshotBegin,
            Command::GroupEnd => Event::SnapshotEnd,
            Command::Sow => Event::SnapshotRow(message.to_row()?),
            Command::Publish | Command::DeltaPublish => Event::Upsert(message.to_row()?),
            Command::Oof => Event::Remove(key_of(message)?),
        };
        Ok(Some(event))
    }

    /// Get the event type as a string label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Event::SnapshotBegin => "SnapshotBegin",
            Event::SnapshotRow(_) => "SnapshotRow",
            Event::SnapshotEnd => "SnapshotEnd",
            Event::Remove(_) => "Remove",
            Event::Upsert(_) => "Upsert",
        }
    }

    /// Row identity this event targets, if any.
    pub fn key(&self) -> Option<&RowKey> {
        match self {
            Event::SnapshotRow(row) | Event::Upsert(row) => Some(row.key()),
            Event::Remove(key) => Some(key),
            Event::SnapshotBegin | Event::SnapshotEnd => None,
        }
    }
}
