//! Error types for the live grid
//!
//! Comprehensive error taxonomy using thiserror

use thiserror::Error;

/// Errors raised while applying a single event to a view.
///
/// Both variants are scoped to one event: the event is dropped and logged,
/// the session carries on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ViewError {
    #[error("Malformed identity: {reason}")]
    MalformedIdentity { reason: String },

    #[error("Protocol order error: {operation} without a snapshot in progress")]
    ProtocolOrder { operation: &'static str },
}

impl ViewError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        ViewError::MalformedIdentity {
            reason: reason.into(),
        }
    }
}

/// Errors reported by a transport collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Not connected")]
    NotConnected,

    #[error("Subscription rejected: {reason}")]
    Rejected { reason: String },

    #[error("Invalid filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("Invalid options '{options}': {reason}")]
    InvalidOptions { options: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let e = ViewError::malformed("missing sow key");
        assert_eq!(e.to_string(), "Malformed identity: missing sow key");

        let e = ViewError::ProtocolOrder {
            operation: "add_snapshot_row",
        };
        assert_eq!(
            e.to_string(),
            "Protocol order error: add_snapshot_row without a snapshot in progress"
        );

        let e = TransportError::InvalidFilter {
            filter: "/x ==".to_string(),
            reason: "unexpected end".to_string(),
        };
        assert!(e.to_string().contains("/x =="));
    }
}
