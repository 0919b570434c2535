/// Error taxonomy of the sync core
///
/// Every fetch and mutation entry point catches remote failures at its own
/// boundary and converts them into a `SyncError`. The stores stay valid
/// (possibly stale) after any of these.
///
/// - `Fetch`: a full load failed; previous contents are kept
/// - `Mutation`: a create/update/delete was rejected; the store was rolled
///   back or resynchronized
/// - `Subscription`: a realtime subscription could not be established or was
///   dropped; logged and shown as disconnected
/// - `Invalid`: input rejected before any remote call
/// - `Remote`: a plain pass-through call (projects, members, profiles) failed

use crate::remote::RemoteError;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Sync error types
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Failed to load {collection} for project {project_id}: {source}")]
    Fetch {
        collection: &'static str,
        project_id: Uuid,
        source: RemoteError,
    },

    #[error("{operation} failed for {entity_id}: {source}")]
    Mutation {
        operation: &'static str,
        entity_id: Uuid,
        source: RemoteError,
    },

    #[error("Subscription to {channel} failed: {reason}")]
    Subscription { channel: String, reason: String },

    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("{operation} failed: {source}")]
    Remote {
        operation: &'static str,
        source: RemoteError,
    },
}

impl SyncError {
    /// Remote cause, if the error came from the data service
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            SyncError::Fetch { source, .. }
            | SyncError::Mutation { source, .. }
            | SyncError::Remote { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Sync result type alias
pub type SyncResult<T> = Result<T, SyncError>;

/// A rejected create, handing the caller's input back for retry
#[derive(Debug)]
pub struct Rejected<D> {
    /// Input exactly as the caller passed it
    pub input: D,

    pub error: SyncError,
}

impl<D> Rejected<D> {
    pub fn new(input: D, error: SyncError) -> Self {
        Rejected { input, error }
    }

    /// Splits into the preserved input and the error
    pub fn into_parts(self) -> (D, SyncError) {
        (self.input, self.error)
    }
}

impl<D> fmt::Display for Rejected<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl<D: fmt::Debug> std::error::Error for Rejected<D> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutation_error_display() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let err = SyncError::Mutation {
            operation: "update_status",
            entity_id: id,
            source: RemoteError::Unavailable("offline".to_string()),
        };

        assert_eq!(
            err.to_string(),
            "update_status failed for 550e8400-e29b-41d4-a716-446655440000: Remote service unavailable: offline"
        );
        assert!(err.remote().is_some());
    }

    #[test]
    fn test_rejected_keeps_input() {
        let rejected = Rejected::new("draft text".to_string(), SyncError::Invalid("blank".to_string()));
        assert_eq!(rejected.to_string(), "Invalid input: blank");

        let (input, error) = rejected.into_parts();
        assert_eq!(input, "draft text");
        assert!(error.remote().is_none());
    }
}
