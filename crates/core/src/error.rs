use crate::model::SessionStatus;

/// Faults raised by a store implementation.
///
/// The pack builder never propagates these for individual retrievals: a failed
/// query is logged and treated as an empty result for that tier.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("query failed: {0}")]
    Query(String),
    #[error("record not found: {0}")]
    NotFound(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("no case study available for session {0}")]
    NoCaseAvailable(String),
    #[error("invalid session status transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}
