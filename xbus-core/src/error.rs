//! Crate-boundary error type.
//!
//! Internal plumbing (store calls, graph walks) returns `anyhow::Result`,
//! the way the teacher's engine/VM layer does. `OrchestratorError` is only
//! introduced where a caller needs to distinguish the §7 error kinds —
//! at the orchestrator facade and at the gRPC handlers that wrap it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("no such envelope: {0}")]
    UnknownEnvelope(crate::ids::EnvelopeId),

    #[error("event already started: {0}")]
    DuplicateEvent(crate::ids::EventId),

    #[error("no such event: {0}")]
    UnknownEvent(crate::ids::EventId),

    #[error("no ready worker for service {0}")]
    NoReadyWorker(crate::ids::ServiceId),

    #[error("no program found for event type {0}")]
    UnknownEventType(crate::ids::EventTypeId),

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),

    #[error("recipient call failed")]
    RecipientError,

    #[error("call timed out")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
