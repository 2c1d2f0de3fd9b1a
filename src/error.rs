use thiserror::Error;

/// Validation failures at the ingest boundary. Rejected synchronously,
/// never retried, reported to the caller verbatim.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IngestError {
    #[error("location is required and must be non-empty")]
    MissingLocation,

    #[error("unknown signal type: {0}")]
    InvalidSignalType(String),

    #[error("invalid coordinates: {0}")]
    InvalidCoordinates(String),

    #[error("unknown severity: {0}")]
    InvalidSeverity(String),
}

/// Failures of the attribution engine as a whole.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Invalid(#[from] IngestError),

    /// Attribution retries exhausted; the caller may safely retry the
    /// whole ingest, since retrying re-validates and re-attributes.
    #[error("attribution conflict persisted after {0} retries")]
    ServiceBusy(u32),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}
