use thiserror::Error;

/// Errors produced by parsing, synchronization, geometry, and codec operations.
///
/// File-access failures (`Io`, `Csv`, `Json`) are kept distinct from data
/// errors so callers can tell "bad path" from "bad data".
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("unsupported camera model: {0}")]
    UnsupportedModel(String),

    #[error("synchronization failure: {0}")]
    SynchronizationFailure(String),

    #[error("degenerate coordinate system: axes are not mutually orthogonal")]
    DegenerateGeometry,

    #[error("format mismatch: {0}")]
    FormatMismatch(String),

    #[error("alignment failed: {0}")]
    Alignment(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ExtractError>;
