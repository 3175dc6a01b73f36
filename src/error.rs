use std::panic::Location;

use tracing::error;

/// Errors surfaced by the engine, the metadata index, and the blob store.
///
/// No variant carries a substrate-specific error type: callers see a short
/// message and a kind they can match on, never a raw `sqlx`/`io` error.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid name")]
    InvalidName,
    #[error("invalid SHA-256 hash")]
    InvalidSha256,
    #[error("invalid star state")]
    InvalidStarState,
    #[error("not found")]
    NotFound,
    #[error("duplicate file")]
    DuplicateFile,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Logs the underlying error at the point it crosses into [`EngineError`],
/// capturing the current span trace. Call once per conversion site; do not
/// log it again as the error propagates further up via `?`.
#[inline]
#[track_caller]
pub(crate) fn log(source: &dyn std::error::Error) {
    let location = Location::caller();
    let span_trace = tracing_error::SpanTrace::capture();

    error!(
        target: "tempstore",
        %location,
        error = %source,
        "span trace:\n{span_trace}"
    );
}

/// Converts a `sqlx` result into an [`EngineError::Internal`], logging the
/// original error at the conversion site.
macro_rules! try_sql {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(err) => {
                crate::error::log(&err);
                return Err(crate::error::EngineError::Internal(err.to_string()));
            }
        }
    };
}

pub(crate) use try_sql;
