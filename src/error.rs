use thiserror::Error;

/// Closed classification for adapter-facing failures (§7, §9). Callers
/// branch on this to decide retry vs. halt; everything else propagates as
/// `anyhow::Error` through the task/cycle boundary.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network blip, timeout, rate limit — retry with backoff.
    #[error("transient error")]
    Transient,
    /// Credentials rejected or session expired — halt and alert.
    #[error("unauthorized")]
    Unauthorized,
    /// Referenced contract/order/position does not exist at the broker.
    #[error("not found")]
    NotFound,
    /// Caller-supplied parameters rejected by the adapter or the venue.
    #[error("invalid request")]
    Invalid,
    /// Unrecoverable; the calling task should stop rather than retry.
    #[error("fatal error")]
    Fatal,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Transient)
    }
}

/// An adapter-layer error carrying its classification alongside the
/// underlying cause.
#[derive(Debug, Error)]
#[error("{kind}: {source}")]
pub struct AdapterError {
    pub kind: ErrorKind,
    #[source]
    pub source: anyhow::Error,
}

impl AdapterError {
    pub fn new(kind: ErrorKind, source: impl Into<anyhow::Error>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }

    pub fn transient(source: impl Into<anyhow::Error>) -> Self {
        Self::new(ErrorKind::Transient, source)
    }

    pub fn fatal(source: impl Into<anyhow::Error>) -> Self {
        Self::new(ErrorKind::Fatal, source)
    }
}
