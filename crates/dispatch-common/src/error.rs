use thiserror::Error;

/// The error taxonomy from spec.md §7, shared by every crate so that HTTP
/// and stream-consumer edges can map a single type to their own handling
/// (status code, ack-and-log, retry, or process exit).
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not authorized: {0}")]
    Authorization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("unrecoverable: {0}")]
    Unrecoverable(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    EventLog(#[from] redis::RedisError),
}

impl DispatchError {
    /// True when a stream consumer should ack the message without
    /// redelivering it (NotFound/Conflict/Unrecoverable are all terminal
    /// for the message that triggered them; UpstreamUnavailable is not).
    pub fn is_ack_and_drop(&self) -> bool {
        matches!(
            self,
            DispatchError::NotFound(_) | DispatchError::Conflict(_) | DispatchError::Unrecoverable(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::UpstreamUnavailable(_))
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_is_ack_and_drop_not_retryable() {
        let e = DispatchError::Conflict("stale offer".into());
        assert!(e.is_ack_and_drop());
        assert!(!e.is_retryable());
    }

    #[test]
    fn upstream_unavailable_is_retryable_not_dropped() {
        let e = DispatchError::UpstreamUnavailable("routing timeout".into());
        assert!(e.is_retryable());
        assert!(!e.is_ack_and_drop());
    }
}
