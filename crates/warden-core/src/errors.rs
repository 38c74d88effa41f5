/// Failures reported by a session handle or connector.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SessionError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("session closed")]
    Closed,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Failures of the durable vision log store.
#[derive(Debug, thiserror::Error)]
pub enum LogStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_error_display() {
        assert_eq!(
            SessionError::ConnectFailed("refused".into()).to_string(),
            "connect failed: refused"
        );
        assert_eq!(SessionError::Closed.to_string(), "session closed");
    }

    #[test]
    fn io_error_converts() {
        let err: LogStoreError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert!(matches!(err, LogStoreError::Io(_)));
        assert!(err.to_string().contains("denied"));
    }
}
