#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("bridge I/O error: {0}")]
    BridgeIo(#[from] std::io::Error),

    #[error("bridge protocol error: {0}")]
    BridgeProtocol(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::BridgeProtocol(e.to_string())
    }
}
