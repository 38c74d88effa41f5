use crate::errors::LogStoreError;
use crate::events::LogEvent;

/// Durable append-only sink for vision log events.
pub trait LogStore: Send + Sync {
    fn append(&self, event: &LogEvent) -> Result<(), LogStoreError>;
}
