use std::sync::Arc;

use tokio::sync::broadcast;
use warden_core::{LogEvent, LogStore, TelemetryUpdate};

/// Append-only record of lifecycle and chat events.
///
/// Each event goes to viewers (through the telemetry broadcast) and to the
/// durable store. The two sinks are independent: a store failure is logged
/// and never affects the broadcast.
#[derive(Clone)]
pub struct VisionLog {
    telemetry: broadcast::Sender<TelemetryUpdate>,
    store: Option<Arc<dyn LogStore>>,
}

impl VisionLog {
    pub fn new(telemetry: broadcast::Sender<TelemetryUpdate>) -> Self {
        Self {
            telemetry,
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn LogStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn record(&self, message: impl Into<String>) -> LogEvent {
        let event = LogEvent::now(message);
        tracing::info!(target: "vision", "{}", event.message);

        // No receivers just means no viewer is connected.
        let _ = self.telemetry.send(TelemetryUpdate::log_line(&event));

        if let Some(store) = &self.store {
            if let Err(e) = store.append(&event) {
                tracing::warn!(error = %e, "vision log store write failed");
            }
        }

        event
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use warden_core::LogStoreError;

    use super::*;

    #[derive(Default)]
    struct MemoryStore {
        lines: Mutex<Vec<String>>,
    }

    impl LogStore for MemoryStore {
        fn append(&self, event: &LogEvent) -> Result<(), LogStoreError> {
            self.lines.lock().push(event.line());
            Ok(())
        }
    }

    struct BrokenStore;

    impl LogStore for BrokenStore {
        fn append(&self, _event: &LogEvent) -> Result<(), LogStoreError> {
            Err(LogStoreError::Unavailable("disk full".into()))
        }
    }

    #[test]
    fn record_goes_to_both_sinks() {
        let (tx, mut rx) = broadcast::channel(8);
        let store = Arc::new(MemoryStore::default());
        let log = VisionLog::new(tx).with_store(store.clone());

        let event = log.record("kicked: flying is not enabled");

        match rx.try_recv().unwrap() {
            TelemetryUpdate::LogLine(line) => assert_eq!(line, event.line()),
            other => panic!("unexpected update: {other:?}"),
        }
        assert_eq!(store.lines.lock().as_slice(), &[event.line()]);
    }

    #[test]
    fn store_failure_does_not_block_broadcast() {
        let (tx, mut rx) = broadcast::channel(8);
        let log = VisionLog::new(tx).with_store(Arc::new(BrokenStore));

        log.record("first");
        log.record("second");

        assert!(matches!(rx.try_recv(), Ok(TelemetryUpdate::LogLine(l)) if l.ends_with("first")));
        assert!(matches!(rx.try_recv(), Ok(TelemetryUpdate::LogLine(l)) if l.ends_with("second")));
    }

    #[test]
    fn record_without_viewers_is_fine() {
        let (tx, rx) = broadcast::channel(8);
        drop(rx);
        let event = VisionLog::new(tx).record("nobody watching");
        assert_eq!(event.message, "nobody watching");
    }
}
