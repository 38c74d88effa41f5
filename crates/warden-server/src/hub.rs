//! Telemetry fan-out to every connected viewer.
//!
//! The hub task is the only owner of the subscriber set. Transports talk to
//! it through [`HubHandle`]; engine updates arrive on the broadcast channel.

use std::collections::HashMap;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use warden_core::{SubscriberId, TelemetryUpdate};

const COMMAND_QUEUE: usize = 64;

pub(crate) enum HubCommand {
    Subscribe {
        reply: oneshot::Sender<(SubscriberId, mpsc::Receiver<String>)>,
    },
    Unsubscribe(SubscriberId),
    Count(oneshot::Sender<usize>),
}

/// Outcome of delivering one update.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub dropped: usize,
    pub pruned: usize,
}

struct TelemetryHub {
    subscribers: HashMap<SubscriberId, mpsc::Sender<String>>,
    max_send_queue: usize,
}

impl TelemetryHub {
    fn new(max_send_queue: usize) -> Self {
        Self {
            subscribers: HashMap::new(),
            max_send_queue: max_send_queue.max(1),
        }
    }

    fn subscribe(&mut self) -> (SubscriberId, mpsc::Receiver<String>) {
        let id = SubscriberId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        self.subscribers.insert(id.clone(), tx);
        info!(subscriber_id = %id, total = self.subscribers.len(), "viewer subscribed");
        (id, rx)
    }

    fn unsubscribe(&mut self, id: &SubscriberId) -> bool {
        let removed = self.subscribers.remove(id).is_some();
        if removed {
            info!(subscriber_id = %id, total = self.subscribers.len(), "viewer unsubscribed");
        }
        removed
    }

    /// Serialize once and offer the frame to every subscriber. Closed queues
    /// are pruned after the pass; full queues lose this frame only.
    fn deliver(&mut self, update: &TelemetryUpdate) -> Delivery {
        let frame = match serde_json::to_string(update) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(kind = update.kind(), error = %e, "failed to serialize update");
                return Delivery::default();
            }
        };

        let mut report = Delivery::default();
        let mut closed = Vec::new();
        for (id, tx) in &self.subscribers {
            match tx.try_send(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(subscriber_id = %id, kind = update.kind(), "send queue full, dropping message");
                    report.dropped += 1;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(id.clone()),
            }
        }

        for id in closed {
            if self.subscribers.remove(&id).is_some() {
                info!(subscriber_id = %id, "pruned closed viewer");
                report.pruned += 1;
            }
        }
        report
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<HubCommand>,
        mut updates: broadcast::Receiver<TelemetryUpdate>,
    ) {
        let mut updates_open = true;
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(HubCommand::Subscribe { reply }) => {
                        let _ = reply.send(self.subscribe());
                    }
                    Some(HubCommand::Unsubscribe(id)) => {
                        self.unsubscribe(&id);
                    }
                    Some(HubCommand::Count(reply)) => {
                        let _ = reply.send(self.subscribers.len());
                    }
                    None => break,
                },
                update = updates.recv(), if updates_open => match update {
                    Ok(update) => {
                        let report = self.deliver(&update);
                        debug!(kind = update.kind(), ?report, "update fanned out");
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "telemetry hub lagged, dropped updates");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("telemetry channel closed");
                        updates_open = false;
                    }
                },
            }
        }
        debug!("telemetry hub stopped");
    }
}

/// Cloneable handle to the hub task.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    /// Register a viewer. Returns `None` once the hub has stopped.
    pub async fn subscribe(&self) -> Option<(SubscriberId, mpsc::Receiver<String>)> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(HubCommand::Subscribe { reply }).await.ok()?;
        rx.await.ok()
    }

    /// Remove a viewer. Unknown or already-pruned ids are ignored.
    pub async fn unsubscribe(&self, id: SubscriberId) {
        let _ = self.commands.send(HubCommand::Unsubscribe(id)).await;
    }

    pub async fn count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(HubCommand::Count(reply)).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Spawn the hub. It runs until every [`HubHandle`] is dropped.
pub fn spawn_hub(
    updates: broadcast::Receiver<TelemetryUpdate>,
    max_send_queue: usize,
) -> (HubHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
    let hub = TelemetryHub::new(max_send_queue);
    let task = tokio::spawn(hub.run(rx, updates));
    (HubHandle { commands: tx }, task)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use warden_core::{PeerSample, Position, PositionSample};

    use super::*;

    fn sample() -> TelemetryUpdate {
        TelemetryUpdate::PositionUpdate(PositionSample {
            self_position: Position::new(1.0, 2.0, 3.0),
            peers: vec![PeerSample {
                name: "ghost".into(),
                pos: None,
            }],
        })
    }

    #[test]
    fn closed_subscriber_pruned_once() {
        let mut hub = TelemetryHub::new(8);
        let (_a, mut rx_a) = hub.subscribe();
        let (_b, mut rx_b) = hub.subscribe();
        let (c, rx_c) = hub.subscribe();
        drop(rx_c);

        let report = hub.deliver(&sample());
        assert_eq!(
            report,
            Delivery {
                delivered: 2,
                dropped: 0,
                pruned: 1
            }
        );
        assert_eq!(hub.subscribers.len(), 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());

        // A later unsubscribe of the pruned id is a no-op.
        assert!(!hub.unsubscribe(&c));
        assert_eq!(hub.deliver(&sample()).pruned, 0);
    }

    #[test]
    fn full_queue_drops_only_for_that_subscriber() {
        let mut hub = TelemetryHub::new(1);
        let (_slow, mut slow_rx) = hub.subscribe();
        let (_fast, mut fast_rx) = hub.subscribe();

        assert_eq!(hub.deliver(&sample()).delivered, 2);
        fast_rx.try_recv().unwrap();

        let report = hub.deliver(&TelemetryUpdate::LogLine("second".into()));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(hub.subscribers.len(), 2);

        assert!(slow_rx.try_recv().unwrap().contains("positionUpdate"));
        assert!(slow_rx.try_recv().is_err());
        assert!(fast_rx.try_recv().unwrap().contains("second"));
    }

    #[test]
    fn frame_uses_wire_shape() {
        let mut hub = TelemetryHub::new(4);
        let (_id, mut rx) = hub.subscribe();
        hub.deliver(&sample());
        let frame: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["positionUpdate"]["self"]["x"], 1.0);
        assert!(frame["positionUpdate"]["peers"][0]["pos"].is_null());
    }

    #[tokio::test]
    async fn late_subscriber_gets_no_backlog() {
        let (tx, rx) = broadcast::channel(16);
        let (hub, _task) = spawn_hub(rx, 8);

        let (_early, mut early_rx) = hub.subscribe().await.unwrap();
        tx.send(TelemetryUpdate::LogLine("before".into())).unwrap();
        let first = tokio::time::timeout(Duration::from_secs(1), early_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(first.contains("before"));

        let (_late, mut late_rx) = hub.subscribe().await.unwrap();
        tx.send(TelemetryUpdate::LogLine("after".into())).unwrap();
        let got = tokio::time::timeout(Duration::from_secs(1), late_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(got.contains("after"));
        assert!(late_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn handle_tracks_count() {
        let (_tx, rx) = broadcast::channel(16);
        let (hub, _task) = spawn_hub(rx, 8);
        assert_eq!(hub.count().await, 0);

        let (a, _rx_a) = hub.subscribe().await.unwrap();
        let (_b, _rx_b) = hub.subscribe().await.unwrap();
        assert_eq!(hub.count().await, 2);

        hub.unsubscribe(a.clone()).await;
        hub.unsubscribe(a).await;
        assert_eq!(hub.count().await, 1);
    }

    #[tokio::test]
    async fn hub_survives_closed_telemetry_channel() {
        let (tx, rx) = broadcast::channel::<TelemetryUpdate>(16);
        let (hub, _task) = spawn_hub(rx, 8);
        drop(tx);
        tokio::task::yield_now().await;
        assert!(hub.subscribe().await.is_some());
        assert_eq!(hub.count().await, 1);
    }
}
