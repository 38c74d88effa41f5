//! Cancellable timers that deliver their firing into the controller inbox.
//!
//! Every timer is bound to a `CancellationToken`; the controller cancels the
//! token before it drops the session the timer belongs to. A firing that
//! races with cancellation may still land in the inbox, which is why every
//! message is also checked against the live generation.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Send `msg` once after `delay` unless cancelled first.
pub(crate) fn after<M>(delay: Duration, cancel: CancellationToken, inbox: mpsc::Sender<M>, msg: M)
where
    M: Send + 'static,
{
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => {
                let _ = inbox.send(msg).await;
            }
        }
    });
}

/// Send `make()` every `period` (first firing one period from now) until
/// cancelled or the inbox closes.
pub(crate) fn every<M, F>(period: Duration, cancel: CancellationToken, inbox: mpsc::Sender<M>, make: F)
where
    M: Send + 'static,
    F: Fn() -> M + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if inbox.send(make()).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn after_fires_once() {
        let (tx, mut rx) = mpsc::channel(4);
        after(Duration::from_secs(5), CancellationToken::new(), tx, 1u32);

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert!(rx.try_recv().is_err());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(rx.try_recv().unwrap(), 1);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_after_never_fires() {
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        after(Duration::from_secs(5), cancel.clone(), tx, 1u32);
        cancel.cancel();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn every_ticks_on_period_until_cancelled() {
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        every(Duration::from_secs(1), cancel.clone(), tx, || ());

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        let mut ticks = 0;
        while rx.try_recv().is_ok() {
            ticks += 1;
        }
        assert_eq!(ticks, 3);

        cancel.cancel();
        assert!(rx.recv().await.is_none());
    }
}
