//! Reconnection controller: owns the single live session and keeps it alive.
//!
//! One task owns all lifecycle state and processes an inbox of session
//! events and timer firings in order. Nothing else touches the session, so
//! transitions never overlap. Structural invariants:
//!
//! - at most one live session (`session` is an `Option`, and
//!   `create_session` refuses while it is `Some` or a reconnect is pending);
//! - at most one pending reconnect timer (`reconnect` is an `Option`);
//! - every timer of a generation is cancelled before its session is dropped,
//!   and firings from any other generation are ignored.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};
use warden_core::{
    Generation, Identity, SessionConnection, SessionConnector, SessionEvent, SessionHandle,
    TelemetryUpdate,
};

use crate::activity::{self, ActivityConfig};
use crate::error::EngineError;
use crate::sampler;
use crate::timers;
use crate::vision::VisionLog;

const INBOX_CAPACITY: usize = 256;

/// Timing and identity parameters of the controller.
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    pub identity_prefix: String,
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
    pub sample_period: Duration,
    pub activity: ActivityConfig,
    /// Fixed RNG seed; `None` seeds from OS entropy.
    pub seed: Option<u64>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            identity_prefix: "ByteBot".to_string(),
            reconnect_delay: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(15),
            sample_period: Duration::from_secs(1),
            activity: ActivityConfig::default(),
            seed: None,
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(0.0..=1.0).contains(&self.activity.jump_probability) {
            return Err(EngineError::InvalidConfig(format!(
                "jump probability {} outside [0, 1]",
                self.activity.jump_probability
            )));
        }
        if self.reconnect_delay.is_zero()
            || self.connect_timeout.is_zero()
            || self.sample_period.is_zero()
            || self.activity.period.is_zero()
        {
            return Err(EngineError::InvalidConfig("timer periods must be non-zero".into()));
        }
        if self.activity.release_after >= self.activity.period {
            return Err(EngineError::InvalidConfig(
                "activity release must be shorter than the activity period".into(),
            ));
        }
        Ok(())
    }
}

/// Lifecycle state as seen from outside.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    Idle,
    Connecting,
    Active,
    Disconnecting,
}

/// Snapshot published on every transition.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerStatus {
    pub state: ControllerState,
    pub generation: Generation,
    pub identity: Option<Identity>,
    pub reconnect_pending: bool,
}

impl Default for ControllerStatus {
    fn default() -> Self {
        Self {
            state: ControllerState::Idle,
            generation: Generation::ZERO,
            identity: None,
            reconnect_pending: false,
        }
    }
}

/// Messages processed by the controller loop.
#[derive(Debug)]
pub(crate) enum Inbox {
    Session {
        generation: Generation,
        event: SessionEvent,
    },
    GuardExpired {
        generation: Generation,
    },
    ReconnectDue,
    ActivityPulse {
        generation: Generation,
    },
    ActivityRelease {
        generation: Generation,
    },
    SampleTick {
        generation: Generation,
    },
    CreateSession,
}

/// Cloneable handle for observing and nudging a running controller.
#[derive(Clone)]
pub struct ControllerHandle {
    inbox: mpsc::Sender<Inbox>,
    status: watch::Receiver<ControllerStatus>,
}

impl ControllerHandle {
    pub fn status(&self) -> ControllerStatus {
        self.status.borrow().clone()
    }

    /// Ask for a session to be created. A no-op while one is live or a
    /// reconnect is already pending.
    pub async fn request_session(&self) {
        let _ = self.inbox.send(Inbox::CreateSession).await;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Connecting,
    Active,
}

struct LiveSession {
    generation: Generation,
    identity: Identity,
    handle: Arc<dyn SessionHandle>,
    phase: Phase,
    /// Parent of every timer and the event forwarder of this generation.
    cancel: CancellationToken,
    guard: CancellationToken,
}

pub struct ReconnectController {
    config: ControllerConfig,
    connector: Arc<dyn SessionConnector>,
    vision: VisionLog,
    telemetry: broadcast::Sender<TelemetryUpdate>,
    rng: StdRng,
    generation: Generation,
    session: Option<LiveSession>,
    reconnect: Option<CancellationToken>,
    inbox_tx: mpsc::Sender<Inbox>,
    inbox_rx: mpsc::Receiver<Inbox>,
    status_tx: watch::Sender<ControllerStatus>,
}

impl ReconnectController {
    pub fn new(
        config: ControllerConfig,
        connector: Arc<dyn SessionConnector>,
        vision: VisionLog,
        telemetry: broadcast::Sender<TelemetryUpdate>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let (status_tx, _) = watch::channel(ControllerStatus::default());
        Ok(Self {
            config,
            connector,
            vision,
            telemetry,
            rng,
            generation: Generation::ZERO,
            session: None,
            reconnect: None,
            inbox_tx,
            inbox_rx,
            status_tx,
        })
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            inbox: self.inbox_tx.clone(),
            status: self.status_tx.subscribe(),
        }
    }

    /// Connect immediately, then process the inbox until `shutdown` fires.
    /// On shutdown the live session is closed and no reconnect is scheduled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        self.create_session();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                msg = self.inbox_rx.recv() => match msg {
                    Some(msg) => self.on_message(msg),
                    None => break,
                },
            }
        }

        self.stop();
    }

    fn on_message(&mut self, msg: Inbox) {
        match msg {
            Inbox::Session { generation, event } => {
                if self.live_phase(generation).is_none() {
                    trace!(%generation, kind = event.kind(), "stale session event dropped");
                    return;
                }
                self.on_session_event(event);
            }
            Inbox::GuardExpired { generation } => {
                if self.live_phase(generation) == Some(Phase::Connecting) {
                    self.vision.record(format!(
                        "connect timed out after {:?}",
                        self.config.connect_timeout
                    ));
                    self.teardown();
                }
            }
            Inbox::ReconnectDue => {
                if self.reconnect.take().is_some() {
                    self.create_session();
                }
            }
            Inbox::ActivityPulse { generation } => {
                if self.live_phase(generation) == Some(Phase::Active) {
                    self.pulse();
                }
            }
            Inbox::ActivityRelease { generation } => {
                if let Some(session) = self.live(generation) {
                    activity::release(session.handle.as_ref());
                }
            }
            Inbox::SampleTick { generation } => {
                if self.live_phase(generation) == Some(Phase::Active) {
                    self.sample();
                }
            }
            Inbox::CreateSession => self.create_session(),
        }
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        let Some(session) = &self.session else {
            return;
        };
        let identity = session.identity.clone();

        match event {
            SessionEvent::LoggedIn => {
                self.vision.record(format!("{identity} logged in"));
            }
            SessionEvent::Spawned => self.activate(),
            SessionEvent::PositionTick => {
                trace!(%identity, "position tick");
            }
            SessionEvent::Chat { who, text } => {
                if identity.as_str() != who {
                    self.vision.record(format!("{who}: {text}"));
                }
            }
            SessionEvent::Kicked { reason } => {
                self.vision.record(format!("{identity} kicked: {reason}"));
                self.teardown();
            }
            SessionEvent::Ended => {
                self.vision.record(format!("{identity} disconnected"));
                self.teardown();
            }
            SessionEvent::Errored { message } => {
                self.vision.record(format!("{identity} error: {message}"));
                self.teardown();
            }
        }
    }

    /// Start a new connection attempt. Idempotent: does nothing while a
    /// session is live or a reconnect is pending.
    fn create_session(&mut self) {
        if let Some(session) = &self.session {
            debug!(generation = %session.generation, "session already live, create ignored");
            return;
        }
        if self.reconnect.is_some() {
            debug!("reconnect pending, create ignored");
            return;
        }

        let identity = Identity::generate(&self.config.identity_prefix, &mut self.rng);
        self.generation = self.generation.next();
        let generation = self.generation;
        info!(%generation, %identity, "connecting");

        match self.connector.connect(&identity) {
            Ok(SessionConnection { handle, events }) => {
                let cancel = CancellationToken::new();
                let guard = cancel.child_token();
                forward_events(events, generation, self.inbox_tx.clone(), cancel.clone());
                timers::after(
                    self.config.connect_timeout,
                    guard.clone(),
                    self.inbox_tx.clone(),
                    Inbox::GuardExpired { generation },
                );
                self.session = Some(LiveSession {
                    generation,
                    identity,
                    handle,
                    phase: Phase::Connecting,
                    cancel,
                    guard,
                });
                self.publish_status(ControllerState::Connecting);
            }
            Err(e) => {
                self.vision.record(format!("{identity} error: {e}"));
                self.schedule_reconnect();
            }
        }
    }

    /// Connecting → Active: disarm the guard, start pulses and sampling.
    fn activate(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.phase == Phase::Active {
            return;
        }
        session.phase = Phase::Active;
        session.guard.cancel();

        let generation = session.generation;
        timers::every(
            self.config.activity.period,
            session.cancel.child_token(),
            self.inbox_tx.clone(),
            move || Inbox::ActivityPulse { generation },
        );
        timers::every(
            self.config.sample_period,
            session.cancel.child_token(),
            self.inbox_tx.clone(),
            move || Inbox::SampleTick { generation },
        );

        let identity = session.identity.clone();
        self.vision.record(format!("{identity} spawned"));
        self.publish_status(ControllerState::Active);
    }

    fn pulse(&mut self) {
        let intent = activity::choose_intent(&mut self.rng, self.config.activity.jump_probability);
        let Some(session) = &self.session else {
            return;
        };
        if activity::pulse(session.handle.as_ref(), intent) {
            trace!(generation = %session.generation, ?intent, "activity pulse");
            timers::after(
                self.config.activity.release_after,
                session.cancel.child_token(),
                self.inbox_tx.clone(),
                Inbox::ActivityRelease {
                    generation: session.generation,
                },
            );
        }
    }

    fn sample(&self) {
        let Some(session) = &self.session else {
            return;
        };
        if let Some(sample) = sampler::sample(session.handle.as_ref()) {
            let _ = self.telemetry.send(TelemetryUpdate::PositionUpdate(sample));
        }
    }

    /// Cancel every timer of the live session, close it best-effort, drop
    /// it, and arm the reconnect timer.
    fn teardown(&mut self) {
        if self.close_session() {
            self.schedule_reconnect();
        }
    }

    fn close_session(&mut self) -> bool {
        let Some(session) = self.session.take() else {
            return false;
        };
        self.status_tx.send_modify(|s| s.state = ControllerState::Disconnecting);

        session.cancel.cancel();
        if let Err(e) = session.handle.disconnect() {
            debug!(generation = %session.generation, error = %e, "disconnect failed during teardown, ignoring");
        }
        info!(generation = %session.generation, identity = %session.identity, "session closed");
        drop(session);

        self.publish_status(ControllerState::Idle);
        true
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect.is_some() {
            debug!("reconnect already pending");
            return;
        }
        let token = CancellationToken::new();
        timers::after(
            self.config.reconnect_delay,
            token.clone(),
            self.inbox_tx.clone(),
            Inbox::ReconnectDue,
        );
        self.reconnect = Some(token);
        self.vision.record(format!(
            "reconnecting in {:?}",
            self.config.reconnect_delay
        ));
        self.publish_status(ControllerState::Idle);
    }

    fn stop(&mut self) {
        if let Some(token) = self.reconnect.take() {
            token.cancel();
        }
        self.close_session();
        self.publish_status(ControllerState::Idle);
        info!("controller stopped");
    }

    fn live(&self, generation: Generation) -> Option<&LiveSession> {
        self.session.as_ref().filter(|s| s.generation == generation)
    }

    fn live_phase(&self, generation: Generation) -> Option<Phase> {
        self.live(generation).map(|s| s.phase)
    }

    fn publish_status(&self, state: ControllerState) {
        debug_assert!(
            !(self.session.is_some() && self.reconnect.is_some()),
            "live session with a pending reconnect"
        );
        self.status_tx.send_replace(ControllerStatus {
            state,
            generation: self.generation,
            identity: self.session.as_ref().map(|s| s.identity.clone()),
            reconnect_pending: self.reconnect.is_some(),
        });
    }
}

/// Pump one session's events into the inbox, tagged with its generation.
/// A closed stream is reported as `Ended`.
fn forward_events(
    mut events: mpsc::Receiver<SessionEvent>,
    generation: Generation,
    inbox: mpsc::Sender<Inbox>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            let closed = event.is_none();
            let event = event.unwrap_or(SessionEvent::Ended);
            if inbox.send(Inbox::Session { generation, event }).await.is_err() || closed {
                break;
            }
        }
    });
}
