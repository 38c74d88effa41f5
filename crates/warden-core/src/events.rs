use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// World coordinates of an entity.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// A visible peer. `pos` is `None` when the peer's entity cannot be resolved.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeerSample {
    pub name: String,
    pub pos: Option<Position>,
}

/// One sampling tick: the session's own position plus every visible peer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    #[serde(rename = "self")]
    pub self_position: Position,
    pub peers: Vec<PeerSample>,
}

/// One entry of the vision log. Immutable once created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl LogEvent {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
        }
    }

    /// Timestamp-prefixed text line, as pushed to viewers and written to disk.
    pub fn line(&self) -> String {
        format!("[{}] {}", self.timestamp.to_rfc3339(), self.message)
    }
}

/// Push message delivered to every telemetry subscriber.
///
/// Wire form is externally tagged:
/// `{"positionUpdate":{"self":{..},"peers":[..]}}` or `{"logLine":".."}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TelemetryUpdate {
    PositionUpdate(PositionSample),
    LogLine(String),
}

impl TelemetryUpdate {
    pub fn log_line(event: &LogEvent) -> Self {
        Self::LogLine(event.line())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::PositionUpdate(_) => "position_update",
            Self::LogLine(_) => "log_line",
        }
    }
}

/// Notifications emitted by a session handle over its lifetime.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    LoggedIn,
    Spawned,
    PositionTick,
    Chat { who: String, text: String },
    Kicked { reason: String },
    Ended,
    Errored { message: String },
}

impl SessionEvent {
    /// Terminal events end the session and trigger a reconnect.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Kicked { .. } | Self::Ended | Self::Errored { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::LoggedIn => "logged_in",
            Self::Spawned => "spawned",
            Self::PositionTick => "position_tick",
            Self::Chat { .. } => "chat",
            Self::Kicked { .. } => "kicked",
            Self::Ended => "ended",
            Self::Errored { .. } => "errored",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_update_wire_shape() {
        let update = TelemetryUpdate::PositionUpdate(PositionSample {
            self_position: Position::new(1.0, 64.0, -3.5),
            peers: vec![
                PeerSample {
                    name: "alice".into(),
                    pos: Some(Position::new(2.0, 64.0, 0.0)),
                },
                PeerSample {
                    name: "bob".into(),
                    pos: None,
                },
            ],
        });
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["positionUpdate"]["self"]["y"], 64.0);
        assert_eq!(json["positionUpdate"]["peers"][0]["name"], "alice");
        assert!(json["positionUpdate"]["peers"][1]["pos"].is_null());
    }

    #[test]
    fn log_line_wire_shape() {
        let event = LogEvent::now("hello");
        let json = serde_json::to_value(TelemetryUpdate::log_line(&event)).unwrap();
        let line = json["logLine"].as_str().unwrap();
        assert!(line.starts_with('['));
        assert!(line.ends_with("] hello"));
    }

    #[test]
    fn terminal_classification() {
        assert!(SessionEvent::Ended.is_terminal());
        assert!(SessionEvent::Kicked { reason: "x".into() }.is_terminal());
        assert!(SessionEvent::Errored { message: "x".into() }.is_terminal());
        assert!(!SessionEvent::Spawned.is_terminal());
        assert!(!SessionEvent::LoggedIn.is_terminal());
        assert!(!SessionEvent::PositionTick.is_terminal());
        assert!(!SessionEvent::Chat { who: "a".into(), text: "b".into() }.is_terminal());
    }

    #[test]
    fn update_kind_strings() {
        assert_eq!(TelemetryUpdate::LogLine("x".into()).kind(), "log_line");
    }
}
