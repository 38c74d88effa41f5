pub mod activity;
pub mod bridge;
pub mod controller;
pub mod error;
pub mod sampler;
mod timers;
pub mod vision;

pub use bridge::{BridgeConfig, BridgeConnector};
pub use controller::{
    ControllerConfig, ControllerHandle, ControllerState, ControllerStatus, ReconnectController,
};
pub use error::EngineError;
pub use vision::VisionLog;
