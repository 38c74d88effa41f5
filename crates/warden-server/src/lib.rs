pub mod client;
pub mod hub;
pub mod server;

pub use hub::{spawn_hub, HubHandle};
pub use server::{start, ServerConfig, ServerHandle};
