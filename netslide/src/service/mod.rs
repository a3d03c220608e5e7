pub mod hub;
pub mod registry;
pub mod token;

pub use hub::{DisconnectPolicy, HubOp, HubStats, MultiplexHub};
pub use registry::SecretRegistry;

/// Identifies one live client connection.
pub type ConnectionId = uuid::Uuid;
