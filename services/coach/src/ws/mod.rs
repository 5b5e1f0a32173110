//! Connection to the remote conversational agent.
//!
//! - `transport`: the `Connector` seam and frame encoding over tokio-tungstenite.
//! - `connection`: the connection lifecycle, reconnect scheduling and `send`.

pub mod connection;
pub mod transport;

pub use connection::{CloseReason, ConnectionEvent, ConnectionManager, ReconnectPolicy};
pub use transport::{Connector, TungsteniteConnector};
