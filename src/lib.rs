//! Two-party WebSocket signaling gateway.
//!
//! Browsers join a named room holding at most two sessions. The gateway
//! forwards offers, answers and ICE candidates to the other occupant and
//! fans chat messages out to the whole room; media flows peer to peer.

pub mod app;
pub mod config;
pub mod error;
pub mod protocol;
pub mod rooms;
pub mod signaling_server;

pub use app::router;
pub use config::Config;
pub use signaling_server::SignalingState;
