//! HTTP and WebSocket surface for the Argus process supervisor.
pub mod gateway_server;

pub use gateway_server::*;
