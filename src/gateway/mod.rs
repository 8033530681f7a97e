//! Connection gateway: handshake, topic membership, heartbeats, teardown.
//!
//! The gateway is message-driven: the surrounding server accepts transport
//! connections, calls [`Gateway::connect`] with the bearer credential and an
//! outbound channel, then feeds inbound frames to [`Gateway::handle_message`]
//! and reports transport loss via [`Gateway::disconnect`]. The
//! [`local`] binding wires a client session straight to a gateway for
//! in-process deployments and tests.

mod auth;
pub mod local;
mod server;

pub use auth::{Authenticator, TokenDirectory};
pub use server::{Gateway, GatewayConfig, SweeperHandle};
