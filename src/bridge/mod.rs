//! Realtime bridge to the operator channel.
//!
//! The broker is the WebSocket *client*: it dials the operator bridge,
//! performs the opening handshake itself and writes every frame by hand.
//!
//! - `frame`: masked frame builder and inbound frame decoder.
//! - `handshake`: HTTP/1.1 upgrade exchange.
//! - `service`: connect / serve / reconnect loop draining the output queue.

pub mod frame;
pub mod handshake;
pub mod service;
