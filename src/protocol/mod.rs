//! Operator protocol: JSON envelope codec and inbound dispatch.

pub mod codec;
pub mod dispatcher;
