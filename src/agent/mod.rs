//! Agent side of the broker.
//!
//! - `listener`: TCP accept loop that turns connections into sessions.
//! - `link`: agent wire transport (raw or length-prefixed framing).
//! - `worker`: one task per session moving commands out and replies back.

pub mod link;
pub mod listener;
pub mod worker;
