//! relaybot — chat-driven automation agent core.
//!
//! A chat front door enqueues natural-language tasks into a durable,
//! lock-protected queue; a supervised external worker CLI drains them one
//! at a time while a progress monitor tails its log back into chat
//! notifications.

pub mod channels;
pub mod config;
pub mod error;
pub mod intake;
pub mod server;
pub mod store;
pub mod worker;
