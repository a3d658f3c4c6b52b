//! Courier - durable real-time message fan-out
//!
//! Clients publish messages to any of N worker processes. Each message is
//! appended once to a shared SQLite log keyed by its idempotency key,
//! acknowledged once durable, and delivered to every connected client on
//! every worker. Reconnecting clients catch up from the log by sequence.

pub mod bus;
pub mod config;
pub mod process;
pub mod session;
pub mod storage;
pub mod transport;
pub mod utils;
pub mod worker;
