//! Shared helpers for the binaries and the peer links.

pub mod bootstrap;
pub mod retry;
