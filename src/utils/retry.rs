//! Retry utilities: backoff builders.
//!
//! Uses `backon` for exponential backoff with jitter.

use std::time::Duration;

use backon::ExponentialBuilder;

/// Pause after a failed `accept`, so a persistent error such as running
/// out of file descriptors does not spin the accept loop.
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Backoff for connecting a peer link.
///
/// Bounded so a dead peer delays its own queue for about two seconds per
/// entry, never indefinitely.
///
/// - Min delay: 50ms
/// - Max delay: 1s
/// - Max attempts: 5
/// - Jitter enabled
pub fn peer_link_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(50))
        .with_max_delay(Duration::from_secs(1))
        .with_max_times(5)
        .with_jitter()
}

/// Backoff for a supervisor waiting on a worker's port.
///
/// - Min delay: 100ms
/// - Max delay: 2s
/// - Max attempts: 20
pub fn worker_ready_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(2))
        .with_max_times(20)
}
