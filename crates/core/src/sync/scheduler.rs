//! Scheduler constants for background sync.

/// Periodic drain cadence in seconds.
pub const SYNC_PERIODIC_INTERVAL_SECS: u64 = 60;

/// Maximum jitter (seconds) added to periodic drain intervals so a fleet of
/// devices does not hit the API in lockstep.
pub const SYNC_INTERVAL_JITTER_SECS: u64 = 10;

/// Delay before the first automatic drain after startup.
pub const SYNC_STARTUP_DELAY_SECS: u64 = 3;
