//! The throttle policy itself lives outside the Applier core;
//! this module is only the seam the Applier consults it through.

/// Why throttling is currently in effect, if at all. The heartbeat writer
/// cares specifically about [`ThrottleReason::UserCommand`]: a
/// user-commanded pause should not distort lag measurement by skipping
/// heartbeats, so heartbeats are skipped in that case and only that case.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThrottleReason {
    /// Not currently throttled.
    NotThrottled,
    /// An operator explicitly requested a pause (e.g. via a control-plane
    /// command).
    UserCommand,
    /// Throttled for any other reason (replication lag, load, disk space,
    /// ...).
    Other,
}

impl ThrottleReason {
    pub fn is_throttled(&self) -> bool {
        !matches!(self, ThrottleReason::NotThrottled)
    }
}

/// Consulted, never decided, by the Applier. A real implementation
/// evaluates load, replication lag, and operator commands; the Applier
/// only asks "should I pause?" before costly work (heartbeat ticks, DML
/// apply batches).
pub trait ThrottleChecker: Send + Sync {
    fn current_reason(&self) -> ThrottleReason;
}

/// A checker that never throttles, for tests and for standalone use of the
/// Applier without a throttler wired in.
#[derive(Default)]
pub struct NeverThrottle;

impl ThrottleChecker for NeverThrottle {
    fn current_reason(&self) -> ThrottleReason {
        ThrottleReason::NotThrottled
    }
}
