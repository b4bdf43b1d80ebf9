//! Fixed-interval tick scheduling and the run deadline.
//!
//! Both take timestamps from the caller rather than reading a clock, so the
//! catch-up rule can be exercised with a [`ManualClock`] in tests.
//!
//! [`ManualClock`]: mdsim_core::time_util::ManualClock

/// Emits at most one due tick per call, advancing by exactly one interval.
///
/// Call [`next_due`](Self::next_due) in a `while` loop: after a stall the
/// loop catches up tick by tick, so the long-run rate matches the configured
/// rate and the tick clock never jumps by more than one interval per tick.
#[derive(Debug, Clone)]
pub struct TickScheduler {
    interval_ns: u64,
    last_tick_ns: u64,
}

impl TickScheduler {
    pub fn new(interval_ns: u64, start_ns: u64) -> Self {
        Self { interval_ns: interval_ns.max(1), last_tick_ns: start_ns }
    }

    /// Scheduler for `ticks_per_second`, i.e. an interval of `1e9 / rate` ns.
    pub fn from_rate(ticks_per_second: u64, start_ns: u64) -> Self {
        Self::new(1_000_000_000 / ticks_per_second.max(1), start_ns)
    }

    /// `true` if a tick is due at `now_ns`; the tick clock then advances by
    /// one interval.
    #[inline]
    pub fn next_due(&mut self, now_ns: u64) -> bool {
        if now_ns.saturating_sub(self.last_tick_ns) >= self.interval_ns {
            self.last_tick_ns += self.interval_ns;
            true
        } else {
            false
        }
    }

    /// Number of ticks still owed at `now_ns`.
    pub fn backlog(&self, now_ns: u64) -> u64 {
        now_ns.saturating_sub(self.last_tick_ns) / self.interval_ns
    }

    #[inline]
    pub fn interval_ns(&self) -> u64 {
        self.interval_ns
    }

    #[inline]
    pub fn last_tick_ns(&self) -> u64 {
        self.last_tick_ns
    }
}

/// Answers "has the configured run duration elapsed".
#[derive(Debug, Clone, Copy)]
pub struct RunDeadline {
    start_ns: u64,
    duration_ns: u64,
}

impl RunDeadline {
    pub fn new(start_ns: u64, duration_ns: u64) -> Self {
        Self { start_ns, duration_ns }
    }

    #[inline]
    pub fn is_expired(&self, now_ns: u64) -> bool {
        self.elapsed_ns(now_ns) >= self.duration_ns
    }

    #[inline]
    pub fn elapsed_ns(&self, now_ns: u64) -> u64 {
        now_ns.saturating_sub(self.start_ns)
    }
}
