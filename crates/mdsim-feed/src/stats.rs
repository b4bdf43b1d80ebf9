//! Feed counters, written by the decode thread and read from anywhere.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

#[derive(Debug, Default)]
pub struct FeedStats {
    messages: AtomicU64,
    gaps: AtomicU64,
    malformed: AtomicU64,
    bytes: AtomicU64,
}

/// Point-in-time copy of [`FeedStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStatsSnapshot {
    pub messages: u64,
    /// Sequence gaps plus malformed frames.
    pub gaps: u64,
    pub malformed: u64,
    pub bytes: u64,
}

impl FeedStats {
    #[inline]
    pub fn record_message(&self) {
        self.messages.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_gap(&self) {
        self.gaps.fetch_add(1, Ordering::Relaxed);
    }

    /// A dropped frame is also a gap in the stream.
    #[inline]
    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
        self.gaps.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_bytes(&self, n: usize) {
        self.bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FeedStatsSnapshot {
        FeedStatsSnapshot {
            messages: self.messages.load(Ordering::Relaxed),
            gaps: self.gaps.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

impl FeedStatsSnapshot {
    /// Counter increase since an earlier snapshot.
    pub fn delta(&self, earlier: &FeedStatsSnapshot) -> FeedStatsSnapshot {
        FeedStatsSnapshot {
            messages: self.messages.saturating_sub(earlier.messages),
            gaps: self.gaps.saturating_sub(earlier.gaps),
            malformed: self.malformed.saturating_sub(earlier.malformed),
            bytes: self.bytes.saturating_sub(earlier.bytes),
        }
    }
}

impl fmt::Display for FeedStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "messages={} gaps={} malformed={} bytes={}",
            self.messages, self.gaps, self.malformed, self.bytes
        )
    }
}
