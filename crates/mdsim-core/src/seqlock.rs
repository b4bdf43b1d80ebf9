//! Single-writer / multi-reader publication via a sequence lock.
//!
//! Each [`SeqLockCell`] pairs a version counter with a `Copy` value. The
//! writer bumps the version to an odd number, stores the value, then bumps it
//! to the next even number. Readers copy the value between two version loads
//! and keep the copy only when both loads agree (and are even), which rules
//! out observing a half-written value without ever blocking the writer.
//!
//! The cells are grouped into a fixed-size [`SeqLockTable`], split into one
//! [`TableWriter`] and any number of [`TableReader`]s:
//!
//! ```text
//! decode thread ──► TableWriter::publish(slot, msg)
//!                         │  (Release)
//!                         ▼
//!            [ SeqLockCell ; capacity ]  ◄── TableReader::get(slot)  (Acquire)
//! ```
//!
//! The writer is neither `Clone` nor usable through a shared reference, so the
//! single-writer requirement is carried by the type rather than by convention.

use std::{
    cell::UnsafeCell,
    hint,
    mem::MaybeUninit,
    ptr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering, fence},
    },
};

// ---------------------------------------------------------------------------
// SeqLockCell
// ---------------------------------------------------------------------------

/// One seqlock-protected slot, padded to its own cache line.
///
/// Version `0` means "never written"; an odd version means a write is in
/// progress.
#[repr(C, align(64))]
pub struct SeqLockCell<T> {
    version: AtomicU64,
    value: UnsafeCell<T>,
}

// SAFETY: readers only obtain copies validated by the version protocol, and
// `write` is restricted to a single thread by its contract.
unsafe impl<T: Copy + Send> Sync for SeqLockCell<T> {}

impl<T: Copy> SeqLockCell<T> {
    pub const fn new(initial: T) -> Self {
        Self { version: AtomicU64::new(0), value: UnsafeCell::new(initial) }
    }

    /// Publish a new value.
    ///
    /// # Safety
    ///
    /// No other thread may call `write` on this cell concurrently.
    #[inline]
    pub unsafe fn write(&self, value: T) {
        let v = self.version.load(Ordering::Relaxed);
        self.version.store(v.wrapping_add(1), Ordering::Release);
        fence(Ordering::Release);

        // SAFETY: the caller guarantees exclusive write access; concurrent
        // readers discard whatever they copy while the version is odd.
        unsafe { ptr::write_volatile(self.value.get(), value) };

        self.version.store(v.wrapping_add(2), Ordering::Release);
    }

    /// Take a consistent snapshot, or `None` if nothing was ever published.
    ///
    /// Spins while a write is in flight or a torn copy is detected. The copy
    /// stays uninitialized memory until the version check has passed.
    #[inline]
    pub fn read(&self) -> Option<T> {
        loop {
            let v1 = self.version.load(Ordering::Acquire);
            if v1 & 1 == 1 {
                hint::spin_loop();
                continue;
            }

            // SAFETY: the raw bytes are copied as `MaybeUninit<T>`, so a copy
            // torn by a concurrent write is never treated as a `T`.
            let copy = unsafe { ptr::read_volatile(self.value.get().cast::<MaybeUninit<T>>()) };
            fence(Ordering::Acquire);

            let v2 = self.version.load(Ordering::Relaxed);
            if v1 == v2 {
                if v1 == 0 {
                    return None;
                }
                // SAFETY: equal even versions mean no write overlapped the
                // copy, so it holds a complete value published by `write`.
                return Some(unsafe { copy.assume_init() });
            }
            hint::spin_loop();
        }
    }

    /// Current version: twice the number of completed publishes, plus one
    /// while a publish is in flight.
    #[inline]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// SeqLockTable
// ---------------------------------------------------------------------------

/// Fixed array of seqlock cells indexed by slot number.
pub struct SeqLockTable<T> {
    slots: Box<[SeqLockCell<T>]>,
}

impl<T: Copy + Default + Send> SeqLockTable<T> {
    /// Allocate `capacity` zero-version slots and split them into the unique
    /// writer handle and a first reader handle.
    pub fn split(capacity: usize) -> (TableWriter<T>, TableReader<T>) {
        let slots = (0..capacity).map(|_| SeqLockCell::new(T::default())).collect();
        let table = Arc::new(Self { slots });
        (TableWriter { table: Arc::clone(&table) }, TableReader { table })
    }
}

impl<T> SeqLockTable<T> {
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

/// The only handle allowed to publish into a [`SeqLockTable`].
pub struct TableWriter<T> {
    table: Arc<SeqLockTable<T>>,
}

impl<T: Copy + Send> TableWriter<T> {
    /// Publish `value` into `slot`. Returns `false` (and drops the value) if
    /// the slot is out of range.
    #[inline]
    pub fn publish(&mut self, slot: usize, value: T) -> bool {
        match self.table.slots.get(slot) {
            Some(cell) => {
                // SAFETY: `&mut self` on the unique, non-Clone writer handle
                // excludes any concurrent writer.
                unsafe { cell.write(value) };
                true
            }
            None => false,
        }
    }

    /// Hand out another reader for the same table.
    pub fn reader(&self) -> TableReader<T> {
        TableReader { table: Arc::clone(&self.table) }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }
}

/// Read-only handle; cheap to clone and safe to use from any thread.
pub struct TableReader<T> {
    table: Arc<SeqLockTable<T>>,
}

impl<T> Clone for TableReader<T> {
    fn clone(&self) -> Self {
        Self { table: Arc::clone(&self.table) }
    }
}

impl<T: Copy + Send> TableReader<T> {
    /// Latest published value for `slot`, or `None` if the slot is out of
    /// range or was never written.
    #[inline]
    pub fn get(&self, slot: usize) -> Option<T> {
        self.table.slots.get(slot)?.read()
    }

    /// Version counter of `slot` (0 if out of range).
    #[inline]
    pub fn version(&self, slot: usize) -> u64 {
        self.table.slots.get(slot).map(SeqLockCell::version).unwrap_or(0)
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MarketMessage, Payload, Quote, Trade};
    use std::sync::atomic::AtomicBool;

    /// Every field is derived from `seq`, so a torn copy is detectable.
    #[derive(Debug, Clone, Copy, Default)]
    struct Stamped {
        seq: u64,
        doubled: u64,
        price: f64,
        inverted: u64,
    }

    impl Stamped {
        fn new(seq: u64) -> Self {
            Self { seq, doubled: seq.wrapping_mul(2), price: seq as f64 * 0.25, inverted: !seq }
        }

        fn is_consistent(&self) -> bool {
            self.doubled == self.seq.wrapping_mul(2)
                && self.price == self.seq as f64 * 0.25
                && self.inverted == !self.seq
        }
    }

    #[test]
    fn unwritten_slot_reads_none() {
        let (_writer, reader) = SeqLockTable::<Stamped>::split(4);
        assert!(reader.get(0).is_none());
        assert_eq!(reader.version(0), 0);
    }

    #[test]
    fn publish_then_read() {
        let (mut writer, reader) = SeqLockTable::<Stamped>::split(4);
        assert!(writer.publish(2, Stamped::new(9)));
        assert_eq!(reader.get(2).map(|p| p.seq), Some(9));
        assert_eq!(reader.version(2), 2);

        writer.publish(2, Stamped::new(10));
        assert_eq!(reader.get(2).map(|p| p.seq), Some(10));
        assert_eq!(reader.version(2), 4);
        assert!(reader.get(1).is_none());
    }

    #[test]
    fn out_of_range_slot() {
        let (mut writer, reader) = SeqLockTable::<Stamped>::split(2);
        assert!(!writer.publish(2, Stamped::new(1)));
        assert!(reader.get(2).is_none());
        assert_eq!(reader.version(99), 0);
    }

    #[test]
    fn concurrent_readers_never_see_torn_writes() {
        const WRITES: u64 = 200_000;
        let (mut writer, reader) = SeqLockTable::<Stamped>::split(1);
        let done = AtomicBool::new(false);

        std::thread::scope(|s| {
            for _ in 0..3 {
                let reader = reader.clone();
                let done = &done;
                s.spawn(move || {
                    let mut last_seen = 0u64;
                    let mut hits = 0u64;
                    while !done.load(Ordering::Acquire) {
                        if let Some(p) = reader.get(0) {
                            assert!(p.is_consistent(), "torn read: {p:?}");
                            assert!(p.seq >= 1 && p.seq <= WRITES, "never published: {}", p.seq);
                            assert!(p.seq >= last_seen, "went backwards: {} < {last_seen}", p.seq);
                            last_seen = p.seq;
                            hits += 1;
                        }
                    }
                    hits
                });
            }

            for seq in 1..=WRITES {
                writer.publish(0, Stamped::new(seq));
            }
            done.store(true, Ordering::Release);
        });

        assert_eq!(reader.get(0).map(|p| p.seq), Some(WRITES));
        assert_eq!(reader.version(0), WRITES * 2);
    }

    /// Alternate the payload variant on every publish. Odd sequences are
    /// trades, even ones quotes whose float bits would make an invalid
    /// `bool` if they ever leaked into a trade's aggressor flag.
    fn alternating(seq: u64) -> MarketMessage {
        let payload = if seq % 2 == 1 {
            Payload::Trade(Trade {
                price: seq as f64,
                qty: seq as u32,
                aggressor_buy: seq % 4 == 1,
            })
        } else {
            let bits = f64::from_bits(0x7F7F_7F7F_7F7F_7F7F);
            Payload::Quote(Quote {
                bid_price: bits,
                ask_price: bits,
                bid_qty: u32::MAX,
                ask_qty: u32::MAX,
            })
        };
        MarketMessage { symbol_id: 1, sequence: seq, timestamp_ns: seq, payload }
    }

    #[test]
    fn mixed_payload_variants_are_read_whole() {
        const WRITES: u64 = 100_000;
        let (mut writer, reader) = SeqLockTable::<MarketMessage>::split(2);
        let done = AtomicBool::new(false);

        std::thread::scope(|s| {
            for _ in 0..3 {
                let reader = reader.clone();
                let done = &done;
                s.spawn(move || {
                    while !done.load(Ordering::Acquire) {
                        let Some(msg) = reader.get(1) else { continue };
                        assert_eq!(msg, alternating(msg.sequence), "torn message {msg:?}");
                    }
                });
            }

            for seq in 1..=WRITES {
                writer.publish(1, alternating(seq));
            }
            done.store(true, Ordering::Release);
        });

        assert_eq!(reader.get(1), Some(alternating(WRITES)));
    }
}
