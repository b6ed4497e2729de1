//! Fixed-bucket latency histogram exported in Prometheus form.
//!
//! Bounds run from a counter increment (tens of microseconds) to a slow
//! CloudConvert job (a minute).

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub const BUCKET_COUNT: usize = 16;

/// Upper bounds (`le`) in microseconds.
pub const HISTOGRAM_BUCKETS: [u64; BUCKET_COUNT] = [
    50,
    100,
    250,
    500,
    1_000,
    2_500,
    5_000,
    10_000,
    25_000,
    50_000,
    100_000,
    500_000,
    1_000_000,
    5_000_000,
    15_000_000,
    60_000_000,
];

/// Latency histogram in microseconds.
///
/// Each observation touches one slot; cumulative `le` counts are derived
/// when reading. Slot `BUCKET_COUNT` holds values above the last bound.
///
/// ```
/// use contractor::metrics::Histogram;
///
/// let h = Histogram::new();
/// h.observe(150);
/// h.observe(70_000_000);
///
/// let (sum, count, le) = h.snapshot();
/// assert_eq!((sum, count), (70_000_150, 2));
/// assert_eq!(le[1], 0);
/// assert_eq!(le[2], 1);
/// ```
pub struct Histogram {
    sum: AtomicU64,
    count: AtomicU64,
    slots: [AtomicU64; BUCKET_COUNT + 1],
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    pub fn new() -> Self {
        Self {
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
            slots: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Index of the first bound `>= value_us`, or the overflow slot.
    fn slot_for(value_us: u64) -> usize {
        HISTOGRAM_BUCKETS.partition_point(|&bound| bound < value_us)
    }

    pub fn observe(&self, value_us: u64) {
        self.slots[Self::slot_for(value_us)].fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value_us, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_duration(&self, elapsed: Duration) {
        self.observe(u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX));
    }

    /// `(sum, count, cumulative count per bound)`.
    pub fn snapshot(&self) -> (u64, u64, [u64; BUCKET_COUNT]) {
        let mut le = [0u64; BUCKET_COUNT];
        let mut running = 0;
        for (total, slot) in le.iter_mut().zip(&self.slots) {
            running += slot.load(Ordering::Relaxed);
            *total = running;
        }
        (
            self.sum.load(Ordering::Relaxed),
            self.count.load(Ordering::Relaxed),
            le,
        )
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn format_prometheus(&self, name: &str, help: &str) -> String {
        let (sum, count, le) = self.snapshot();

        let mut out = String::with_capacity(64 * (BUCKET_COUNT + 5));
        let _ = writeln!(out, "# HELP {} {}", name, help);
        let _ = writeln!(out, "# TYPE {} histogram", name);
        for (bound, total) in HISTOGRAM_BUCKETS.iter().zip(le) {
            let _ = writeln!(out, "{}_bucket{{le=\"{}\"}} {}", name, bound, total);
        }
        let _ = writeln!(out, "{}_bucket{{le=\"+Inf\"}} {}", name, count);
        let _ = writeln!(out, "{}_sum {}", name, sum);
        let _ = writeln!(out, "{}_count {}", name, count);
        out
    }
}
