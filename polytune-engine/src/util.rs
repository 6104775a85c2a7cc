//! Small shared utilities: atomic floats, a monotonic clock base, and
//! best-effort worker thread promotion.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// `f64` stored as bits in an `AtomicU64`.
///
/// Single-value state read at high frequency from the realtime and UI paths
/// (playback position, cached duration). Relaxed ordering is sufficient: each
/// value is independently meaningful and no other data is published through
/// these cells.
#[derive(Debug)]
pub struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self {
            bits: AtomicU64::new(value.to_bits()),
        }
    }

    pub fn load(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn store(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Read-modify-write add. Only used off the realtime path.
    pub fn fetch_add(&self, delta: f64) -> f64 {
        let mut current = self.bits.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self.bits.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return f64::from_bits(current),
                Err(observed) => current = observed,
            }
        }
    }
}

/// `f32` stored as bits in an `AtomicU32`.
#[derive(Debug)]
pub struct AtomicF32 {
    bits: AtomicU32,
}

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self {
            bits: AtomicU32::new(value.to_bits()),
        }
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn store(&self, value: f32) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }
}

static CLOCK_BASE: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds on a process-wide monotonic clock.
///
/// Used for the underrun recovery-boost window, underrun log throttling and
/// the visualization demand window. Comparisons only; never wall time.
pub fn monotonic_ns() -> u64 {
    CLOCK_BASE.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

/// Best-effort nice promotion for an engine worker thread.
///
/// Applied once per worker on entry. Failure is logged and ignored; the
/// workers run correctly (if less smoothly) at default priority.
#[cfg(target_os = "linux")]
pub fn promote_thread_for_audio(role: &str, target_nice: i32) {
    // Safety: gettid/getpriority/setpriority have no memory-safety
    // preconditions; they operate on the calling thread id.
    unsafe {
        let tid = libc::gettid();
        let before = libc::getpriority(libc::PRIO_PROCESS, tid as libc::id_t);
        if libc::setpriority(libc::PRIO_PROCESS, tid as libc::id_t, target_nice) == 0 {
            let after = libc::getpriority(libc::PRIO_PROCESS, tid as libc::id_t);
            tracing::debug!(
                role,
                tid,
                before,
                after,
                target_nice,
                "thread priority promoted"
            );
        } else {
            let errno = *libc::__errno_location();
            tracing::debug!(role, tid, target_nice, errno, "thread priority promotion skipped");
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn promote_thread_for_audio(role: &str, target_nice: i32) {
    let _ = target_nice;
    tracing::debug!(role, "thread priority promotion not supported on this platform");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_f64_round_trip() {
        let value = AtomicF64::new(1.5);
        assert_eq!(value.load(), 1.5);
        value.store(-37.25);
        assert_eq!(value.load(), -37.25);
    }

    #[test]
    fn atomic_f64_fetch_add() {
        let value = AtomicF64::new(1.0);
        let previous = value.fetch_add(0.5);
        assert_eq!(previous, 1.0);
        assert_eq!(value.load(), 1.5);
    }

    #[test]
    fn atomic_f32_round_trip() {
        let value = AtomicF32::new(0.25);
        assert_eq!(value.load(), 0.25);
        value.store(2.0);
        assert_eq!(value.load(), 2.0);
    }

    #[test]
    fn monotonic_clock_advances() {
        let first = monotonic_ns();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = monotonic_ns();
        assert!(second > first);
    }
}
