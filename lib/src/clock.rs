//! Millisecond monotonic clock.
//!
//! A real kernel reads this off HPET/PIT hardware. Nothing in this crate's
//! scope owns a timer device, so the clock is an atomic counter that an
//! embedder (or a test) advances explicitly with [`tick`]. `tcp_timer_tick`
//! is the only consumer that cares about its value.

use core::sync::atomic::{AtomicU64, Ordering};

static NOW_MS: AtomicU64 = AtomicU64::new(0);

/// Current monotonic time in milliseconds.
pub fn now_ms() -> u64 {
    NOW_MS.load(Ordering::Relaxed)
}

/// Advance the clock by `delta_ms` milliseconds.
pub fn tick(delta_ms: u64) -> u64 {
    NOW_MS.fetch_add(delta_ms, Ordering::Relaxed) + delta_ms
}

/// Reset the clock to zero. Test-only: keeps successive test cases from
/// depending on how much clock time earlier cases burned.
pub fn reset() {
    NOW_MS.store(0, Ordering::Relaxed);
}
