//! Guest virtual time for the HLE kernel.
//!
//! All kernel-visible time is **guest virtual time** (monotonic nanoseconds since reset); the
//! host never arms wall-clock timers on the kernel's behalf. Deferred work (thread wakeups,
//! timer signals) is queued as one-shot deadlines keyed by the waiting object, and the embedder
//! drives the clock forward explicitly, collecting whatever came due. This keeps scheduling
//! fully deterministic and lets unit tests single-step time.
//!
//! The guest-facing tick counter is derived from the nanosecond clock at the ARM11 core
//! frequency, so `GetSystemTick`-style queries and nanosecond timeouts stay consistent with
//! each other.

mod queue;

pub use queue::{DueEvent, EventQueue};

/// ARM11 core clock of the emulated console, in Hz.
pub const ARM11_CLOCK_HZ: u64 = 268_111_856;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Converts guest nanoseconds to ARM11 ticks (truncating).
pub fn ticks_from_ns(ns: u64) -> u64 {
    ((ns as u128) * (ARM11_CLOCK_HZ as u128) / NANOS_PER_SEC) as u64
}

/// Converts ARM11 ticks to guest nanoseconds, rounding up so that a deadline expressed in
/// ticks is never undershot when re-expressed in nanoseconds.
pub fn ns_from_ticks_ceil(ticks: u64) -> u64 {
    let numer = (ticks as u128) * NANOS_PER_SEC;
    let denom = ARM11_CLOCK_HZ as u128;
    ((numer + denom - 1) / denom) as u64
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn tick_conversion_is_monotonic_and_consistent() {
        assert_eq!(ticks_from_ns(0), 0);
        // One second of guest time is exactly one clock's worth of ticks.
        assert_eq!(ticks_from_ns(1_000_000_000), ARM11_CLOCK_HZ);
        // Round-tripping a tick count through nanoseconds may not lose ticks.
        for ticks in [1, 150, 2_000_000, ARM11_CLOCK_HZ] {
            assert!(ticks_from_ns(ns_from_ticks_ceil(ticks)) >= ticks);
        }
    }

    #[test]
    fn large_values_do_not_overflow() {
        // ~584 years of guest time.
        let ns = u64::MAX;
        let ticks = ticks_from_ns(ns);
        assert!(ticks < ns);
        assert!(ns_from_ticks_ceil(ticks) <= ns);
    }
}
