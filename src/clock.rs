//! Monotonic clock.
//!
//! The only admissible clock for deadlines; wall-clock is never used
//! because it can jump backwards under NTP correction and would corrupt
//! every `due_us` comparison in the iteration engine.

use std::sync::OnceLock;
use std::time::Instant;

/// Returns a non-decreasing microsecond timestamp.
///
/// Abstracted behind a trait so the iteration engine and its tests can
/// supply a fake clock instead of the real OS one (see
/// `engine::tests::FakeClock`).
pub trait Clock {
    fn now_us(&self) -> i64;
}

/// The real OS monotonic clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now_us(&self) -> i64 {
        now_us()
    }
}

#[cfg(unix)]
fn now_us() -> i64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, uniquely-owned out-parameter for the
    // duration of the call.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        // clock_gettime(CLOCK_MONOTONIC) cannot fail on a conforming
        // kernel; fall back to the process-relative clock rather than
        // panic on an unmapped platform quirk.
        return process_relative_us();
    }
    ts.tv_sec as i64 * 1_000_000 + ts.tv_nsec as i64 / 1_000
}

#[cfg(not(unix))]
fn now_us() -> i64 {
    process_relative_us()
}

fn process_relative_us() -> i64 {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    let origin = *ORIGIN.get_or_init(Instant::now);
    origin.elapsed().as_micros() as i64
}
