//! Poll driver: one blocking wait across the aggregated descriptors with
//! a computed timeout.

use crate::error::Result;

/// Abstracts the single blocking syscall the iteration engine suspends
/// on, so tests can substitute a driver that never actually blocks.
pub trait PollDriver {
    /// Waits up to `timeout_ms` (`-1` = forever, `0` = don't block) for
    /// any descriptor in `descriptors` to become ready, filling in each
    /// entry's `revents`. Returns the number of ready descriptors.
    ///
    /// A premature wakeup (signal interruption on POSIX) is not an
    /// error and is reported back as `Ok(0)`; only a genuine OS failure
    /// propagates as `Err`.
    fn poll(&mut self, descriptors: &mut [libc::pollfd], timeout_ms: i32) -> Result<usize>;
}

/// `poll(2)`-backed driver used on unix targets.
#[derive(Debug, Default)]
pub struct UnixPoller;

impl PollDriver for UnixPoller {
    fn poll(&mut self, descriptors: &mut [libc::pollfd], timeout_ms: i32) -> Result<usize> {
        // SAFETY: `descriptors` is a valid, exclusively-borrowed slice
        // for the duration of the call; its length fits `nfds_t`.
        let ret = unsafe {
            libc::poll(
                descriptors.as_mut_ptr(),
                descriptors.len() as libc::nfds_t,
                timeout_ms,
            )
        };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                #[cfg(feature = "log")]
                log::trace!("poll interrupted by a signal, treating as a spurious wakeup");
                return Ok(0);
            }
            return Err(err.into());
        }
        Ok(ret as usize)
    }
}

/// Computes the millisecond timeout to pass to `poll`.
///
/// `-1` if no source has a finite deadline, `0` if the earliest deadline
/// has already passed, otherwise the ceiling of the remaining
/// microseconds divided by 1000, clamped to `i32::MAX`.
pub fn timeout_ms_for(min_due_us: i64, now_us: i64) -> i32 {
    if min_due_us == i64::MAX {
        return -1;
    }
    if now_us >= min_due_us {
        return 0;
    }
    let remaining_us = min_due_us - now_us;
    let ms = remaining_us.saturating_add(999) / 1_000;
    ms.min(i32::MAX as i64) as i32
}
