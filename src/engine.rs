//! Iteration engine — the heart of the session core.
//!
//! One call to [`iterate`] is one pass through the loop `Session::run`
//! drives: scan deadlines, poll, dispatch. The dispatch step is written
//! as "keep picking the next not-yet-triggered source from the top"
//! rather than an index-and-restart loop, so a callback that mutates the
//! registry out from under the scan never desynchronizes a stale index.

use std::collections::HashMap;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::pending::PendingQueue;
use crate::poll_object::PollObject;
use crate::poller::{timeout_ms_for, PollDriver};
use crate::session::AbortFlag;
use crate::source::SourceRegistry;

/// An external deadline provider: something outside the core that wants
/// its own timeout folded into the composite poll timeout, identified by
/// the poll object of an already-registered source.
pub trait ExternalDeadlineProvider {
    /// The poll object of the source this provider piggybacks its
    /// deadline onto.
    fn poll_object(&self) -> PollObject;
    /// The provider's next absolute deadline, in monotonic
    /// microseconds, if it has one right now.
    fn next_deadline_us(&self, now_us: i64) -> Option<i64>;
}

/// What happened during one call to [`iterate`].
#[derive(Debug, PartialEq, Eq)]
pub enum IterationOutcome {
    /// The registry still has sources; call `iterate` again.
    Continue,
    /// The registry is empty; `Session::run` should return.
    Empty,
    /// The abort flag was observed; `Session::run` should invoke
    /// `stop_sync` and return.
    Aborted,
}

/// Runs one iteration of the engine against `registry`, using `poller`
/// for the blocking wait, `usb` (if any) as the external deadline
/// collaborator, `abort` for cooperative cancellation, and `clock` for
/// all deadline arithmetic.
pub fn iterate(
    registry: &mut SourceRegistry,
    poller: &mut dyn PollDriver,
    usb: Option<&mut dyn ExternalDeadlineProvider>,
    abort: &AbortFlag,
    pending: &PendingQueue,
    clock: &dyn Clock,
    config: &EngineConfig,
) -> Result<IterationOutcome> {
    // Apply anything queued since the previous iteration before looking
    // at the registry at all, so a pending add from a prior callback
    // counts toward the empty-registry guard below.
    pending.drain_into(registry, clock.now_us());

    // Step 1: empty-registry guard.
    if registry.is_empty() {
        if abort.is_set() {
            return Ok(IterationOutcome::Aborted);
        }
        return Ok(IterationOutcome::Empty);
    }

    // Step 2: scan deadlines, reset triggered markers.
    let mut min_due = registry.min_due();
    for source in &mut registry.sources {
        source.triggered = false;
    }

    // Step 3: fold in the USB collaborator's deadline, if active.
    let now_us = clock.now_us();
    let usb_poll_object = usb.as_deref().map(|u| u.poll_object());
    let usb_deadline = usb.and_then(|u| u.next_deadline_us(now_us));
    if let Some(d) = usb_deadline {
        min_due = min_due.min(d);
    }

    // Step 4: compute the timeout and invoke the poll driver.
    let timeout_ms = timeout_ms_for(min_due, now_us);
    let mut flat = registry.flatten_descriptors();
    let ready_count = poller.poll(&mut flat, timeout_ms)?;

    // Step 5: stop_time is recorded immediately on return from poll.
    let stop_time_us = clock.now_us();

    // Build a revents lookup keyed by identity rather than position, so
    // that a source add/remove during dispatch can never desynchronize
    // it from the live source list.
    let revents_by_object = revents_by_poll_object(registry, &flat);

    let mut any_fired = false;

    'dispatch: loop {
        let mut idx = 0;
        loop {
            if idx >= registry.sources.len() {
                break 'dispatch;
            }
            if registry.sources[idx].triggered {
                idx += 1;
                continue;
            }

            let poll_object = registry.sources[idx].poll_object;
            let revents = revents_by_object.get(&poll_object).copied().unwrap_or(0);

            // Policy: timers do not fire in an iteration where real I/O
            // happened; this starves no source because pure timeouts
            // happen in iterations with ready_count == 0.
            if config.starvation_policy && ready_count > 0 && revents == 0 {
                idx += 1;
                continue;
            }

            let due = effective_due(&registry.sources[idx], usb_poll_object, usb_deadline);
            let should_fire = revents != 0 || stop_time_us >= due;
            if !should_fire {
                idx += 1;
                continue;
            }

            // Re-arm and mark triggered before invoking the callback:
            // the callback may remove this very source.
            {
                let source = &mut registry.sources[idx];
                if source.timeout_us >= 0 {
                    source.due_us = stop_time_us + source.timeout_us;
                }
                source.triggered = true;
            }

            let fd = if registry.sources[idx].num_fds() == 1 {
                registry.sources[idx].descriptors[0].fd
            } else {
                -1
            };
            let revents_to_pass = if ready_count > 0 { revents } else { 0 };

            #[cfg(feature = "log")]
            log::trace!("firing source {poll_object:?} (fd={fd}, revents={revents_to_pass})");

            let keep_alive = (registry.sources[idx].callback)(fd, revents_to_pass);
            if !keep_alive {
                // The callback already ran; removal failure here would
                // only mean the source vanished some other way, which
                // is not an error condition worth propagating.
                let _ = registry.remove(poll_object);
            }

            any_fired = true;

            // Apply anything this callback queued before the abort check
            // and the restart below, so a newly-added source is visible
            // to the very next scan.
            pending.drain_into(registry, stop_time_us);

            if abort.is_set() {
                return Ok(IterationOutcome::Aborted);
            }

            // Restart the scan: the callback may have added or removed
            // sources, so indices below may no longer mean what they
            // did. The triggered marker stops this source (and any
            // other already-fired source) from firing again this
            // iteration.
            continue 'dispatch;
        }
    }

    // Step 7: if nothing fired this whole iteration, still check abort
    // once.
    if !any_fired && abort.is_set() {
        return Ok(IterationOutcome::Aborted);
    }

    Ok(IterationOutcome::Continue)
}

fn effective_due(
    source: &crate::source::Source,
    usb_poll_object: Option<PollObject>,
    usb_deadline: Option<i64>,
) -> i64 {
    match (usb_poll_object, usb_deadline) {
        (Some(obj), Some(deadline)) if obj == source.poll_object => source.due_us.min(deadline),
        _ => source.due_us,
    }
}

fn revents_by_poll_object(
    registry: &SourceRegistry,
    flat: &[libc::pollfd],
) -> HashMap<PollObject, i16> {
    let mut map = HashMap::with_capacity(registry.sources.len());
    let mut cursor = 0usize;
    for source in &registry.sources {
        let n = source.num_fds();
        let mut aggregated = 0i16;
        for pfd in &flat[cursor..cursor + n] {
            aggregated |= pfd.revents;
        }
        cursor += n;
        map.insert(source.poll_object, aggregated);
    }
    map
}
