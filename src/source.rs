//! Event-source registry.
//!
//! Each [`Source`] owns its own descriptor slice instead of indexing
//! into a single shared array. The flat array the poll driver actually
//! needs is rebuilt fresh from the live source list on every iteration,
//! which removes parallel-array alignment as something that has to be
//! maintained by hand, at the cost of an O(n) rebuild per iteration —
//! cheap next to a blocking `poll` call.

use std::os::unix::io::RawFd;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::poll_object::PollObject;

/// One descriptor a source contributes to the poll set.
#[derive(Debug, Clone, Copy)]
pub struct PollDescriptor {
    pub fd: RawFd,
    pub events: i16,
}

/// Callback invoked when a source fires. Receives the descriptor that
/// was ready (or a sentinel `-1` when the source multiplexes more than
/// one descriptor, or when this fire is a pure timeout) and the
/// aggregated readiness mask (`0` on a pure timeout). Returns `false` to
/// have the source removed.
pub type SourceCallback = Box<dyn FnMut(RawFd, i16) -> bool>;

pub(crate) struct Source {
    pub poll_object: PollObject,
    pub descriptors: Vec<PollDescriptor>,
    /// Re-arm period in microseconds, or `-1` for "infinite" (fires only
    /// on I/O).
    pub timeout_us: i64,
    /// Next absolute firing deadline on the monotonic clock, or
    /// `i64::MAX` for an infinite-timeout source.
    pub due_us: i64,
    /// Cleared at the top of every iteration; set the instant a source
    /// is re-armed and handed to its callback, so a restarted dispatch
    /// scan never fires it twice in the same iteration.
    pub triggered: bool,
    pub callback: SourceCallback,
}

impl Source {
    pub fn num_fds(&self) -> usize {
        self.descriptors.len()
    }
}

#[derive(Default)]
pub struct SourceRegistry {
    pub(crate) sources: Vec<Source>,
}

impl SourceRegistry {
    pub fn new(config: &EngineConfig) -> Self {
        SourceRegistry {
            sources: Vec::with_capacity(config.initial_descriptor_capacity),
        }
    }

    pub fn count(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Registers a new source. `timeout_ms < 0` means "infinite" (fires
    /// only on I/O); a source with zero descriptors cannot have an
    /// infinite timeout, since it would then never fire at all.
    pub fn add(
        &mut self,
        poll_object: PollObject,
        descriptors: Vec<PollDescriptor>,
        timeout_ms: i64,
        now_us: i64,
        callback: SourceCallback,
    ) -> Result<()> {
        if self.sources.iter().any(|s| s.poll_object == poll_object) {
            return Err(Error::arg(format!(
                "duplicate poll object: {poll_object:?}"
            )));
        }
        if descriptors.is_empty() && timeout_ms < 0 {
            return Err(Error::arg(
                "a timer-only source requires a non-negative timeout",
            ));
        }

        let (timeout_us, due_us) = if timeout_ms < 0 {
            (-1, i64::MAX)
        } else {
            let timeout_us = timeout_ms * 1_000;
            (timeout_us, now_us.saturating_add(timeout_us))
        };

        #[cfg(feature = "log")]
        log::debug!(
            "source added: {poll_object:?} (num_fds={}, timeout_ms={timeout_ms})",
            descriptors.len()
        );

        self.sources.push(Source {
            poll_object,
            descriptors,
            timeout_us,
            due_us,
            triggered: false,
            callback,
        });
        Ok(())
    }

    /// Removes the source registered under `poll_object`. Removing an
    /// unknown identity is reported via [`Error::NotFound`], never
    /// treated as fatal (identities may be reused).
    pub fn remove(&mut self, poll_object: PollObject) -> Result<()> {
        let idx = match self.sources.iter().position(|s| s.poll_object == poll_object) {
            Some(idx) => idx,
            None => {
                #[cfg(feature = "log")]
                log::warn!("remove called with a stale poll object: {poll_object:?}");
                return Err(Error::NotFound);
            }
        };
        self.sources.remove(idx);
        #[cfg(feature = "log")]
        log::debug!("source removed: {poll_object:?}");
        Ok(())
    }

    /// Rebuilds the flat poll set from the current source list, in
    /// registration order. The returned vector's length always equals
    /// the sum of `num_fds` over live sources, and source `i`'s
    /// descriptors occupy contiguous slots starting at the prefix sum
    /// (property 2), because it is rebuilt from scratch every time.
    pub fn flatten_descriptors(&self) -> Vec<libc::pollfd> {
        let mut flat = Vec::with_capacity(self.sources.iter().map(Source::num_fds).sum());
        for source in &self.sources {
            for d in &source.descriptors {
                flat.push(libc::pollfd {
                    fd: d.fd,
                    events: d.events,
                    revents: 0,
                });
            }
        }
        flat
    }

    pub fn min_due(&self) -> i64 {
        self.sources
            .iter()
            .map(|s| s.due_us)
            .min()
            .unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_callback() -> SourceCallback {
        Box::new(|_fd, _revents| true)
    }

    #[test]
    fn add_then_remove_returns_to_prior_length() {
        let mut reg = SourceRegistry::new(&EngineConfig::default());
        reg.add(PollObject::Fd(3), vec![], 10, 0, noop_callback())
            .unwrap();
        let len_before = reg.count();
        reg.add(PollObject::Fd(4), vec![], 10, 0, noop_callback())
            .unwrap();
        reg.remove(PollObject::Fd(4)).unwrap();
        assert_eq!(reg.count(), len_before);
    }

    #[test]
    fn duplicate_poll_object_is_rejected() {
        let mut reg = SourceRegistry::new(&EngineConfig::default());
        reg.add(PollObject::Fd(3), vec![], 10, 0, noop_callback())
            .unwrap();
        let err = reg
            .add(PollObject::Fd(3), vec![], 10, 0, noop_callback())
            .unwrap_err();
        assert!(matches!(err, Error::Arg(_)));
    }

    #[test]
    fn zero_fd_source_requires_finite_timeout() {
        let mut reg = SourceRegistry::new(&EngineConfig::default());
        let err = reg
            .add(PollObject::Fd(3), vec![], -1, 0, noop_callback())
            .unwrap_err();
        assert!(matches!(err, Error::Arg(_)));
    }

    #[test]
    fn removing_unknown_object_is_not_fatal() {
        let mut reg = SourceRegistry::new(&EngineConfig::default());
        let err = reg.remove(PollObject::Fd(99)).unwrap_err();
        assert!(matches!(err, Error::NotFound));
    }

    #[test]
    fn descriptor_array_stays_contiguous_and_aligned() {
        let mut reg = SourceRegistry::new(&EngineConfig::default());
        reg.add(
            PollObject::Fd(1),
            vec![PollDescriptor {
                fd: 1,
                events: libc::POLLIN,
            }],
            -1,
            0,
            noop_callback(),
        )
        .unwrap();
        reg.add(
            PollObject::Channel(1),
            vec![
                PollDescriptor {
                    fd: 2,
                    events: libc::POLLIN,
                },
                PollDescriptor {
                    fd: 3,
                    events: libc::POLLIN,
                },
            ],
            -1,
            0,
            noop_callback(),
        )
        .unwrap();

        let flat = reg.flatten_descriptors();
        let total: usize = reg.sources.iter().map(Source::num_fds).sum();
        assert_eq!(flat.len(), total);
        assert_eq!(flat[0].fd, 1);
        assert_eq!(flat[1].fd, 2);
        assert_eq!(flat[2].fd, 3);
    }
}
