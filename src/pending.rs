//! Deferred source mutations.
//!
//! A source callback cannot hold `&mut SourceRegistry` directly — the
//! registry owns the very closure that's running, so that would be a
//! self-reference. Instead a callback that wants to add a source clones a
//! [`PendingQueue`] handle out of its captures and enqueues the request;
//! the iteration engine drains the queue at the next safe point. This is
//! functionally equivalent to restart-and-skip for removal, and is the
//! only way this crate supports addition from within a callback.

use std::cell::RefCell;
use std::rc::Rc;

use crate::poll_object::PollObject;
use crate::source::{PollDescriptor, SourceCallback, SourceRegistry};

enum PendingOp {
    Add {
        poll_object: PollObject,
        descriptors: Vec<PollDescriptor>,
        timeout_ms: i64,
        callback: SourceCallback,
    },
    Remove(PollObject),
}

/// Cheaply cloneable handle onto a queue of not-yet-applied source
/// mutations. `Session` keeps one and hands out clones to callbacks that
/// need to reach back into the registry; it is not `Send` (it is
/// single-threaded-cooperative like the rest of the engine).
#[derive(Clone, Default)]
pub struct PendingQueue(Rc<RefCell<Vec<PendingOp>>>);

impl PendingQueue {
    pub fn new() -> Self {
        PendingQueue::default()
    }

    pub fn queue_add(
        &self,
        poll_object: PollObject,
        descriptors: Vec<PollDescriptor>,
        timeout_ms: i64,
        callback: SourceCallback,
    ) {
        self.0.borrow_mut().push(PendingOp::Add {
            poll_object,
            descriptors,
            timeout_ms,
            callback,
        });
    }

    pub fn queue_remove(&self, poll_object: PollObject) {
        self.0.borrow_mut().push(PendingOp::Remove(poll_object));
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Applies every queued operation to `registry`, in the order
    /// enqueued, then clears the queue. A duplicate add or an unknown
    /// remove is logged and otherwise ignored: by the time the engine
    /// drains the queue, the callback that enqueued the operation has
    /// long since returned and has nothing to hand the error back to.
    pub fn drain_into(&self, registry: &mut SourceRegistry, now_us: i64) {
        let ops = std::mem::take(&mut *self.0.borrow_mut());
        for op in ops {
            match op {
                PendingOp::Add {
                    poll_object,
                    descriptors,
                    timeout_ms,
                    callback,
                } => {
                    if let Err(_e) = registry.add(poll_object, descriptors, timeout_ms, now_us, callback) {
                        #[cfg(feature = "log")]
                        log::warn!("deferred source add failed: {_e}");
                    }
                }
                PendingOp::Remove(poll_object) => {
                    let _ = registry.remove(poll_object);
                }
            }
        }
    }
}
