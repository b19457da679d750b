//! Opaque source identity.
//!
//! The control layer this crate is based on represents a source's
//! registration key as a pointer-width integer that is sometimes a raw
//! fd and sometimes the address of a caller-owned struct, which makes
//! collisions between the two representations possible. This crate
//! closes that hole by making the three registration shapes distinct
//! enum variants instead of a single integer.

use std::os::unix::io::RawFd;

/// Identity under which a source is registered, looked up, and removed.
/// Must be unique within a [`crate::Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollObject {
    /// A bare file descriptor, as used by `session_source_add`.
    Fd(RawFd),
    /// A caller-supplied descriptor handle, as used by
    /// `session_source_add_pollfd`. The handle's identity replaces the
    /// original "pointer identity of the registered struct".
    PollFd(usize),
    /// An acquisition-side I/O channel identity, as used by
    /// `session_source_add_channel`.
    Channel(usize),
}
