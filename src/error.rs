//! Crate-wide error taxonomy.
//!
//! Mirrors the ARG / BUG / ERR split of the control layer this crate
//! implements: `Arg` for caller-supplied invalid input, `Bug` for an
//! internal invariant breach (logged loudly at construction, never fatal
//! to the process), and the remaining variants for operational failures
//! from the OS, a transform, or an unresolved lookup.

use std::fmt;
use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// Caller-supplied invalid input: duplicate poll object, malformed
    /// trigger, a zero-device `start`, an infinite-timeout timer-only
    /// source.
    Arg(String),
    /// Internal invariant violation. Constructing this variant also logs
    /// at `error` level, matching "logged loudly; still returned, never
    /// aborts the process".
    Bug(String),
    /// Operational failure from the OS poll call.
    Io(io::Error),
    /// A transform's `receive` returned an error.
    Transform(String),
    /// `source_remove*` was asked to remove an object that isn't
    /// registered. Never fatal — identities may be reused.
    NotFound,
}

impl Error {
    pub fn bug(msg: impl Into<String>) -> Error {
        let msg = msg.into();
        #[cfg(feature = "log")]
        log::error!("internal invariant violated: {msg}");
        Error::Bug(msg)
    }

    pub fn arg(msg: impl Into<String>) -> Error {
        Error::Arg(msg.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Arg(m) => write!(f, "invalid argument: {m}"),
            Error::Bug(m) => write!(f, "internal invariant violation: {m}"),
            Error::Io(e) => write!(f, "operational failure: {e}"),
            Error::Transform(m) => write!(f, "transform failed: {m}"),
            Error::NotFound => write!(f, "poll object not registered"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e)
    }
}
