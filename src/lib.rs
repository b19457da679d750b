//! Session core of a signal-acquisition framework: a single-threaded
//! cooperative event loop that multiplexes timer-plus-file-descriptor
//! event sources, a typed data-feed bus between acquisition devices and
//! subscriber callbacks, and the cross-thread abort protocol that lets a
//! foreign thread ask a running session to stop.
//!
//! See `DESIGN.md` in the repository root for how each module here is
//! grounded in the crates this workspace builds on.

pub mod clock;
pub mod config;
pub mod datafeed;
pub mod device;
pub mod engine;
pub mod error;
pub mod packet;
mod pending;
pub mod poll_object;
pub mod poller;
mod session;
pub mod source;
pub mod trigger;

pub use clock::{Clock, MonotonicClock};
pub use config::EngineConfig;
pub use datafeed::{Bus, Subscriber, Transform};
pub use device::{Device, Driver};
pub use engine::ExternalDeadlineProvider;
pub use error::{Error, Result};
pub use packet::{AnalogData, ConfigEntry, ConfigValue, Header, LogicData, Packet};
pub use pending::PendingQueue;
pub use poll_object::PollObject;
pub use poller::{PollDriver, UnixPoller};
pub use session::{Session, StopHandle};
pub use source::{PollDescriptor, SourceCallback};
pub use trigger::{ChannelId, Trigger, TriggerMatch, TriggerStage};
