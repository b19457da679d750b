//! Datafeed packets and their codec.
//!
//! In the control layer this crate is based on, `copy` is a hand-written
//! deep copy per tag and `free` mirrors it field by field; both are prone
//! to getting a payload's allocation size wrong. Representing each
//! payload as an owned Rust value sidesteps that: `#[derive(Clone)]`
//! already produces the right semantics per field — an owned `Vec`
//! clones its bytes, an `Arc` clone bumps a reference count — so `copy`
//! only needs to call `.clone()`, and `free` only needs to drop the
//! value.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::trigger::ChannelId;

#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub feed_version: u32,
    pub start_time_us: i64,
}

#[derive(Debug, Clone)]
pub enum ConfigValue {
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Bytes(Arc<[u8]>),
}

#[derive(Debug, Clone)]
pub struct ConfigEntry {
    pub key: u32,
    pub value: ConfigValue,
}

#[derive(Debug, Clone)]
pub struct LogicData {
    pub unit_size: usize,
    pub length: usize,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct AnalogData {
    /// Shared by reference: cloning an `Arc` only bumps its count rather
    /// than copying the channel list.
    pub channels: Arc<[ChannelId]>,
    pub num_samples: usize,
    pub mq: Option<u32>,
    pub unit: Option<u32>,
    pub samples: Vec<f32>,
}

#[derive(Debug, Clone)]
pub enum Packet {
    Header(Header),
    End,
    Meta(Vec<ConfigEntry>),
    Trigger,
    Logic(LogicData),
    Analog(AnalogData),
    /// Structurally identical to `Analog`; kept as a distinct tag
    /// because the wire-format variant it represents is distinguished
    /// purely by tag, not by payload shape.
    Analog2(AnalogData),
    FrameBegin,
    FrameEnd,
}

/// Deep-copies `packet`. The original's "unknown tag" error arm has no
/// counterpart here: `Packet` is a closed enum, so every tag is handled
/// and the match is exhaustive by construction.
pub fn copy(packet: &Packet) -> Packet {
    packet.clone()
}

/// Releases `packet`. Beyond ordinary `Drop`, there is nothing left to
/// do — but the function is kept so callers can pair `copy`/`free` the
/// way the original API does.
pub fn free(packet: Packet) {
    drop(packet);
}

/// Placeholder codec error for a payload arriving from outside this
/// closed enum (e.g. a future FFI boundary); unreachable through the
/// public API today.
#[allow(dead_code)]
pub fn unknown_tag_error(tag: &str) -> Error {
    Error::arg(format!("unknown packet tag: {tag}"))
}
