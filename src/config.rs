//! Engine tunables.
//!
//! A small plain struct, fixed at construction and never mutated
//! afterwards.

/// Tunables for the iteration engine, fixed for a [`crate::Session`]'s
/// whole lifetime.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Whether a ready I/O source suppresses timer-only sources in the
    /// same iteration. Defaults to `true`, giving starvation-free timer
    /// behaviour; disabling it is only useful to reproduce the
    /// alternative policy, and is not exercised by default.
    pub starvation_policy: bool,
    /// Initial capacity reserved for the flattened poll-descriptor
    /// vector rebuilt every iteration.
    pub initial_descriptor_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            starvation_policy: true,
            initial_descriptor_capacity: 16,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_starvation_policy(mut self, enabled: bool) -> Self {
        self.starvation_policy = enabled;
        self
    }

    pub fn with_initial_descriptor_capacity(mut self, capacity: usize) -> Self {
        self.initial_descriptor_capacity = capacity;
        self
    }
}
