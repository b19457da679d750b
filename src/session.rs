//! Session aggregate and lifecycle controller.
//!
//! [`Session`] is the root type this crate exposes: it owns the source
//! registry, the data-feed bus, the attached devices and the shared abort
//! state, and drives the `new → start → run → stop → destroy` state
//! machine. A device is attached to at most one session by construction
//! here — `devices` owns its [`Device`] values, so a `Device` cannot
//! simultaneously live in two sessions' vectors.

use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};

use crate::clock::{Clock, MonotonicClock};
use crate::config::EngineConfig;
use crate::datafeed::{Bus, Subscriber, Transform};
use crate::device::Device;
use crate::engine::{self, ExternalDeadlineProvider, IterationOutcome};
use crate::error::{Error, Result};
use crate::packet::Packet;
use crate::pending::PendingQueue;
use crate::poll_object::PollObject;
use crate::poller::{PollDriver, UnixPoller};
use crate::source::{PollDescriptor, SourceCallback, SourceRegistry};
use crate::trigger::{self, Trigger};

struct ControlState {
    abort: bool,
    running: bool,
}

/// The one piece of state shared across threads: `(abort_flag,
/// running_flag)`, behind a single mutex. Nothing else about a
/// [`Session`] is safe to touch from outside the thread that calls
/// `run`.
#[derive(Clone)]
pub(crate) struct AbortFlag {
    inner: Arc<Mutex<ControlState>>,
}

impl AbortFlag {
    pub fn new() -> Self {
        AbortFlag {
            inner: Arc::new(Mutex::new(ControlState {
                abort: false,
                running: false,
            })),
        }
    }

    pub fn is_set(&self) -> bool {
        self.inner.lock().unwrap().abort
    }

    pub fn set(&self) {
        self.inner.lock().unwrap().abort = true;
    }

    fn clear(&self) {
        self.inner.lock().unwrap().abort = false;
    }

    fn set_running(&self, running: bool) {
        self.inner.lock().unwrap().running = running;
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().unwrap().running
    }
}

/// A cloneable, `Send + Sync` handle a foreign thread can use to request
/// that a running [`Session::run`] stop. Mirrors mio's own `Waker`: the
/// bulk of `Session` stays single-threaded, and only this thin handle is
/// shared across threads.
#[derive(Clone)]
pub struct StopHandle {
    control: AbortFlag,
}

impl StopHandle {
    /// Non-blocking by contract: flips the abort flag and returns. The
    /// next callback boundary inside `run` observes it and invokes the
    /// synchronous stop path.
    pub fn stop(&self) {
        self.control.set();
    }
}

/// The root aggregate.
pub struct Session<C: Clock = MonotonicClock> {
    devices: Vec<Device>,
    owned_devices: Vec<Device>,
    bus: Bus,
    trigger: Option<Trigger>,
    registry: SourceRegistry,
    control: AbortFlag,
    pending: PendingQueue,
    started: bool,
    config: EngineConfig,
    clock: C,
    poller: Box<dyn PollDriver>,
    usb: Option<Box<dyn ExternalDeadlineProvider>>,
}

impl Session<MonotonicClock> {
    /// `session_new`: a fresh, not-yet-started session using the real OS
    /// clock and `poll(2)` driver.
    pub fn new() -> Self {
        Self::with_parts(MonotonicClock, Box::new(UnixPoller))
    }

    /// As [`Session::new`], but with an explicit [`EngineConfig`].
    pub fn with_config(config: EngineConfig) -> Self {
        let mut session = Self::new();
        session.config = config;
        session
    }
}

impl Default for Session<MonotonicClock> {
    fn default() -> Self {
        Session::new()
    }
}

impl<C: Clock> Session<C> {
    /// Constructs a session around an injected clock and poll driver, for
    /// tests that need determinism (see `tests/scenarios.rs`).
    pub fn with_parts(clock: C, poller: Box<dyn PollDriver>) -> Self {
        let config = EngineConfig::default();
        Session {
            devices: Vec::new(),
            owned_devices: Vec::new(),
            bus: Bus::new(),
            trigger: None,
            registry: SourceRegistry::new(&config),
            control: AbortFlag::new(),
            pending: PendingQueue::new(),
            started: false,
            config,
            clock,
            poller,
            usb: None,
        }
    }

    /// Installs an external deadline collaborator (e.g. a USB transfer
    /// whose own timeout should be folded into the composite poll
    /// timeout) alongside the registered sources.
    pub fn set_usb_provider(&mut self, usb: Box<dyn ExternalDeadlineProvider>) {
        self.usb = Some(usb);
    }

    /// A cloneable handle a foreign thread can use to call [`StopHandle::stop`]
    /// while this session's `run` is executing on another thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            control: self.control.clone(),
        }
    }

    /// A cloneable handle a source callback can capture to add (or
    /// remove) sources from within its own invocation. The request is
    /// queued and applied by the engine at the next safe point rather
    /// than touching the registry directly, which would require a `&mut
    /// Session` the callback cannot hold while the session itself is
    /// mid-dispatch.
    pub fn spawn_handle(&self) -> PendingQueue {
        self.pending.clone()
    }

    // ---- device attach/detach -------------------------------------------

    /// Attaches `device`. A device with a driver is opened immediately.
    /// If the session has already been started, it also commits its
    /// config and starts acquisition right away so it can participate in
    /// the current run; otherwise that happens later, in [`Session::start`].
    pub fn dev_add(&mut self, mut device: Device) -> Result<()> {
        if let Some(driver) = device.driver.as_mut() {
            driver.dev_open()?;
            if self.started {
                driver.commit_config()?;
                driver.acquisition_start()?;
            }
        }
        #[cfg(feature = "log")]
        log::debug!("device attached (driver={})", device.driver.is_some());
        self.devices.push(device);
        Ok(())
    }

    /// Attaches a session-owned (self-allocated) device, released on
    /// [`Session::destroy`] rather than by the caller.
    pub fn dev_add_owned(&mut self, device: Device) {
        self.owned_devices.push(device);
    }

    /// Detaches every externally-attached device. Owned devices are
    /// unaffected; they are released by `destroy`.
    pub fn dev_remove_all(&mut self) {
        #[cfg(feature = "log")]
        log::debug!("detaching {} device(s)", self.devices.len());
        self.devices.clear();
    }

    pub fn dev_list(&self) -> &[Device] {
        &self.devices
    }

    // ---- trigger ---------------------------------------------------------

    pub fn trigger_set(&mut self, trigger: Trigger) {
        self.trigger = Some(trigger);
    }

    pub fn trigger_get(&self) -> Option<&Trigger> {
        self.trigger.as_ref()
    }

    // ---- data-feed bus -----------------------------------------------

    pub fn datafeed_callback_add(&mut self, callback: Subscriber) {
        self.bus.add_subscriber(callback);
    }

    pub fn datafeed_callback_remove_all(&mut self) {
        self.bus.remove_all_subscribers();
    }

    /// Registers a transform stage on the bus's pipeline.
    pub fn datafeed_transform_add(&mut self, transform: Box<dyn Transform>) {
        self.bus.add_transform(transform);
    }

    /// Runs `packet` through the bus on behalf of `device_index`. Called
    /// by device drivers as they produce data.
    pub fn datafeed_send(&mut self, device_index: usize, packet: Packet) -> Result<()> {
        let device = self
            .devices
            .get(device_index)
            .ok_or_else(|| Error::bug("datafeed_send: device index out of range"))?;
        self.bus.send(device, packet)
    }

    // ---- sources -------------------------------------------------------

    /// `session_source_add`: convenience over a single descriptor. `fd < 0`
    /// means timer-only.
    pub fn source_add(
        &mut self,
        fd: RawFd,
        events: i16,
        timeout_ms: i64,
        callback: SourceCallback,
    ) -> Result<()> {
        let descriptors = if fd < 0 {
            Vec::new()
        } else {
            vec![PollDescriptor { fd, events }]
        };
        self.registry.add(
            PollObject::Fd(fd),
            descriptors,
            timeout_ms,
            self.clock.now_us(),
            callback,
        )
    }

    /// `session_source_add_pollfd`: `handle_id` stands in for the pointer
    /// identity of the caller-owned pollfd struct — the caller picks a
    /// value that is unique among its own pollfd handles and reuses it
    /// for the matching `_remove_pollfd` call.
    pub fn source_add_pollfd(
        &mut self,
        handle_id: usize,
        fd: RawFd,
        events: i16,
        timeout_ms: i64,
        callback: SourceCallback,
    ) -> Result<()> {
        self.registry.add(
            PollObject::PollFd(handle_id),
            vec![PollDescriptor { fd, events }],
            timeout_ms,
            self.clock.now_us(),
            callback,
        )
    }

    /// `session_source_add_channel`: registers a source keyed by an
    /// acquisition-side channel identity rather than a raw fd.
    pub fn source_add_channel(
        &mut self,
        channel: usize,
        descriptors: Vec<PollDescriptor>,
        timeout_ms: i64,
        callback: SourceCallback,
    ) -> Result<()> {
        self.registry.add(
            PollObject::Channel(channel),
            descriptors,
            timeout_ms,
            self.clock.now_us(),
            callback,
        )
    }

    pub fn source_remove(&mut self, fd: RawFd) -> Result<()> {
        self.registry.remove(PollObject::Fd(fd))
    }

    pub fn source_remove_pollfd(&mut self, handle_id: usize) -> Result<()> {
        self.registry.remove(PollObject::PollFd(handle_id))
    }

    pub fn source_remove_channel(&mut self, channel: usize) -> Result<()> {
        self.registry.remove(PollObject::Channel(channel))
    }

    pub fn source_count(&self) -> usize {
        self.registry.count()
    }

    // ---- lifecycle -------------------------------------------------------

    /// `session_start`: requires at least one attached device, each with
    /// at least one channel; verifies the trigger (if any); commits
    /// config and starts acquisition on each device in turn. Aborts on
    /// the first failure and returns it without rolling back devices
    /// already started — documented current behaviour, kept rather than
    /// "fixed"; see `DESIGN.md`.
    pub fn start(&mut self) -> Result<()> {
        if self.devices.is_empty() {
            return Err(Error::arg("start requires at least one attached device"));
        }
        if let Some((idx, _)) = self
            .devices
            .iter()
            .enumerate()
            .find(|(_, d)| d.channels.is_empty())
        {
            return Err(Error::arg(format!(
                "device {idx} has no channels; cannot start acquisition"
            )));
        }
        if let Some(trigger) = &self.trigger {
            trigger::validate(trigger)?;
        }
        for device in &mut self.devices {
            if let Some(driver) = device.driver.as_mut() {
                driver.commit_config()?;
                driver.acquisition_start()?;
            }
        }
        self.started = true;
        #[cfg(feature = "log")]
        log::info!("session started with {} device(s)", self.devices.len());
        Ok(())
    }

    /// `session_run`: iterates the engine until the source registry is
    /// empty or an abort is observed, then returns. Does not itself tear
    /// down devices.
    pub fn run(&mut self) -> Result<()> {
        self.control.set_running(true);
        #[cfg(feature = "log")]
        log::debug!("run loop entered");
        loop {
            let outcome = engine::iterate(
                &mut self.registry,
                self.poller.as_mut(),
                self.usb.as_deref_mut(),
                &self.control,
                &self.pending,
                &self.clock,
                &self.config,
            )?;
            match outcome {
                IterationOutcome::Continue => continue,
                IterationOutcome::Empty => {
                    #[cfg(feature = "log")]
                    log::debug!("run loop exiting: source registry is empty");
                    break;
                }
                IterationOutcome::Aborted => {
                    #[cfg(feature = "log")]
                    log::debug!("run loop exiting: abort observed");
                    self.stop_sync();
                    break;
                }
            }
        }
        self.control.set_running(false);
        Ok(())
    }

    /// `stop_sync`: the session-thread side of shutdown. Calls every
    /// device's `acquisition_stop` (drivers that don't implement one get
    /// the no-op default) and clears `running`. Also clears the abort
    /// flag so the session can be restarted.
    fn stop_sync(&mut self) {
        for device in &mut self.devices {
            if let Some(driver) = device.driver.as_mut() {
                if let Err(e) = driver.acquisition_stop() {
                    #[cfg(feature = "log")]
                    log::error!("acquisition_stop failed during shutdown: {e}");
                }
            }
        }
        self.started = false;
        self.control.clear();
        self.control.set_running(false);
    }

    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    /// `session_destroy`: detaches all devices, releases owned devices,
    /// the trigger and the source registry. Consumes `self`; ordinary
    /// `Drop` semantics do the actual freeing.
    pub fn destroy(self) {
        #[cfg(feature = "log")]
        log::debug!(
            "session destroyed ({} attached, {} owned device(s))",
            self.devices.len(),
            self.owned_devices.len()
        );
    }
}
