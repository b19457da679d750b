//! End-to-end scenarios, reproducing the literal cases the design
//! describes for the iteration engine, the data-feed bus, and the
//! lifecycle controller's trigger validation.

use std::cell::{Cell, RefCell};
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use acq_session::{
    Clock, ConfigEntry, Device, Driver, Error, Packet, PollDescriptor, PollDriver, PollObject,
    Result, Session, Trigger, TriggerMatch, TriggerStage,
};

/// A clock callers can advance by hand, shared between the session and
/// the fake poller below so both see the same notion of "now".
#[derive(Clone)]
struct FakeClock(Rc<Cell<i64>>);

impl FakeClock {
    fn new() -> Self {
        FakeClock(Rc::new(Cell::new(0)))
    }
}

impl Clock for FakeClock {
    fn now_us(&self) -> i64 {
        self.0.get()
    }
}

/// Never reports real I/O readiness; every call advances the fake clock
/// by exactly the timeout the engine asked for, simulating a poll that
/// always times out. This is what lets S1-S3 run deterministically
/// without sleeping any real wall-clock time.
struct FakePoller {
    clock: FakeClock,
}

impl PollDriver for FakePoller {
    fn poll(&mut self, descriptors: &mut [libc::pollfd], timeout_ms: i32) -> Result<usize> {
        for d in descriptors.iter_mut() {
            d.revents = 0;
        }
        if timeout_ms > 0 {
            self.clock.0.set(self.clock.0.get() + timeout_ms as i64 * 1_000);
        }
        Ok(0)
    }
}

fn fake_session() -> (Session<FakeClock>, FakeClock) {
    let _ = env_logger::try_init();
    let clock = FakeClock::new();
    let poller = Box::new(FakePoller {
        clock: clock.clone(),
    });
    (Session::with_parts(clock.clone(), poller), clock)
}

/// Adds a pure-timer source and returns a counter incremented by its
/// callback on every fire.
fn add_counting_timer(
    session: &mut Session<FakeClock>,
    fd: RawFd,
    timeout_ms: i64,
) -> Rc<Cell<u32>> {
    let count = Rc::new(Cell::new(0u32));
    let counter = count.clone();
    session
        .source_add(
            fd,
            0,
            timeout_ms,
            Box::new(move |_fd, _revents| {
                counter.set(counter.get() + 1);
                true
            }),
        )
        .unwrap();
    count
}

// S1: three timer sources with 10/20/40ms periods, run for 100ms, fire
// counts should be 10±1, 5±1, 2±1.
#[test]
fn s1_timer_fan_out() {
    let (mut session, _clock) = fake_session();
    let fires_10 = add_counting_timer(&mut session, -1, 10);
    let fires_20 = add_counting_timer(&mut session, -2, 20);
    let fires_40 = add_counting_timer(&mut session, -3, 40);

    let handle = session.stop_handle();
    session
        .source_add(
            -4,
            0,
            100,
            Box::new(move |_fd, _revents| {
                handle.stop();
                false
            }),
        )
        .unwrap();

    session.run().unwrap();

    assert!((9..=11).contains(&fires_10.get()), "got {}", fires_10.get());
    assert!((4..=6).contains(&fires_20.get()), "got {}", fires_20.get());
    assert!((1..=3).contains(&fires_40.get()), "got {}", fires_40.get());
}

// S2: a 5ms timer whose callback returns false on its 3rd call. After
// the registry empties, exactly 3 callbacks occurred and run returns.
#[test]
fn s2_self_removing_source() {
    let (mut session, _clock) = fake_session();
    let calls = Rc::new(Cell::new(0u32));
    let counter = calls.clone();
    session
        .source_add(
            -1,
            0,
            5,
            Box::new(move |_fd, _revents| {
                counter.set(counter.get() + 1);
                counter.get() < 3
            }),
        )
        .unwrap();

    session.run().unwrap();

    assert_eq!(calls.get(), 3);
    assert_eq!(session.source_count(), 0);
}

// S3: a 10ms timer whose 1st callback adds a second 10ms timer. After
// 100ms, total fires are approximately 19 (10 from the first + 9 from
// the second, which starts 10ms later).
#[test]
fn s3_add_source_during_callback() {
    let (mut session, _clock) = fake_session();
    let total_fires = Rc::new(Cell::new(0u32));
    let spawn = session.spawn_handle();

    let first_calls = Rc::new(Cell::new(0u32));
    let first_counter = first_calls.clone();
    let total_for_first = total_fires.clone();
    let total_for_second = total_fires.clone();
    session
        .source_add(
            -1,
            0,
            10,
            Box::new(move |_fd, _revents| {
                first_counter.set(first_counter.get() + 1);
                total_for_first.set(total_for_first.get() + 1);
                if first_counter.get() == 1 {
                    let total = total_for_second.clone();
                    spawn.queue_add(
                        PollObject::Fd(-2),
                        vec![],
                        10,
                        Box::new(move |_fd, _revents| {
                            total.set(total.get() + 1);
                            true
                        }),
                    );
                }
                true
            }),
        )
        .unwrap();

    let handle = session.stop_handle();
    session
        .source_add(
            -3,
            0,
            100,
            Box::new(move |_fd, _revents| {
                handle.stop();
                false
            }),
        )
        .unwrap();

    session.run().unwrap();

    assert!(
        (17..=21).contains(&total_fires.get()),
        "got {}",
        total_fires.get()
    );
}

// S4: a single 1ms timer whose callback sleeps 5ms; calling stop from
// another thread should cause run() to return within a small multiple
// of one in-flight callback plus one poll cycle.
#[test]
fn s4_stop_latency() {
    let _ = env_logger::try_init();
    let mut session = Session::new();
    let handle = session.stop_handle();
    session
        .source_add(
            -1,
            0,
            1,
            Box::new(|_fd, _revents| {
                std::thread::sleep(Duration::from_millis(5));
                true
            }),
        )
        .unwrap();

    let stopper = handle;
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(2));
        stopper.stop();
    });

    let start = Instant::now();
    session.run().unwrap();
    let elapsed = start.elapsed();
    assert!(
        elapsed < Duration::from_millis(100),
        "stop took too long: {elapsed:?}"
    );
}

struct DropMeta;
impl acq_session::Transform for DropMeta {
    fn receive(&mut self, packet: Packet) -> Result<Option<Packet>> {
        match packet {
            Packet::Meta(_) => Ok(None),
            other => Ok(Some(other)),
        }
    }
}

fn tag_of(p: &Packet) -> &'static str {
    match p {
        Packet::Header(_) => "HEADER",
        Packet::End => "END",
        Packet::Meta(_) => "META",
        Packet::Trigger => "TRIGGER",
        Packet::Logic(_) => "LOGIC",
        Packet::Analog(_) => "ANALOG",
        Packet::Analog2(_) => "ANALOG2",
        Packet::FrameBegin => "FRAME_BEGIN",
        Packet::FrameEnd => "FRAME_END",
    }
}

// S5: two transforms registered; the first drops META packets.
// Subscribers should see HEADER and END but no META.
#[test]
fn s5_transform_truncation() {
    let mut session = Session::new();
    session.dev_add(Device::virtual_device(vec![])).unwrap();
    session.datafeed_transform_add(Box::new(DropMeta));

    let seen: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = seen.clone();
    session.datafeed_callback_add(Box::new(move |_dev, packet| {
        seen_clone.borrow_mut().push(tag_of(packet));
    }));

    session
        .datafeed_send(
            0,
            Packet::Header(acq_session::Header {
                feed_version: 1,
                start_time_us: 0,
            }),
        )
        .unwrap();
    session
        .datafeed_send(0, Packet::Meta(vec![ConfigEntry {
            key: 1,
            value: acq_session::ConfigValue::Int(0),
        }]))
        .unwrap();
    session.datafeed_send(0, Packet::End).unwrap();

    assert_eq!(*seen.borrow(), vec!["HEADER", "END"]);
}

struct NeverStartedDriver(Arc<Mutex<u32>>);
impl Driver for NeverStartedDriver {
    fn dev_open(&mut self) -> Result<()> {
        Ok(())
    }
    fn commit_config(&mut self) -> Result<()> {
        Ok(())
    }
    fn acquisition_start(&mut self) -> Result<()> {
        *self.0.lock().unwrap() += 1;
        Ok(())
    }
}

// S6: start() with a trigger whose stage has no matches returns an
// error and never calls any device's acquisition_start.
#[test]
fn s6_trigger_validation_blocks_start() {
    let mut session = Session::new();
    let starts = Arc::new(Mutex::new(0u32));
    session
        .dev_add(Device::with_driver(
            Box::new(NeverStartedDriver(starts.clone())),
            vec![0],
        ))
        .unwrap();
    session.trigger_set(Trigger {
        stages: vec![TriggerStage { matches: vec![] }],
    });

    let err = session.start().unwrap_err();
    assert!(matches!(err, Error::Arg(_)));
    assert_eq!(*starts.lock().unwrap(), 0);
}

// A well-formed trigger (every stage has a match naming a channel and a
// non-zero match code) allows start() to proceed.
#[test]
fn well_formed_trigger_allows_start() {
    let mut session = Session::new();
    let starts = Arc::new(Mutex::new(0u32));
    session
        .dev_add(Device::with_driver(
            Box::new(NeverStartedDriver(starts.clone())),
            vec![0],
        ))
        .unwrap();
    session.trigger_set(Trigger {
        stages: vec![TriggerStage {
            matches: vec![TriggerMatch {
                channel: Some(0),
                match_code: 1,
            }],
        }],
    });

    session.start().unwrap();
    assert_eq!(*starts.lock().unwrap(), 1);
}

#[test]
fn duplicate_descriptor_fan_out_respects_num_fds_alignment() {
    let mut session = Session::new();
    session
        .source_add_channel(
            1,
            vec![
                PollDescriptor { fd: 10, events: 0 },
                PollDescriptor { fd: 11, events: 0 },
            ],
            5,
            Box::new(|_fd, _revents| true),
        )
        .unwrap();
    assert_eq!(session.source_count(), 1);
    session.source_remove_channel(1).unwrap();
    assert_eq!(session.source_count(), 0);
}
