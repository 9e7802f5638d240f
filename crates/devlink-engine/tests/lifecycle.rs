//! End-to-end engine tests over a scripted in-memory transport.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use devlink_engine::{
    CommandSet, DeviceLink, EngineError, LinkConfig, ParsedMessage, Subscription,
};
use devlink_frame::{encode_frame, Frame, FrameError, MAX_PAYLOAD};
use devlink_transport::{
    LinkControl, LinkPort, LinkReader, LinkWriter, ReadMode, Result as TransportResult,
    TransportError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Dispatched(u8),
    Wrote(u8),
}

enum Step {
    /// Deliver a frame. `ready_after` gates availability from link start;
    /// `read_takes` simulates time spent inside the read call.
    Frame {
        bytes: Vec<u8>,
        ready_after: Duration,
        read_takes: Duration,
    },
    /// Fail the read fatally.
    Fault,
}

struct MockState {
    started: Instant,
    inbound: Mutex<VecDeque<Step>>,
    events: Mutex<Vec<Event>>,
    prepare_calls: AtomicUsize,
    shutdown: AtomicBool,
    fail_writes: bool,
    mode: ReadMode,
}

impl MockState {
    fn new(mode: ReadMode) -> Arc<Self> {
        Arc::new(Self {
            started: Instant::now(),
            inbound: Mutex::new(VecDeque::new()),
            events: Mutex::new(Vec::new()),
            prepare_calls: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            fail_writes: false,
            mode,
        })
    }

    fn push_frame(&self, message_id: u8, ready_after: Duration, read_takes: Duration) {
        let frame = Frame::new(0x10, 100, message_id, Bytes::new());
        let mut bytes = BytesMut::new();
        encode_frame(&frame, &mut bytes).unwrap();
        self.inbound.lock().unwrap().push_back(Step::Frame {
            bytes: bytes.to_vec(),
            ready_after,
            read_takes,
        });
    }

    fn push_fault(&self) {
        self.inbound.lock().unwrap().push_back(Step::Fault);
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn wait_for<F: Fn(&[Event]) -> bool>(&self, deadline: Duration, predicate: F) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if predicate(&self.events()) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }
}

struct MockLink {
    state: Arc<MockState>,
}

struct MockReader {
    state: Arc<MockState>,
}

struct MockWriter {
    state: Arc<MockState>,
}

#[derive(Clone)]
struct MockControl {
    state: Arc<MockState>,
}

impl LinkPort for MockLink {
    type Route = ();
    type Reader = MockReader;
    type Writer = MockWriter;
    type Control = MockControl;

    fn split(self) -> TransportResult<(MockReader, MockWriter, MockControl)> {
        Ok((
            MockReader {
                state: self.state.clone(),
            },
            MockWriter {
                state: self.state.clone(),
            },
            MockControl { state: self.state },
        ))
    }
}

impl LinkReader for MockReader {
    fn prepare(&mut self) -> TransportResult<()> {
        self.state.prepare_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn available(&mut self) -> TransportResult<bool> {
        if self.state.shutdown.load(Ordering::SeqCst) {
            return Err(TransportError::Shutdown);
        }
        let inbound = self.state.inbound.lock().unwrap();
        Ok(match inbound.front() {
            Some(Step::Frame { ready_after, .. }) => self.state.started.elapsed() >= *ready_after,
            Some(Step::Fault) => true,
            None => false,
        })
    }

    fn read(&mut self, buf: &mut [u8]) -> TransportResult<usize> {
        if self.state.shutdown.load(Ordering::SeqCst) {
            return Err(TransportError::Shutdown);
        }
        let step = {
            let mut inbound = self.state.inbound.lock().unwrap();
            let due = match inbound.front() {
                Some(Step::Frame { ready_after, .. }) => {
                    self.state.started.elapsed() >= *ready_after
                }
                Some(Step::Fault) => true,
                None => false,
            };
            if due {
                inbound.pop_front()
            } else {
                None
            }
        };
        match step {
            Some(Step::Frame {
                bytes, read_takes, ..
            }) => {
                std::thread::sleep(read_takes);
                buf[..bytes.len()].copy_from_slice(&bytes);
                Ok(bytes.len())
            }
            Some(Step::Fault) => Err(TransportError::PortGone("mock".to_string())),
            None => {
                // Nothing on the wire: behave like a read timing out.
                std::thread::sleep(Duration::from_millis(10));
                Ok(0)
            }
        }
    }

    fn mode(&self) -> ReadMode {
        self.state.mode
    }
}

impl LinkWriter for MockWriter {
    type Route = ();

    fn write(&mut self, _route: &(), frame: &[u8]) -> TransportResult<()> {
        if self.state.shutdown.load(Ordering::SeqCst) {
            return Err(TransportError::Shutdown);
        }
        if self.state.fail_writes {
            return Err(TransportError::PortGone("mock".to_string()));
        }
        let message_id = frame[5];
        self.state
            .events
            .lock()
            .unwrap()
            .push(Event::Wrote(message_id));
        Ok(())
    }
}

impl LinkControl for MockControl {
    fn shutdown(&self) {
        self.state.shutdown.store(true, Ordering::SeqCst);
    }
}

struct Recorder {
    id: String,
    state: Arc<MockState>,
    timeout: Option<Duration>,
    received: AtomicUsize,
    missed: AtomicUsize,
}

impl Recorder {
    fn new(id: &str, state: Arc<MockState>, timeout: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            state,
            timeout,
            received: AtomicUsize::new(0),
            missed: AtomicUsize::new(0),
        })
    }
}

impl Subscription for Recorder {
    fn id(&self) -> &str {
        &self.id
    }
    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
    fn can_receive(&self, _message: &ParsedMessage) -> bool {
        true
    }
    fn received(&self, message: &ParsedMessage) {
        self.received.fetch_add(1, Ordering::SeqCst);
        self.state
            .events
            .lock()
            .unwrap()
            .push(Event::Dispatched(message.message_id));
    }
    fn not_received(&self) {
        self.missed.fetch_add(1, Ordering::SeqCst);
    }
}

fn test_config() -> LinkConfig {
    LinkConfig {
        id: "mock".to_string(),
        queue_poll: Duration::from_millis(10),
        idle_poll: Duration::from_millis(1),
        suspend_ack_warn: Duration::from_millis(500),
        shutdown_grace: Duration::from_secs(2),
    }
}

fn build_engine(
    state: Arc<MockState>,
    faults: Arc<AtomicUsize>,
) -> DeviceLink<MockLink> {
    DeviceLink::new(
        MockLink { state },
        None,
        CommandSet::new(),
        move |_origin| {
            faults.fetch_add(1, Ordering::SeqCst);
        },
        test_config(),
    )
    .unwrap()
}

#[test]
fn half_duplex_burst_is_exclusive_and_fifo() {
    let state = MockState::new(ReadMode::Polling);
    // Frame 1 is on the wire immediately but takes 300ms to read. Frame 2
    // only becomes visible after the write burst should have finished.
    state.push_frame(1, Duration::ZERO, Duration::from_millis(300));
    state.push_frame(2, Duration::from_millis(450), Duration::ZERO);

    let faults = Arc::new(AtomicUsize::new(0));
    let mut engine = build_engine(state.clone(), faults.clone());
    engine.subscribe(Recorder::new("all", state.clone(), None));
    engine.start().unwrap();

    // Queue three sends while the read of frame 1 is still in flight. The
    // writer must wait for the reader to park, then drain all three.
    std::thread::sleep(Duration::from_millis(50));
    for message_id in [10, 11, 12] {
        engine.enqueue_send(0x20, 100, message_id, Bytes::new(), ()).unwrap();
        std::thread::sleep(Duration::from_millis(30));
    }

    assert!(state.wait_for(Duration::from_secs(3), |events| {
        events.contains(&Event::Dispatched(2))
    }));
    engine.close().unwrap();

    assert_eq!(
        state.events(),
        vec![
            Event::Dispatched(1),
            Event::Wrote(10),
            Event::Wrote(11),
            Event::Wrote(12),
            Event::Dispatched(2),
        ]
    );
    // Initial arm plus one re-arm after the suspend/resume cycle.
    assert_eq!(state.prepare_calls.load(Ordering::SeqCst), 2);
    assert_eq!(faults.load(Ordering::SeqCst), 0);
}

#[test]
fn graceful_close_does_not_fire_fault_callback() {
    let state = MockState::new(ReadMode::Polling);
    let faults = Arc::new(AtomicUsize::new(0));
    let mut engine = build_engine(state.clone(), faults.clone());
    engine.start().unwrap();

    engine.enqueue_send(0x20, 100, 7, Bytes::new(), ()).unwrap();
    assert!(state.wait_for(Duration::from_secs(2), |events| {
        events.contains(&Event::Wrote(7))
    }));

    engine.close().unwrap();
    assert!(state.shutdown.load(Ordering::SeqCst));
    assert_eq!(faults.load(Ordering::SeqCst), 0);
}

#[test]
fn fault_callback_fires_exactly_once() {
    let state = MockState::new(ReadMode::Polling);
    state.push_fault();
    let faults = Arc::new(AtomicUsize::new(0));
    let mut engine = build_engine(state.clone(), faults.clone());
    engine.subscribe(Recorder::new("all", state.clone(), None));
    engine.start().unwrap();

    let start = Instant::now();
    while faults.load(Ordering::SeqCst) == 0 && start.elapsed() < Duration::from_secs(2) {
        std::thread::sleep(Duration::from_millis(5));
    }
    // Teardown cleared the registry and shut the transport down.
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(faults.load(Ordering::SeqCst), 1);
    assert!(state.shutdown.load(Ordering::SeqCst));

    engine.close().unwrap();
    assert_eq!(faults.load(Ordering::SeqCst), 1);
}

#[test]
fn concurrent_read_and_write_faults_fire_callback_once() {
    let mut state = MockState::new(ReadMode::Polling);
    Arc::get_mut(&mut state).unwrap().fail_writes = true;
    state.push_fault();

    let faults = Arc::new(AtomicUsize::new(0));
    let mut engine = build_engine(state.clone(), faults.clone());
    engine.start().unwrap();
    engine.enqueue_send(0x20, 100, 1, Bytes::new(), ()).unwrap();

    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(faults.load(Ordering::SeqCst), 1);
    engine.close().unwrap();
}

#[test]
fn stuck_loop_on_fault_path_surfaces_shutdown_timeout() {
    let mut state = MockState::new(ReadMode::Blocking);
    Arc::get_mut(&mut state).unwrap().fail_writes = true;
    // The reader spends a full second inside read, far past the grace
    // period, while a write fault triggers teardown.
    state.push_frame(1, Duration::ZERO, Duration::from_secs(1));

    let faults = Arc::new(AtomicUsize::new(0));
    let faults_cb = faults.clone();
    let mut engine = DeviceLink::new(
        MockLink {
            state: state.clone(),
        },
        None,
        CommandSet::new(),
        move |_origin| {
            faults_cb.fetch_add(1, Ordering::SeqCst);
        },
        LinkConfig {
            shutdown_grace: Duration::from_millis(100),
            ..test_config()
        },
    )
    .unwrap();
    engine.start().unwrap();
    engine.enqueue_send(0x20, 100, 1, Bytes::new(), ()).unwrap();

    let start = Instant::now();
    while faults.load(Ordering::SeqCst) == 0 && start.elapsed() < Duration::from_secs(2) {
        std::thread::sleep(Duration::from_millis(5));
    }
    // The callback still fired even though the read thread missed its
    // deadline, and the join failure is carried out of the supervisor.
    assert_eq!(faults.load(Ordering::SeqCst), 1);
    assert!(matches!(
        engine.close(),
        Err(EngineError::ShutdownTimeout { thread: "read", .. })
    ));
}

#[test]
fn one_shot_subscription_times_out_with_single_notification() {
    let state = MockState::new(ReadMode::Polling);
    let faults = Arc::new(AtomicUsize::new(0));
    let mut engine = build_engine(state.clone(), faults.clone());

    let one_shot = Recorder::new("reply", state.clone(), Some(Duration::from_millis(50)));
    engine.subscribe(one_shot.clone());
    engine.start().unwrap();

    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(one_shot.missed.load(Ordering::SeqCst), 1);
    assert_eq!(one_shot.received.load(Ordering::SeqCst), 0);

    // A late matching frame finds no subscriber.
    state.push_frame(9, Duration::ZERO, Duration::ZERO);
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(one_shot.received.load(Ordering::SeqCst), 0);

    engine.close().unwrap();
}

#[test]
fn blocking_transport_skips_the_handoff() {
    let state = MockState::new(ReadMode::Blocking);
    let faults = Arc::new(AtomicUsize::new(0));
    let mut engine = build_engine(state.clone(), faults.clone());
    engine.start().unwrap();

    // Without the suspend handshake a write must complete even though the
    // reader never parks.
    engine.enqueue_send(0x20, 100, 3, Bytes::new(), ()).unwrap();
    assert!(state.wait_for(Duration::from_secs(1), |events| {
        events.contains(&Event::Wrote(3))
    }));

    // Only the initial prepare; no resume cycles happen in blocking mode.
    assert_eq!(state.prepare_calls.load(Ordering::SeqCst), 1);
    engine.close().unwrap();
}

#[test]
fn second_start_is_rejected() {
    let state = MockState::new(ReadMode::Polling);
    let faults = Arc::new(AtomicUsize::new(0));
    let mut engine = build_engine(state, faults);
    engine.start().unwrap();
    assert!(matches!(engine.start(), Err(EngineError::AlreadyStarted)));
    engine.close().unwrap();
}

#[test]
fn oversized_payload_is_rejected_at_enqueue() {
    let state = MockState::new(ReadMode::Polling);
    let faults = Arc::new(AtomicUsize::new(0));
    let engine = build_engine(state, faults);
    assert!(matches!(
        engine.enqueue_send(0x20, 100, 1, vec![0u8; MAX_PAYLOAD + 1], ()),
        Err(EngineError::Frame(FrameError::PayloadTooLarge { .. }))
    ));
}

#[test]
fn enqueue_after_close_reports_queue_closed() {
    let state = MockState::new(ReadMode::Polling);
    let faults = Arc::new(AtomicUsize::new(0));
    let mut engine = build_engine(state, faults);
    engine.close().unwrap();
    assert!(matches!(
        engine.enqueue_send(0x20, 100, 1, Bytes::new(), ()),
        Err(EngineError::QueueClosed)
    ));
}

#[test]
fn close_is_idempotent() {
    let state = MockState::new(ReadMode::Polling);
    let faults = Arc::new(AtomicUsize::new(0));
    let mut engine = build_engine(state, faults);
    engine.start().unwrap();
    engine.close().unwrap();
    engine.close().unwrap();
}
