//! Test doubles shared by the integration tests: scriptable mock media and a
//! tracking memory resource.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use std::vec::Vec;

use polycyphal::media::endpoint::IpEndpoint;
use polycyphal::media::error::MediaFailure;
use polycyphal::media::memory::{MemoryBuffer, MemoryResource};
use polycyphal::media::socket::{
    DEFAULT_MTU, Media, RxDatagram, RxSocket, SendStatus, TxSocket,
};
use polycyphal::time::Instant;

/// The mock time driver is process-global; tests touching it must not interleave.
pub fn time_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Counts live allocations so tests can assert that every buffer is returned.
#[derive(Default)]
pub struct TrackingMemory {
    live: Cell<usize>,
    total: Cell<usize>,
}

impl TrackingMemory {
    pub fn live(&self) -> usize {
        self.live.get()
    }

    pub fn total(&self) -> usize {
        self.total.get()
    }
}

impl MemoryResource for TrackingMemory {
    fn allocate(&self, layout: core::alloc::Layout) -> Option<core::ptr::NonNull<u8>> {
        self.live.set(self.live.get() + 1);
        self.total.set(self.total.get() + 1);
        core::ptr::NonNull::new(unsafe { std::alloc::alloc_zeroed(layout) })
    }

    unsafe fn deallocate(&self, ptr: core::ptr::NonNull<u8>, layout: core::alloc::Layout) {
        self.live.set(self.live.get() - 1);
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
    }
}

/// One datagram observed at a mock TX socket.
pub struct SentDatagram {
    pub deadline: Instant,
    pub destination: IpEndpoint,
    pub dscp: u8,
    pub bytes: Vec<u8>,
}

/// Shared, inspectable state of one mock medium.
pub struct MediaState {
    payload_memory: Rc<dyn MemoryResource>,
    pub make_tx_calls: Cell<usize>,
    pub make_rx_calls: Cell<usize>,
    /// Endpoint the transport bound the RX socket to.
    pub rx_endpoint: Cell<Option<IpEndpoint>>,
    pub mtu: Cell<usize>,
    /// Upcoming `make_tx_socket` / `make_rx_socket` failures.
    pub fail_make_tx: Cell<usize>,
    pub fail_make_rx: Cell<usize>,
    /// Every datagram accepted by the TX socket, in order.
    pub sent: RefCell<Vec<SentDatagram>>,
    /// Scripted outcomes for upcoming sends; exhausted means `Accepted`.
    pub send_script: RefCell<VecDeque<Result<SendStatus, MediaFailure>>>,
    /// Scripted outcomes for upcoming receives; exhausted means nothing pending.
    pub rx_feed: RefCell<VecDeque<Result<RxDatagram, MediaFailure>>>,
    /// Accepted TX datagrams are also delivered into this medium's RX feed.
    pub forward_to: RefCell<Option<Weak<MediaState>>>,
}

impl MediaState {
    pub fn new(payload_memory: Rc<dyn MemoryResource>) -> Rc<Self> {
        Rc::new(Self {
            payload_memory,
            make_tx_calls: Cell::new(0),
            make_rx_calls: Cell::new(0),
            rx_endpoint: Cell::new(None),
            mtu: Cell::new(DEFAULT_MTU),
            fail_make_tx: Cell::new(0),
            fail_make_rx: Cell::new(0),
            sent: RefCell::new(Vec::new()),
            send_script: RefCell::new(VecDeque::new()),
            rx_feed: RefCell::new(VecDeque::new()),
            forward_to: RefCell::new(None),
        })
    }

    /// Places one datagram into this medium's RX feed.
    pub fn deliver(&self, bytes: &[u8], timestamp: Instant) {
        let payload =
            MemoryBuffer::from_slice(&self.payload_memory, bytes).expect("mock allocation");
        self.rx_feed
            .borrow_mut()
            .push_back(Ok(RxDatagram { timestamp, payload }));
    }

    pub fn script_send(&self, outcome: Result<SendStatus, MediaFailure>) {
        self.send_script.borrow_mut().push_back(outcome);
    }

    pub fn script_receive_failure(&self, failure: MediaFailure) {
        self.rx_feed.borrow_mut().push_back(Err(failure));
    }
}

/// A mock medium handing out sockets that share its [`MediaState`].
pub struct MockMedia {
    state: Rc<MediaState>,
}

impl MockMedia {
    /// A standalone medium; its state is the test's observation point.
    pub fn new(payload_memory: Rc<dyn MemoryResource>) -> (Box<dyn Media>, Rc<MediaState>) {
        let state = MediaState::new(payload_memory);
        (Box::new(Self { state: state.clone() }), state)
    }

    /// A medium whose transmissions arrive back on its own RX feed.
    pub fn loopback(payload_memory: Rc<dyn MemoryResource>) -> (Box<dyn Media>, Rc<MediaState>) {
        let (media, state) = Self::new(payload_memory);
        *state.forward_to.borrow_mut() = Some(Rc::downgrade(&state));
        (media, state)
    }

    /// Two media wired back to back, as two nodes sharing one network segment.
    pub fn linked_pair(
        payload_memory: Rc<dyn MemoryResource>,
    ) -> ((Box<dyn Media>, Rc<MediaState>), (Box<dyn Media>, Rc<MediaState>)) {
        let (media_a, state_a) = Self::new(payload_memory.clone());
        let (media_b, state_b) = Self::new(payload_memory);
        *state_a.forward_to.borrow_mut() = Some(Rc::downgrade(&state_b));
        *state_b.forward_to.borrow_mut() = Some(Rc::downgrade(&state_a));
        ((media_a, state_a), (media_b, state_b))
    }
}

impl Media for MockMedia {
    fn make_tx_socket(&mut self) -> Result<Box<dyn TxSocket>, MediaFailure> {
        if self.state.fail_make_tx.get() > 0 {
            self.state.fail_make_tx.set(self.state.fail_make_tx.get() - 1);
            return Err(MediaFailure::Platform(
                polycyphal::media::error::PlatformError(5),
            ));
        }
        self.state.make_tx_calls.set(self.state.make_tx_calls.get() + 1);
        Ok(Box::new(MockTxSocket {
            state: self.state.clone(),
        }))
    }

    fn make_rx_socket(
        &mut self,
        endpoint: IpEndpoint,
    ) -> Result<Box<dyn RxSocket>, MediaFailure> {
        if self.state.fail_make_rx.get() > 0 {
            self.state.fail_make_rx.set(self.state.fail_make_rx.get() - 1);
            return Err(MediaFailure::Platform(
                polycyphal::media::error::PlatformError(5),
            ));
        }
        self.state.make_rx_calls.set(self.state.make_rx_calls.get() + 1);
        self.state.rx_endpoint.set(Some(endpoint));
        Ok(Box::new(MockRxSocket {
            state: self.state.clone(),
        }))
    }
}

struct MockTxSocket {
    state: Rc<MediaState>,
}

impl TxSocket for MockTxSocket {
    fn mtu(&self) -> usize {
        self.state.mtu.get()
    }

    fn send(
        &mut self,
        deadline: Instant,
        destination: IpEndpoint,
        dscp: u8,
        datagram: &[u8],
    ) -> Result<SendStatus, MediaFailure> {
        let outcome = self
            .state
            .send_script
            .borrow_mut()
            .pop_front()
            .unwrap_or(Ok(SendStatus::Accepted));
        if outcome == Ok(SendStatus::Accepted) {
            self.state.sent.borrow_mut().push(SentDatagram {
                deadline,
                destination,
                dscp,
                bytes: datagram.to_vec(),
            });
            if let Some(target) = self
                .state
                .forward_to
                .borrow()
                .as_ref()
                .and_then(Weak::upgrade)
            {
                target.deliver(datagram, Instant::now());
            }
        }
        outcome
    }
}

struct MockRxSocket {
    state: Rc<MediaState>,
}

impl RxSocket for MockRxSocket {
    fn receive(&mut self) -> Result<Option<RxDatagram>, MediaFailure> {
        match self.state.rx_feed.borrow_mut().pop_front() {
            None => Ok(None),
            Some(Ok(datagram)) => Ok(Some(datagram)),
            Some(Err(failure)) => Err(failure),
        }
    }
}
