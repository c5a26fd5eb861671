//! Redundant multi-media UDP transport
//!
//! The transport owns up to three redundant media and drives all traffic from its
//! [`UdpTransport::run`] tick, which the embedder schedules on the executor. Each tick
//! first drains every medium's TX queue (transmission frees framer memory that
//! reassembly may need), then pumps every medium's RX socket and dispatches received
//! datagrams to the owning sessions.
//!
//! Sockets are materialized lazily: the TX socket when a medium first has something to
//! send (its MTU then governs fragmentation), the RX socket once the local node id is
//! known and the service endpoint can be derived from it. A failed creation is a
//! transient error and is retried on every subsequent tick.
//!
//! All per-medium failures route through the optional transient-error handler; see
//! [`crate::transient`] for the policy.

use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

use polycyphal_core::{NodeId, ServiceId, SubjectId};
use polycyphal_media::endpoint::IpEndpoint;
use polycyphal_media::memory::{MemoryBuffer, MemoryResource, MemoryResources};
use polycyphal_media::socket::{DEFAULT_MTU, Media, RxDatagram, RxSocket, SendStatus, TxSocket};
use polycyphal_media::time::Instant;

use crate::error::{AnyFailure, ArgumentError, MemoryError};
use crate::framer::format::{DataSpecifier, HEADER_SIZE, Header};
use crate::framer::tx_queue::{TxMetadata, TxQueue};
use crate::session::{
    MessageRxParams, MessageRxSession, MessageTxParams, MessageTxSession, RequestRxParams,
    RequestRxSession, RequestTxParams, RequestTxSession, ResponseRxParams, ResponseRxSession,
    ResponseTxParams, ResponseTxSession, RxSessionDelegate, SessionEvent,
};
use crate::session_tree::SessionTree;
use crate::transient::{TransientErrorHandler, TransientErrorReport};

/// Capabilities of the transport as currently configured.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProtocolParams {
    pub transfer_id_modulo: u64,
    /// The smallest MTU across all media TX sockets.
    pub mtu_bytes: usize,
    pub max_nodes: u32,
}

/// Cyphal/UDP transport over a set of redundant media.
pub struct UdpTransport {
    inner: Rc<TransportInner>,
}

impl UdpTransport {
    /// Redundant media supported per transport.
    pub const MEDIA_COUNT_MAX: usize = 3;

    /// Creates a transport over `media`, with `tx_capacity` queued frames allowed per
    /// medium.
    pub fn new(
        memory: MemoryResources,
        media: Vec<Box<dyn Media>>,
        tx_capacity: usize,
    ) -> Result<Self, ArgumentError> {
        if media.is_empty() || media.len() > Self::MEDIA_COUNT_MAX {
            return Err(ArgumentError);
        }

        let entries = media
            .into_iter()
            .enumerate()
            .map(|(index, interface)| MediaEntry {
                index: index as u8,
                interface,
                tx_queue: TxQueue::new(tx_capacity),
                tx_socket: None,
                rx_socket: None,
            })
            .collect();

        Ok(Self {
            inner: Rc::new(TransportInner {
                memory,
                node_id: Cell::new(None),
                svc_rx_endpoint: Cell::new(None),
                media: RefCell::new(entries),
                msg_rx_nodes: SessionTree::new(),
                req_rx_nodes: SessionTree::new(),
                resp_rx_nodes: SessionTree::new(),
                handler: RefCell::new(None),
            }),
        })
    }

    pub fn local_node_id(&self) -> Option<NodeId> {
        self.inner.node_id.get()
    }

    /// Assigns the local node id and derives the service RX endpoint from it.
    ///
    /// Assigning the same id again is a no-op; assigning a different id after one is
    /// set fails and mutates nothing. There is no way back to the anonymous state.
    pub fn set_local_node_id(&self, node_id: NodeId) -> Result<(), ArgumentError> {
        match self.inner.node_id.get() {
            Some(current) if current == node_id => Ok(()),
            Some(_) => Err(ArgumentError),
            None => {
                self.inner.node_id.set(Some(node_id));
                self.inner
                    .svc_rx_endpoint
                    .set(Some(IpEndpoint::for_service(node_id)));
                Ok(())
            }
        }
    }

    /// Installs (or clears) the transient-error policy. Takes effect immediately.
    pub fn set_transient_error_handler(&self, handler: Option<TransientErrorHandler>) {
        *self.inner.handler.borrow_mut() = handler;
    }

    pub fn protocol_params(&self) -> ProtocolParams {
        let media = self.inner.media.borrow();
        let mtu_bytes = media
            .iter()
            .map(|entry| {
                entry
                    .tx_socket
                    .as_ref()
                    .map_or(DEFAULT_MTU, |socket| socket.mtu())
            })
            .min()
            .unwrap_or(DEFAULT_MTU);

        ProtocolParams {
            transfer_id_modulo: u64::MAX,
            mtu_bytes,
            max_nodes: u32::from(NodeId::MAX.into_u16()) + 1,
        }
    }

    /// One transport tick: full TX drain, then RX pump, media in index order.
    pub fn run(&self, now: Instant) -> Result<(), AnyFailure> {
        // TX first: transmission releases queue memory that may be needed for the
        // frames about to be received.
        self.inner.run_media_transmit(now)?;
        self.inner.run_media_receive()
    }

    pub fn make_message_tx_session(
        &self,
        params: MessageTxParams,
    ) -> Result<MessageTxSession, AnyFailure> {
        self.inner.ensure_media_tx_sockets()?;
        Ok(MessageTxSession::new(self.inner.clone(), params))
    }

    pub fn make_message_rx_session(
        &self,
        params: MessageRxParams,
    ) -> Result<MessageRxSession, AnyFailure> {
        MessageRxSession::new(self.inner.clone(), params)
    }

    pub fn make_request_tx_session(
        &self,
        params: RequestTxParams,
    ) -> Result<RequestTxSession, AnyFailure> {
        self.inner.ensure_media_tx_sockets()?;
        Ok(RequestTxSession::new(self.inner.clone(), params))
    }

    pub fn make_request_rx_session(
        &self,
        params: RequestRxParams,
    ) -> Result<RequestRxSession, AnyFailure> {
        self.inner.ensure_media_rx_sockets()?;
        RequestRxSession::new(self.inner.clone(), params)
    }

    pub fn make_response_tx_session(
        &self,
        params: ResponseTxParams,
    ) -> Result<ResponseTxSession, AnyFailure> {
        self.inner.ensure_media_tx_sockets()?;
        Ok(ResponseTxSession::new(self.inner.clone(), params))
    }

    pub fn make_response_rx_session(
        &self,
        params: ResponseRxParams,
    ) -> Result<ResponseRxSession, AnyFailure> {
        self.inner.ensure_media_rx_sockets()?;
        ResponseRxSession::new(self.inner.clone(), params)
    }
}

struct MediaEntry {
    index: u8,
    interface: Box<dyn Media>,
    tx_queue: TxQueue,
    tx_socket: Option<Box<dyn TxSocket>>,
    rx_socket: Option<Box<dyn RxSocket>>,
}

// Shared between the public transport handle and every session spawned from it.
// Sessions keep it alive; the trees inside hold only weak session references.
pub(crate) struct TransportInner {
    memory: MemoryResources,
    node_id: Cell<Option<NodeId>>,
    svc_rx_endpoint: Cell<Option<IpEndpoint>>,
    media: RefCell<Vec<MediaEntry>>,
    msg_rx_nodes: SessionTree<SubjectId>,
    req_rx_nodes: SessionTree<ServiceId>,
    resp_rx_nodes: SessionTree<ServiceId>,
    handler: RefCell<Option<TransientErrorHandler>>,
}

impl TransportInner {
    pub(crate) fn memory(&self) -> &MemoryResources {
        &self.memory
    }

    pub(crate) fn link_message_session(
        &self,
        subject_id: SubjectId,
        delegate: Weak<dyn RxSessionDelegate>,
    ) -> Result<(), ArgumentError> {
        self.msg_rx_nodes.ensure_new(subject_id, delegate)
    }

    pub(crate) fn link_request_session(
        &self,
        service_id: ServiceId,
        delegate: Weak<dyn RxSessionDelegate>,
    ) -> Result<(), ArgumentError> {
        self.req_rx_nodes.ensure_new(service_id, delegate)
    }

    pub(crate) fn link_response_session(
        &self,
        service_id: ServiceId,
        delegate: Weak<dyn RxSessionDelegate>,
    ) -> Result<(), ArgumentError> {
        self.resp_rx_nodes.ensure_new(service_id, delegate)
    }

    pub(crate) fn on_session_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::MessageDestroyed { subject_id } => {
                self.msg_rx_nodes.remove(subject_id);
            }
            SessionEvent::RequestDestroyed { service_id } => {
                self.req_rx_nodes.remove(service_id);
            }
            SessionEvent::ResponseDestroyed { service_id } => {
                self.resp_rx_nodes.remove(service_id);
            }
        }
    }

    /// Enqueues one transfer into every medium's TX queue.
    ///
    /// Scattered payloads are flattened into a contiguous buffer first (`general`
    /// category). Per-medium enqueue failures follow the transient policy, so a single
    /// failing medium does not stop the transfer from reaching the others.
    pub(crate) fn send_transfer(
        &self,
        deadline: Instant,
        metadata: TxMetadata,
        payload_fragments: &[&[u8]],
    ) -> Result<(), AnyFailure> {
        let payload = FlatPayload::new(&self.memory.general, payload_fragments)?;
        let source = self.node_id.get();

        let mut media = self.media.borrow_mut();
        for entry in media.iter_mut() {
            if !self.ensure_entry_tx_socket(entry)? {
                continue;
            }

            let MediaEntry {
                index, tx_queue, ..
            } = entry;
            if let Err(failure) =
                tx_queue.push(deadline, &metadata, source, &payload, &self.memory.fragment)
            {
                let report = match metadata {
                    TxMetadata::Publish { .. } => TransientErrorReport::FramerTxPublish {
                        failure,
                        medium_index: *index,
                        queue: tx_queue,
                    },
                    TxMetadata::Request { .. } => TransientErrorReport::FramerTxRequest {
                        failure,
                        medium_index: *index,
                        queue: tx_queue,
                    },
                    TxMetadata::Respond { .. } => TransientErrorReport::FramerTxRespond {
                        failure,
                        medium_index: *index,
                        queue: tx_queue,
                    },
                };
                self.route_transient(report)?;
            }
        }
        Ok(())
    }

    fn run_media_transmit(&self, now: Instant) -> Result<(), AnyFailure> {
        let mut media = self.media.borrow_mut();
        for entry in media.iter_mut() {
            if !self.ensure_entry_tx_socket(entry)? {
                continue;
            }

            let MediaEntry {
                index,
                tx_queue,
                tx_socket,
                ..
            } = entry;
            let socket = unwrap!(tx_socket.as_mut());

            loop {
                let Some(item) = tx_queue.peek() else {
                    break;
                };

                // An expired head frame condemns its entire transfer: the remaining
                // fragments share the deadline.
                if now >= item.deadline {
                    tx_queue.drop_head_transfer();
                    continue;
                }

                match socket.send(item.deadline, item.destination, item.dscp, &item.datagram) {
                    Ok(SendStatus::Accepted) => {
                        tx_queue.pop_frame();
                    }
                    Ok(SendStatus::WouldBlock) => break,
                    Err(failure) => {
                        // The socket rejected this frame; the rest of the transfer is
                        // undecodable for receivers, so drop it whole and move on.
                        tx_queue.drop_head_transfer();
                        self.route_transient(TransientErrorReport::MediaTxSocketSend {
                            failure: failure.into(),
                            medium_index: *index,
                            socket: socket.as_mut(),
                        })?;
                    }
                }
            }
        }
        Ok(())
    }

    fn run_media_receive(&self) -> Result<(), AnyFailure> {
        // No node id means no endpoint: the node cannot be a destination yet.
        if self.svc_rx_endpoint.get().is_none() {
            return Ok(());
        }

        let media_count = self.media.borrow().len();
        for medium in 0..media_count {
            loop {
                match self.receive_one(medium)? {
                    Some(RxDatagram { timestamp, payload }) => {
                        self.dispatch_datagram(timestamp, payload, medium as u8)?;
                    }
                    None => break,
                }
            }
        }
        Ok(())
    }

    // One receive attempt under the media borrow; `Ok(None)` ends this medium's pump
    // for the tick.
    fn receive_one(&self, medium: usize) -> Result<Option<RxDatagram>, AnyFailure> {
        let mut media = self.media.borrow_mut();
        let entry = &mut media[medium];

        if entry.rx_socket.is_none() {
            let endpoint = unwrap!(self.svc_rx_endpoint.get());
            match entry.interface.make_rx_socket(endpoint) {
                Ok(socket) => entry.rx_socket = Some(socket),
                Err(failure) => {
                    self.route_transient(TransientErrorReport::MediaMakeRxSocket {
                        failure: failure.into(),
                        medium_index: entry.index,
                        media: entry.interface.as_mut(),
                    })?;
                    return Ok(None);
                }
            }
        }

        let MediaEntry {
            index, rx_socket, ..
        } = entry;
        let socket = unwrap!(rx_socket.as_mut());
        match socket.receive() {
            Ok(datagram) => Ok(datagram),
            Err(failure) => {
                self.route_transient(TransientErrorReport::MediaRxSocketReceive {
                    failure: failure.into(),
                    medium_index: *index,
                    socket: socket.as_mut(),
                })?;
                Ok(None)
            }
        }
    }

    // Routes one datagram through the framer: parse, find the owning port, reassemble,
    // deliver. No internal borrows are held while a session delegate (and thus a user
    // callback) runs.
    fn dispatch_datagram(
        &self,
        timestamp: Instant,
        payload: MemoryBuffer,
        medium_index: u8,
    ) -> Result<(), AnyFailure> {
        let Some(header) = Header::parse(&payload) else {
            trace!("malformed datagram dropped");
            return Ok(());
        };
        let frame_payload = &payload[HEADER_SIZE..];

        match header.data_spec {
            DataSpecifier::Message(subject_id) => {
                self.accept_rx_frame(timestamp, &header, frame_payload, medium_index, subject_id)
            }
            DataSpecifier::Request(service_id) => self.rpc_dispatcher_receive(
                timestamp,
                &header,
                frame_payload,
                medium_index,
                service_id,
                true,
            ),
            DataSpecifier::Response(service_id) => self.rpc_dispatcher_receive(
                timestamp,
                &header,
                frame_payload,
                medium_index,
                service_id,
                false,
            ),
        }
    }

    // Subject (pub/sub) reception path.
    fn accept_rx_frame(
        &self,
        timestamp: Instant,
        header: &Header,
        frame_payload: &[u8],
        medium_index: u8,
        subject_id: SubjectId,
    ) -> Result<(), AnyFailure> {
        if header.destination.is_some() {
            return Ok(());
        }
        let Some(delegate) = self.msg_rx_nodes.find(subject_id) else {
            return Ok(());
        };
        match delegate.accept_frame(timestamp, header, frame_payload, medium_index) {
            Ok(()) => Ok(()),
            Err(failure) => self.route_transient(TransientErrorReport::FramerRxMessageAccept {
                failure: failure.into(),
                medium_index,
                subject_id,
            }),
        }
    }

    // Service reception path.
    fn rpc_dispatcher_receive(
        &self,
        timestamp: Instant,
        header: &Header,
        frame_payload: &[u8],
        medium_index: u8,
        service_id: ServiceId,
        is_request: bool,
    ) -> Result<(), AnyFailure> {
        if header.source.is_none() {
            return Ok(());
        }
        if header.destination != self.node_id.get() {
            return Ok(());
        }

        let tree = if is_request {
            &self.req_rx_nodes
        } else {
            &self.resp_rx_nodes
        };
        let Some(delegate) = tree.find(service_id) else {
            return Ok(());
        };
        match delegate.accept_frame(timestamp, header, frame_payload, medium_index) {
            Ok(()) => Ok(()),
            Err(failure) => self.route_transient(TransientErrorReport::FramerRxServiceReceive {
                failure: failure.into(),
                medium_index,
                service_id,
            }),
        }
    }

    // Creates the entry's TX socket if absent, adopting its MTU for fragmentation.
    // `Ok(false)` means creation failed and was swallowed; skip this medium for now.
    fn ensure_entry_tx_socket(&self, entry: &mut MediaEntry) -> Result<bool, AnyFailure> {
        if entry.tx_socket.is_some() {
            return Ok(true);
        }
        match entry.interface.make_tx_socket() {
            Ok(socket) => {
                entry.tx_queue.set_mtu(socket.mtu());
                entry.tx_socket = Some(socket);
                Ok(true)
            }
            Err(failure) => {
                self.route_transient(TransientErrorReport::MediaMakeTxSocket {
                    failure: failure.into(),
                    medium_index: entry.index,
                    media: entry.interface.as_mut(),
                })?;
                Ok(false)
            }
        }
    }

    pub(crate) fn ensure_media_tx_sockets(&self) -> Result<(), AnyFailure> {
        let mut media = self.media.borrow_mut();
        for entry in media.iter_mut() {
            self.ensure_entry_tx_socket(entry)?;
        }
        Ok(())
    }

    pub(crate) fn ensure_media_rx_sockets(&self) -> Result<(), AnyFailure> {
        let Some(endpoint) = self.svc_rx_endpoint.get() else {
            // Not an error: sockets appear once the node id is known.
            return Ok(());
        };

        let mut media = self.media.borrow_mut();
        for entry in media.iter_mut() {
            if entry.rx_socket.is_some() {
                continue;
            }
            match entry.interface.make_rx_socket(endpoint) {
                Ok(socket) => entry.rx_socket = Some(socket),
                Err(failure) => {
                    self.route_transient(TransientErrorReport::MediaMakeRxSocket {
                        failure: failure.into(),
                        medium_index: entry.index,
                        media: entry.interface.as_mut(),
                    })?;
                }
            }
        }
        Ok(())
    }

    // Default policy: propagate. With a handler installed, the handler decides.
    fn route_transient(&self, mut report: TransientErrorReport<'_>) -> Result<(), AnyFailure> {
        let mut handler = self.handler.borrow_mut();
        match handler.as_mut() {
            None => Err(report.failure()),
            Some(function) => match function(&mut report) {
                None => Ok(()),
                Some(failure) => Err(failure),
            },
        }
    }
}

// A scattered payload flattened for the framer, which fragments contiguous bytes only.
// A single non-empty fragment is borrowed as-is; anything else is copied into one
// buffer from the `general` category.
enum FlatPayload<'a> {
    Borrowed(&'a [u8]),
    Owned(MemoryBuffer),
}

impl<'a> FlatPayload<'a> {
    fn new(
        general: &Rc<dyn MemoryResource>,
        fragments: &[&'a [u8]],
    ) -> Result<Self, MemoryError> {
        let mut non_empty = fragments.iter().filter(|fragment| !fragment.is_empty());
        let Some(&first) = non_empty.next() else {
            return Ok(Self::Borrowed(&[]));
        };
        if non_empty.next().is_none() {
            return Ok(Self::Borrowed(first));
        }

        let total = fragments.iter().map(|fragment| fragment.len()).sum();
        let mut buffer = MemoryBuffer::allocate(general, total)?;
        let mut offset = 0;
        for fragment in fragments {
            buffer[offset..offset + fragment.len()].copy_from_slice(fragment);
            offset += fragment.len();
        }
        Ok(Self::Owned(buffer))
    }
}

impl core::ops::Deref for FlatPayload<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        match self {
            Self::Borrowed(bytes) => bytes,
            Self::Owned(buffer) => buffer,
        }
    }
}
