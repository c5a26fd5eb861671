//! Transport sessions
//!
//! Sessions are the user-facing endpoints of the transport: three TX kinds (publish,
//! request, respond) and three RX kinds (subject, request, response). TX sessions
//! serialize transfers into every medium's framer queue; RX sessions receive
//! reassembled transfers from the transport's RX pump through a synchronous callback.
//!
//! A session is created by the owning transport's factory and stays linked to it for
//! its whole life. RX sessions additionally occupy a node in the transport's session
//! tree; at most one live RX session may exist per (kind, port id). The node is removed
//! before the session's destructor returns, so no callback fires after the session is
//! gone.

use alloc::boxed::Box;
use core::cell::RefCell;

use polycyphal_core::{NodeId, Priority, ServiceId, SubjectId, TransferId};
use polycyphal_media::memory::MemoryBuffer;
use polycyphal_media::time::{Duration, Instant};

use crate::error::MemoryError;
use crate::framer::format::Header;

mod msg_rx;
mod msg_tx;
mod svc_rx;
mod svc_tx;

pub use msg_rx::MessageRxSession;
pub use msg_tx::MessageTxSession;
pub use svc_rx::{RequestRxSession, ResponseRxSession};
pub use svc_tx::{RequestTxSession, ResponseTxSession};

pub use crate::framer::rx::DEFAULT_TRANSFER_ID_TIMEOUT;

/// Default margin added to a transfer's metadata timestamp to form its TX deadline.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Metadata common to every transfer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferMetadata {
    pub transfer_id: TransferId,
    /// On TX: the instant the transfer was formed; the send timeout is added to it to
    /// derive the wire deadline. On RX: the reception instant.
    pub timestamp: Instant,
    pub priority: Priority,
}

/// Transfer metadata of a service call, naming the remote side.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ServiceTransferMetadata {
    pub base: TransferMetadata,
    /// The server for requests, the client for responses.
    pub remote_node_id: NodeId,
}

/// Metadata of a received message transfer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MessageRxMetadata {
    pub base: TransferMetadata,
    /// `None` for anonymous publishers.
    pub publisher: Option<NodeId>,
}

/// A received message transfer. The payload buffer is owned by the receiver.
#[derive(Debug)]
pub struct MessageRxTransfer {
    pub metadata: MessageRxMetadata,
    pub payload: MemoryBuffer,
}

/// A received service transfer (request or response).
#[derive(Debug)]
pub struct ServiceRxTransfer {
    pub metadata: ServiceTransferMetadata,
    pub payload: MemoryBuffer,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MessageTxParams {
    pub subject_id: SubjectId,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MessageRxParams {
    /// Maximum number of payload bytes retained per transfer.
    pub extent_bytes: usize,
    pub subject_id: SubjectId,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RequestTxParams {
    pub service_id: ServiceId,
    pub server_node_id: NodeId,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RequestRxParams {
    pub extent_bytes: usize,
    pub service_id: ServiceId,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ResponseTxParams {
    pub service_id: ServiceId,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ResponseRxParams {
    pub extent_bytes: usize,
    pub service_id: ServiceId,
    /// Only responses originating from this server are delivered.
    pub server_node_id: NodeId,
}

/// RX-pump-facing side of an RX session: one validated frame in, possibly a user
/// callback invocation out.
pub(crate) trait RxSessionDelegate {
    fn accept_frame(
        &self,
        timestamp: Instant,
        header: &Header,
        frame_payload: &[u8],
        medium_index: u8,
    ) -> Result<(), MemoryError>;
}

/// Notification a session posts to its transport on destruction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum SessionEvent {
    MessageDestroyed { subject_id: SubjectId },
    RequestDestroyed { service_id: ServiceId },
    ResponseDestroyed { service_id: ServiceId },
}

// Invokes the installed callback with the function taken out of its slot, so the
// callback itself may install a replacement (which then wins).
pub(crate) fn deliver<T>(slot: &RefCell<Option<Box<dyn FnMut(T)>>>, transfer: T) {
    let taken = slot.borrow_mut().take();
    if let Some(mut function) = taken {
        function(transfer);
        let mut slot = slot.borrow_mut();
        if slot.is_none() {
            *slot = Some(function);
        }
    }
}
