//! Message subscription session

use alloc::boxed::Box;
use alloc::rc::Rc;
use core::cell::RefCell;

use polycyphal_media::time::{Duration, Instant};

use crate::error::{AnyFailure, MemoryError};
use crate::framer::format::Header;
use crate::framer::rx::RxPort;
use crate::session::{
    MessageRxMetadata, MessageRxParams, MessageRxTransfer, RxSessionDelegate, SessionEvent,
    TransferMetadata, deliver,
};
use crate::transport::TransportInner;

// Shared between the session handle (strong) and the transport's session tree (weak).
struct MessageRxCore {
    params: MessageRxParams,
    port: RefCell<RxPort>,
    on_receive: RefCell<Option<Box<dyn FnMut(MessageRxTransfer)>>>,
}

impl RxSessionDelegate for MessageRxCore {
    fn accept_frame(
        &self,
        timestamp: Instant,
        header: &Header,
        frame_payload: &[u8],
        medium_index: u8,
    ) -> Result<(), MemoryError> {
        let completed =
            self.port
                .borrow_mut()
                .accept(timestamp, header, frame_payload, medium_index)?;
        if let Some(transfer) = completed {
            deliver(
                &self.on_receive,
                MessageRxTransfer {
                    metadata: MessageRxMetadata {
                        base: TransferMetadata {
                            transfer_id: transfer.metadata.transfer_id,
                            timestamp: transfer.metadata.timestamp,
                            priority: transfer.metadata.priority,
                        },
                        publisher: transfer.metadata.source,
                    },
                    payload: transfer.payload,
                },
            );
        }
        Ok(())
    }
}

/// Receives message transfers published on one subject.
///
/// At most one live subscription may exist per subject; the factory rejects duplicates.
/// The receive callback runs synchronously from the transport's RX pump.
pub struct MessageRxSession {
    core: Rc<MessageRxCore>,
    transport: Rc<TransportInner>,
}

impl MessageRxSession {
    pub(crate) fn new(
        transport: Rc<TransportInner>,
        params: MessageRxParams,
    ) -> Result<Self, AnyFailure> {
        let core = Rc::new(MessageRxCore {
            params,
            port: RefCell::new(RxPort::new(
                params.extent_bytes,
                transport.memory().session.clone(),
            )),
            on_receive: RefCell::new(None),
        });
        let delegate: Rc<dyn RxSessionDelegate> = core.clone();
        transport.link_message_session(params.subject_id, Rc::downgrade(&delegate))?;
        Ok(Self { core, transport })
    }

    pub fn params(&self) -> MessageRxParams {
        self.core.params
    }

    /// Horizon after which a stale transfer id no longer counts as a duplicate.
    pub fn set_transfer_id_timeout(&self, timeout: Duration) {
        self.core.port.borrow_mut().set_transfer_id_timeout(timeout);
    }

    /// Installs the receive callback. One at a time; a later call replaces the earlier
    /// callback.
    pub fn set_on_receive(&self, callback: impl FnMut(MessageRxTransfer) + 'static) {
        *self.core.on_receive.borrow_mut() = Some(Box::new(callback));
    }

    pub fn clear_on_receive(&self) {
        *self.core.on_receive.borrow_mut() = None;
    }
}

impl Drop for MessageRxSession {
    fn drop(&mut self) {
        self.transport.on_session_event(SessionEvent::MessageDestroyed {
            subject_id: self.core.params.subject_id,
        });
    }
}
