//! Message publication session

use alloc::rc::Rc;
use core::cell::Cell;

use polycyphal_media::time::Duration;

use crate::error::AnyFailure;
use crate::framer::tx_queue::TxMetadata;
use crate::session::{DEFAULT_SEND_TIMEOUT, MessageTxParams, TransferMetadata};
use crate::transport::TransportInner;

/// Publishes message transfers on one subject.
///
/// `send` enqueues the transfer into every medium's TX queue before returning; actual
/// transmission happens on subsequent transport ticks. The transfer id should advance
/// sequentially for the life of the subject.
pub struct MessageTxSession {
    transport: Rc<TransportInner>,
    params: MessageTxParams,
    send_timeout: Cell<Duration>,
}

impl MessageTxSession {
    pub(crate) fn new(transport: Rc<TransportInner>, params: MessageTxParams) -> Self {
        Self {
            transport,
            params,
            send_timeout: Cell::new(DEFAULT_SEND_TIMEOUT),
        }
    }

    pub fn params(&self) -> MessageTxParams {
        self.params
    }

    /// Margin added to `metadata.timestamp` to derive the wire deadline. A transfer
    /// whose deadline has passed at drain time is dropped whole, never partially sent.
    pub fn set_send_timeout(&self, timeout: Duration) {
        self.send_timeout.set(timeout);
    }

    pub fn send(
        &self,
        metadata: &TransferMetadata,
        payload_fragments: &[&[u8]],
    ) -> Result<(), AnyFailure> {
        let deadline = metadata.timestamp + self.send_timeout.get();
        self.transport.send_transfer(
            deadline,
            TxMetadata::Publish {
                priority: metadata.priority,
                subject_id: self.params.subject_id,
                transfer_id: metadata.transfer_id,
            },
            payload_fragments,
        )
    }
}
