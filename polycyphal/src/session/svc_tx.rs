//! Service request and response transmission sessions

use alloc::rc::Rc;
use core::cell::Cell;

use polycyphal_media::time::Duration;

use crate::error::AnyFailure;
use crate::framer::tx_queue::TxMetadata;
use crate::session::{
    DEFAULT_SEND_TIMEOUT, RequestTxParams, ResponseTxParams, ServiceTransferMetadata,
    TransferMetadata,
};
use crate::transport::TransportInner;

/// Sends request transfers to one fixed server.
///
/// The local node id must be set before the enqueued transfer can be built; an
/// anonymous node cannot call services.
pub struct RequestTxSession {
    transport: Rc<TransportInner>,
    params: RequestTxParams,
    send_timeout: Cell<Duration>,
}

impl RequestTxSession {
    pub(crate) fn new(transport: Rc<TransportInner>, params: RequestTxParams) -> Self {
        Self {
            transport,
            params,
            send_timeout: Cell::new(DEFAULT_SEND_TIMEOUT),
        }
    }

    pub fn params(&self) -> RequestTxParams {
        self.params
    }

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
            TxMetadata::Request {
                priority: metadata.priority,
                service_id: self.params.service_id,
                server_node_id: self.params.server_node_id,
                transfer_id: metadata.transfer_id,
            },
            payload_fragments,
        )
    }
}

/// Sends response transfers back to requesting clients.
///
/// The addressed client arrives with each call's metadata; priority and transfer id
/// must echo the values of the request being answered so the client can correlate.
pub struct ResponseTxSession {
    transport: Rc<TransportInner>,
    params: ResponseTxParams,
    send_timeout: Cell<Duration>,
}

impl ResponseTxSession {
    pub(crate) fn new(transport: Rc<TransportInner>, params: ResponseTxParams) -> Self {
        Self {
            transport,
            params,
            send_timeout: Cell::new(DEFAULT_SEND_TIMEOUT),
        }
    }

    pub fn params(&self) -> ResponseTxParams {
        self.params
    }

    pub fn set_send_timeout(&self, timeout: Duration) {
        self.send_timeout.set(timeout);
    }

    pub fn send(
        &self,
        metadata: &ServiceTransferMetadata,
        payload_fragments: &[&[u8]],
    ) -> Result<(), AnyFailure> {
        let deadline = metadata.base.timestamp + self.send_timeout.get();
        self.transport.send_transfer(
            deadline,
            TxMetadata::Respond {
                priority: metadata.base.priority,
                service_id: self.params.service_id,
                client_node_id: metadata.remote_node_id,
                transfer_id: metadata.base.transfer_id,
            },
            payload_fragments,
        )
    }
}
