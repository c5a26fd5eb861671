//! Service request and response reception sessions

use alloc::boxed::Box;
use alloc::rc::Rc;
use core::cell::RefCell;

use polycyphal_media::time::{Duration, Instant};

use crate::error::{AnyFailure, MemoryError};
use crate::framer::format::Header;
use crate::framer::rx::{RxPort, RxTransfer};
use crate::session::{
    RequestRxParams, ResponseRxParams, RxSessionDelegate, ServiceRxTransfer,
    ServiceTransferMetadata, SessionEvent, TransferMetadata, deliver,
};
use crate::transport::TransportInner;

fn service_transfer(transfer: RxTransfer) -> Option<ServiceRxTransfer> {
    // The dispatcher never forwards anonymous service frames; the guard is for the
    // session's own consistency.
    let remote_node_id = transfer.metadata.source?;
    Some(ServiceRxTransfer {
        metadata: ServiceTransferMetadata {
            base: TransferMetadata {
                transfer_id: transfer.metadata.transfer_id,
                timestamp: transfer.metadata.timestamp,
                priority: transfer.metadata.priority,
            },
            remote_node_id,
        },
        payload: transfer.payload,
    })
}

struct RequestRxCore {
    params: RequestRxParams,
    port: RefCell<RxPort>,
    on_receive: RefCell<Option<Box<dyn FnMut(ServiceRxTransfer)>>>,
}

impl RxSessionDelegate for RequestRxCore {
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
        if let Some(transfer) = completed.and_then(service_transfer) {
            deliver(&self.on_receive, transfer);
        }
        Ok(())
    }
}

/// Receives request transfers addressed to this node on one service.
///
/// At most one live request session may exist per service id.
pub struct RequestRxSession {
    core: Rc<RequestRxCore>,
    transport: Rc<TransportInner>,
}

impl RequestRxSession {
    pub(crate) fn new(
        transport: Rc<TransportInner>,
        params: RequestRxParams,
    ) -> Result<Self, AnyFailure> {
        let core = Rc::new(RequestRxCore {
            params,
            port: RefCell::new(RxPort::new(
                params.extent_bytes,
                transport.memory().session.clone(),
            )),
            on_receive: RefCell::new(None),
        });
        let delegate: Rc<dyn RxSessionDelegate> = core.clone();
        transport.link_request_session(params.service_id, Rc::downgrade(&delegate))?;
        Ok(Self { core, transport })
    }

    pub fn params(&self) -> RequestRxParams {
        self.core.params
    }

    pub fn set_transfer_id_timeout(&self, timeout: Duration) {
        self.core.port.borrow_mut().set_transfer_id_timeout(timeout);
    }

    pub fn set_on_receive(&self, callback: impl FnMut(ServiceRxTransfer) + 'static) {
        *self.core.on_receive.borrow_mut() = Some(Box::new(callback));
    }

    pub fn clear_on_receive(&self) {
        *self.core.on_receive.borrow_mut() = None;
    }
}

impl Drop for RequestRxSession {
    fn drop(&mut self) {
        self.transport.on_session_event(SessionEvent::RequestDestroyed {
            service_id: self.core.params.service_id,
        });
    }
}

struct ResponseRxCore {
    params: ResponseRxParams,
    port: RefCell<RxPort>,
    on_receive: RefCell<Option<Box<dyn FnMut(ServiceRxTransfer)>>>,
}

impl RxSessionDelegate for ResponseRxCore {
    fn accept_frame(
        &self,
        timestamp: Instant,
        header: &Header,
        frame_payload: &[u8],
        medium_index: u8,
    ) -> Result<(), MemoryError> {
        // Responses from any node other than the addressed server are not ours.
        if header.source != Some(self.params.server_node_id) {
            return Ok(());
        }
        let completed =
            self.port
                .borrow_mut()
                .accept(timestamp, header, frame_payload, medium_index)?;
        if let Some(transfer) = completed.and_then(service_transfer) {
            deliver(&self.on_receive, transfer);
        }
        Ok(())
    }
}

/// Receives response transfers from one fixed server on one service.
///
/// At most one live response session may exist per service id.
pub struct ResponseRxSession {
    core: Rc<ResponseRxCore>,
    transport: Rc<TransportInner>,
}

impl ResponseRxSession {
    pub(crate) fn new(
        transport: Rc<TransportInner>,
        params: ResponseRxParams,
    ) -> Result<Self, AnyFailure> {
        let core = Rc::new(ResponseRxCore {
            params,
            port: RefCell::new(RxPort::new(
                params.extent_bytes,
                transport.memory().session.clone(),
            )),
            on_receive: RefCell::new(None),
        });
        let delegate: Rc<dyn RxSessionDelegate> = core.clone();
        transport.link_response_session(params.service_id, Rc::downgrade(&delegate))?;
        Ok(Self { core, transport })
    }

    pub fn params(&self) -> ResponseRxParams {
        self.core.params
    }

    pub fn set_transfer_id_timeout(&self, timeout: Duration) {
        self.core.port.borrow_mut().set_transfer_id_timeout(timeout);
    }

    pub fn set_on_receive(&self, callback: impl FnMut(ServiceRxTransfer) + 'static) {
        *self.core.on_receive.borrow_mut() = Some(Box::new(callback));
    }

    pub fn clear_on_receive(&self) {
        *self.core.on_receive.borrow_mut() = None;
    }
}

impl Drop for ResponseRxSession {
    fn drop(&mut self) {
        self.transport.on_session_event(SessionEvent::ResponseDestroyed {
            service_id: self.core.params.service_id,
        });
    }
}
