//! Transient-error policy
//!
//! A transient error is localized to one medium on one tick. The transport routes every
//! such error through an optional user-supplied handler:
//!
//! * no handler installed: the error aborts the current `run`/`send` and surfaces to
//!   the caller;
//! * handler returns `None`: the error is swallowed and the transport continues with
//!   the next frame or medium;
//! * handler returns `Some(failure)`: that failure surfaces immediately and the
//!   remaining media are not processed this tick.
//!
//! A TX failure swallowed by the handler still drops the whole offending transfer; it
//! is never retried.
//!
//! The handler runs inside the transport's tick and must not call back into `run`,
//! `send`, or `receive`. It may mutate the culprit it is given (e.g., reset a medium).

use alloc::boxed::Box;

use polycyphal_core::{ServiceId, SubjectId};
use polycyphal_media::socket::{Media, RxSocket, TxSocket};

use crate::error::AnyFailure;
use crate::framer::tx_queue::TxQueue;

/// Describes one transient error: what failed, on which medium, and the culprit.
///
/// The report is handed to the handler by mutable reference; the failure payload and
/// the culprit may both be mutated in place.
pub enum TransientErrorReport<'r> {
    /// `Media::make_tx_socket` failed.
    MediaMakeTxSocket {
        failure: AnyFailure,
        medium_index: u8,
        media: &'r mut dyn Media,
    },
    /// `Media::make_rx_socket` failed.
    MediaMakeRxSocket {
        failure: AnyFailure,
        medium_index: u8,
        media: &'r mut dyn Media,
    },
    /// `TxSocket::send` failed; the whole affected transfer has been dropped.
    MediaTxSocketSend {
        failure: AnyFailure,
        medium_index: u8,
        socket: &'r mut dyn TxSocket,
    },
    /// `RxSocket::receive` failed.
    MediaRxSocketReceive {
        failure: AnyFailure,
        medium_index: u8,
        socket: &'r mut dyn RxSocket,
    },
    /// A message publication could not enter the medium's TX queue.
    FramerTxPublish {
        failure: AnyFailure,
        medium_index: u8,
        queue: &'r mut TxQueue,
    },
    /// A service request could not enter the medium's TX queue.
    FramerTxRequest {
        failure: AnyFailure,
        medium_index: u8,
        queue: &'r mut TxQueue,
    },
    /// A service response could not enter the medium's TX queue.
    FramerTxRespond {
        failure: AnyFailure,
        medium_index: u8,
        queue: &'r mut TxQueue,
    },
    /// A subject port failed to take a received frame.
    FramerRxMessageAccept {
        failure: AnyFailure,
        medium_index: u8,
        subject_id: SubjectId,
    },
    /// A service port failed to take a received frame.
    FramerRxServiceReceive {
        failure: AnyFailure,
        medium_index: u8,
        service_id: ServiceId,
    },
}

impl TransientErrorReport<'_> {
    /// The originating failure.
    pub fn failure(&self) -> AnyFailure {
        match self {
            Self::MediaMakeTxSocket { failure, .. }
            | Self::MediaMakeRxSocket { failure, .. }
            | Self::MediaTxSocketSend { failure, .. }
            | Self::MediaRxSocketReceive { failure, .. }
            | Self::FramerTxPublish { failure, .. }
            | Self::FramerTxRequest { failure, .. }
            | Self::FramerTxRespond { failure, .. }
            | Self::FramerRxMessageAccept { failure, .. }
            | Self::FramerRxServiceReceive { failure, .. } => *failure,
        }
    }

    /// Index of the medium the error happened on.
    pub fn medium_index(&self) -> u8 {
        match self {
            Self::MediaMakeTxSocket { medium_index, .. }
            | Self::MediaMakeRxSocket { medium_index, .. }
            | Self::MediaTxSocketSend { medium_index, .. }
            | Self::MediaRxSocketReceive { medium_index, .. }
            | Self::FramerTxPublish { medium_index, .. }
            | Self::FramerTxRequest { medium_index, .. }
            | Self::FramerTxRespond { medium_index, .. }
            | Self::FramerRxMessageAccept { medium_index, .. }
            | Self::FramerRxServiceReceive { medium_index, .. } => *medium_index,
        }
    }
}

/// Per-error policy callback: `None` swallows, `Some(failure)` propagates.
pub type TransientErrorHandler =
    Box<dyn FnMut(&mut TransientErrorReport<'_>) -> Option<AnyFailure>>;
