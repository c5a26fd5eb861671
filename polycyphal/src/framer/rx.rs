//! Per-port transfer reassembly
//!
//! An `RxPort` owns the receive state of one subject or service port: one session per
//! remote node, each tracking the last accepted transfer id and at most one in-flight
//! multi-frame reassembly. Frames must arrive in index order within one transfer; the
//! in-flight transfer is pinned to the medium that started it, and a fresher transfer
//! (greater transfer id) may preempt it from any medium. Completed transfers are
//! deduplicated across redundant media by the monotonic 64-bit transfer id, relaxed by
//! the transfer-id timeout so a restarted remote node is not silenced forever.
//!
//! Reassembled payload bytes accumulate in a buffer from the `session` memory category,
//! bounded by the port extent. Payload bytes beyond the extent still feed the transfer
//! CRC but are not stored.

use alloc::collections::BTreeMap;
use alloc::rc::Rc;

use polycyphal_core::{NodeId, Priority, TransferId};
use polycyphal_media::memory::{MemoryBuffer, MemoryResource};
use polycyphal_media::time::{Duration, Instant};

use crate::error::MemoryError;
use crate::framer::format::{Header, TRANSFER_CRC_SIZE, TransferCrc};

/// Default session continuity horizon; transfers older than this restart the id sequence.
pub const DEFAULT_TRANSFER_ID_TIMEOUT: Duration = Duration::from_secs(2);

/// Metadata of a completed transfer, as observed on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RxTransferMetadata {
    /// Reception instant of the frame that completed the transfer.
    pub timestamp: Instant,
    pub priority: Priority,
    /// `None` for anonymous publishers.
    pub source: Option<NodeId>,
    pub transfer_id: TransferId,
}

/// A reassembled transfer. The payload buffer is owned by the receiver until released.
#[derive(Debug)]
pub struct RxTransfer {
    pub metadata: RxTransferMetadata,
    pub payload: MemoryBuffer,
}

/// Receive state of one subject or service port.
pub struct RxPort {
    extent: usize,
    transfer_id_timeout: Duration,
    session_memory: Rc<dyn MemoryResource>,
    sessions: BTreeMap<u16, SessionState>,
}

impl RxPort {
    pub fn new(extent: usize, session_memory: Rc<dyn MemoryResource>) -> Self {
        Self {
            extent,
            transfer_id_timeout: DEFAULT_TRANSFER_ID_TIMEOUT,
            session_memory,
            sessions: BTreeMap::new(),
        }
    }

    pub fn set_transfer_id_timeout(&mut self, timeout: Duration) {
        self.transfer_id_timeout = timeout;
    }

    /// Feeds one already-validated frame into the port.
    ///
    /// Returns the completed transfer when this frame finishes one. A `MemoryError`
    /// means the session buffer could not be allocated; the frame is lost but the port
    /// stays consistent.
    pub fn accept(
        &mut self,
        timestamp: Instant,
        header: &Header,
        frame_payload: &[u8],
        medium_index: u8,
    ) -> Result<Option<RxTransfer>, MemoryError> {
        let Some(source) = header.source else {
            return self.accept_anonymous(timestamp, header, frame_payload);
        };

        let timeout = self.transfer_id_timeout;
        let extent = self.extent;
        let session_memory = self.session_memory.clone();
        let state = self.sessions.entry(source.into_u16()).or_default();

        if header.frame_index == 0 {
            if !state.is_fresh(header.transfer_id, timestamp, timeout) {
                return Ok(None);
            }

            if header.end_of_transfer {
                // Single-frame transfer: no trailing CRC on the wire.
                state.inflight = None;
                let mut payload = MemoryBuffer::allocate(
                    &session_memory,
                    frame_payload.len().min(extent),
                )?;
                let stored = payload.len();
                payload.copy_from_slice(&frame_payload[..stored]);
                state.mark_accepted(header.transfer_id, timestamp);
                return Ok(Some(RxTransfer {
                    metadata: RxTransferMetadata {
                        timestamp,
                        priority: header.priority,
                        source: header.source,
                        transfer_id: header.transfer_id,
                    },
                    payload,
                }));
            }

            // A fresher transfer preempts an in-flight one from any medium; the same
            // medium may always restart.
            let may_start = match &state.inflight {
                None => true,
                Some(inflight) => {
                    inflight.medium_index == medium_index
                        || header.transfer_id > inflight.transfer_id
                }
            };
            if !may_start {
                return Ok(None);
            }

            let buffer =
                MemoryBuffer::allocate(&session_memory, extent + TRANSFER_CRC_SIZE)?;
            let mut reassembly = Reassembly {
                transfer_id: header.transfer_id,
                priority: header.priority,
                medium_index,
                next_frame_index: 1,
                buffer,
                written: 0,
                total: 0,
                window: CrcWindow::default(),
            };
            reassembly.absorb(frame_payload);
            state.inflight = Some(reassembly);
            return Ok(None);
        }

        // Continuation frame: must extend the pinned in-flight transfer in order.
        let Some(inflight) = state.inflight.as_mut() else {
            return Ok(None);
        };
        if inflight.medium_index != medium_index || inflight.transfer_id != header.transfer_id {
            return Ok(None);
        }
        if inflight.next_frame_index != header.frame_index {
            // A frame was lost; the rest of the transfer is undecodable.
            state.inflight = None;
            return Ok(None);
        }

        inflight.absorb(frame_payload);
        inflight.next_frame_index += 1;
        if !header.end_of_transfer {
            return Ok(None);
        }

        let reassembly = unwrap!(state.inflight.take());
        let priority = reassembly.priority;
        let Some(payload) = reassembly.finalize(extent) else {
            return Ok(None);
        };
        if !state.is_fresh(header.transfer_id, timestamp, timeout) {
            return Ok(None);
        }
        state.mark_accepted(header.transfer_id, timestamp);
        Ok(Some(RxTransfer {
            metadata: RxTransferMetadata {
                timestamp,
                priority,
                source: header.source,
                transfer_id: header.transfer_id,
            },
            payload,
        }))
    }

    fn accept_anonymous(
        &mut self,
        timestamp: Instant,
        header: &Header,
        frame_payload: &[u8],
    ) -> Result<Option<RxTransfer>, MemoryError> {
        // Anonymous publishers cannot maintain a session; only single-frame transfers
        // are decodable and duplicates are not suppressed.
        if header.frame_index != 0 || !header.end_of_transfer {
            return Ok(None);
        }
        let mut payload = MemoryBuffer::allocate(
            &self.session_memory,
            frame_payload.len().min(self.extent),
        )?;
        let stored = payload.len();
        payload.copy_from_slice(&frame_payload[..stored]);
        Ok(Some(RxTransfer {
            metadata: RxTransferMetadata {
                timestamp,
                priority: header.priority,
                source: None,
                transfer_id: header.transfer_id,
            },
            payload,
        }))
    }
}

#[derive(Default)]
struct SessionState {
    last_accepted: Option<(TransferId, Instant)>,
    inflight: Option<Reassembly>,
}

impl SessionState {
    // Monotonic 64-bit ids make "greater than last" the duplicate test; the timeout
    // re-opens the session after the remote node restarts its id sequence.
    fn is_fresh(&self, transfer_id: TransferId, timestamp: Instant, timeout: Duration) -> bool {
        match self.last_accepted {
            None => true,
            Some((last_id, last_ts)) => {
                transfer_id > last_id
                    || timestamp
                        .checked_duration_since(last_ts)
                        .is_some_and(|elapsed| elapsed > timeout)
            }
        }
    }

    fn mark_accepted(&mut self, transfer_id: TransferId, timestamp: Instant) {
        self.last_accepted = Some((transfer_id, timestamp));
    }
}

struct Reassembly {
    transfer_id: TransferId,
    priority: Priority,
    medium_index: u8,
    next_frame_index: u32,
    buffer: MemoryBuffer,
    written: usize,
    total: usize,
    window: CrcWindow,
}

impl Reassembly {
    fn absorb(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if let Some(settled) = self.window.push(byte) {
                if self.written < self.buffer.capacity() {
                    self.buffer[self.written] = settled;
                    self.written += 1;
                }
            }
            self.total += 1;
        }
    }

    // Consumes the reassembly; `None` means the transfer CRC did not check out or the
    // stream was too short to carry one.
    fn finalize(mut self, extent: usize) -> Option<MemoryBuffer> {
        if self.total < TRANSFER_CRC_SIZE || !self.window.matches_crc() {
            return None;
        }
        let payload_len = self.total - TRANSFER_CRC_SIZE;
        self.buffer.truncate(payload_len.min(extent));
        Some(self.buffer)
    }
}

// Delays CRC accumulation by four bytes so the trailing transfer CRC can be separated
// from the payload without knowing the stream length up front.
#[derive(Default)]
struct CrcWindow {
    crc: TransferCrc,
    pending: [u8; TRANSFER_CRC_SIZE],
    pending_len: usize,
}

impl CrcWindow {
    // Returns the byte that settled out of the window into the payload, if any.
    fn push(&mut self, byte: u8) -> Option<u8> {
        if self.pending_len < TRANSFER_CRC_SIZE {
            self.pending[self.pending_len] = byte;
            self.pending_len += 1;
            return None;
        }
        let settled = self.pending[0];
        self.pending.rotate_left(1);
        self.pending[TRANSFER_CRC_SIZE - 1] = byte;
        self.crc.add(settled);
        Some(settled)
    }

    fn matches_crc(&self) -> bool {
        self.pending_len == TRANSFER_CRC_SIZE && self.pending == self.crc.get().to_le_bytes()
    }
}
