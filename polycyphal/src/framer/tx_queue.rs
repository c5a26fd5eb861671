//! Per-medium transmission queue
//!
//! Frames are ordered by priority first and FIFO within one priority, so fragments of a
//! single transfer stay contiguous in their priority class. Each frame is a ready-to-send
//! datagram: header stamped, payload chunk copied, destination and DSCP resolved. The
//! queue owns the datagram buffers (`fragment` memory category) until they are popped or
//! dropped.

use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::vec::Vec;

use polycyphal_core::{NodeId, Priority, PrioritySet, ServiceId, SubjectId, TransferId};
use polycyphal_media::endpoint::IpEndpoint;
use polycyphal_media::memory::{MemoryBuffer, MemoryResource};
use polycyphal_media::socket::DEFAULT_MTU;
use polycyphal_media::time::Instant;

use crate::error::{AnyFailure, ArgumentError, CapacityError, MemoryError};
use crate::framer::format::{DataSpecifier, Header, TRANSFER_CRC_SIZE, TransferCrc};

const PRIORITY_LEVEL_COUNT: usize = Priority::MAX.into_u8() as usize + 1;

/// Discriminates what a transfer is and where it goes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxMetadata {
    Publish {
        priority: Priority,
        subject_id: SubjectId,
        transfer_id: TransferId,
    },
    Request {
        priority: Priority,
        service_id: ServiceId,
        server_node_id: NodeId,
        transfer_id: TransferId,
    },
    Respond {
        priority: Priority,
        service_id: ServiceId,
        client_node_id: NodeId,
        transfer_id: TransferId,
    },
}

impl TxMetadata {
    pub fn priority(&self) -> Priority {
        match *self {
            TxMetadata::Publish { priority, .. }
            | TxMetadata::Request { priority, .. }
            | TxMetadata::Respond { priority, .. } => priority,
        }
    }

    fn transfer_id(&self) -> TransferId {
        match *self {
            TxMetadata::Publish { transfer_id, .. }
            | TxMetadata::Request { transfer_id, .. }
            | TxMetadata::Respond { transfer_id, .. } => transfer_id,
        }
    }

    fn data_spec(&self) -> DataSpecifier {
        match *self {
            TxMetadata::Publish { subject_id, .. } => DataSpecifier::Message(subject_id),
            TxMetadata::Request { service_id, .. } => DataSpecifier::Request(service_id),
            TxMetadata::Respond { service_id, .. } => DataSpecifier::Response(service_id),
        }
    }

    fn destination_node(&self) -> Option<NodeId> {
        match *self {
            TxMetadata::Publish { .. } => None,
            TxMetadata::Request { server_node_id, .. } => Some(server_node_id),
            TxMetadata::Respond { client_node_id, .. } => Some(client_node_id),
        }
    }

    fn destination_endpoint(&self) -> IpEndpoint {
        match *self {
            TxMetadata::Publish { subject_id, .. } => IpEndpoint::for_message(subject_id),
            TxMetadata::Request { server_node_id, .. } => IpEndpoint::for_service(server_node_id),
            TxMetadata::Respond { client_node_id, .. } => IpEndpoint::for_service(client_node_id),
        }
    }

    fn is_service(&self) -> bool {
        !matches!(self, TxMetadata::Publish { .. })
    }
}

/// One queued datagram, ready for submission to a TX socket.
#[derive(Debug)]
pub struct TxQueueItem {
    pub deadline: Instant,
    pub destination: IpEndpoint,
    pub dscp: u8,
    pub datagram: MemoryBuffer,
    /// Groups the fragments of one logical transfer for whole-transfer removal.
    marker: u64,
}

/// Priority-then-FIFO bounded frame queue of one medium.
pub struct TxQueue {
    mtu: usize,
    capacity: usize,
    len: usize,
    queues: [VecDeque<TxQueueItem>; PRIORITY_LEVEL_COUNT],
    occupancy: PrioritySet,
    next_marker: u64,
    dscp_value_per_priority: [u8; PRIORITY_LEVEL_COUNT],
}

impl TxQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            mtu: DEFAULT_MTU,
            capacity,
            len: 0,
            queues: [const { VecDeque::new() }; PRIORITY_LEVEL_COUNT],
            occupancy: PrioritySet::NONE,
            next_marker: 0,
            dscp_value_per_priority: [0; PRIORITY_LEVEL_COUNT],
        }
    }

    /// Adopts the MTU of the medium's TX socket. Affects subsequent pushes only.
    pub fn set_mtu(&mut self, mtu: usize) {
        if mtu > 0 {
            self.mtu = mtu;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Fragments a transfer into datagrams and enqueues all of them, or nothing.
    ///
    /// Service transfers require a local node id. Anonymous publications must fit a
    /// single frame.
    pub fn push(
        &mut self,
        deadline: Instant,
        metadata: &TxMetadata,
        source: Option<NodeId>,
        payload: &[u8],
        fragment_memory: &Rc<dyn MemoryResource>,
    ) -> Result<(), AnyFailure> {
        if metadata.is_service() && source.is_none() {
            return Err(ArgumentError.into());
        }

        let single_frame = payload.len() <= self.mtu;
        if source.is_none() && !single_frame {
            return Err(ArgumentError.into());
        }

        let total = if single_frame {
            payload.len()
        } else {
            payload.len() + TRANSFER_CRC_SIZE
        };
        let frame_count = total.div_ceil(self.mtu).max(1);
        if self.len + frame_count > self.capacity {
            return Err(CapacityError.into());
        }

        let frames = self.build_frames(deadline, metadata, source, payload, fragment_memory)?;
        debug_assert_eq!(frames.len(), frame_count);

        let priority = metadata.priority();
        self.len += frames.len();
        self.queues[usize::from(priority)].extend(frames);
        self.occupancy.insert(priority);
        self.next_marker = self.next_marker.wrapping_add(1);
        Ok(())
    }

    // Materializes every datagram before touching the queue, so a mid-way allocation
    // failure leaves the queue untouched.
    fn build_frames(
        &self,
        deadline: Instant,
        metadata: &TxMetadata,
        source: Option<NodeId>,
        payload: &[u8],
        fragment_memory: &Rc<dyn MemoryResource>,
    ) -> Result<Vec<TxQueueItem>, MemoryError> {
        let priority = metadata.priority();
        let destination = metadata.destination_endpoint();
        let dscp = self.dscp_value_per_priority[usize::from(priority)];
        let single_frame = payload.len() <= self.mtu;

        let mut trailer = [0u8; TRANSFER_CRC_SIZE];
        if !single_frame {
            let mut crc = TransferCrc::default();
            crc.add_bytes(payload);
            trailer = crc.get().to_le_bytes();
        }
        // The fragmented stream is the payload followed by its CRC trailer.
        let stream_len = if single_frame {
            payload.len()
        } else {
            payload.len() + TRANSFER_CRC_SIZE
        };

        let mut frames = Vec::new();
        let mut offset = 0usize;
        let mut frame_index = 0u32;
        loop {
            let chunk_len = self.mtu.min(stream_len - offset);
            let header = Header {
                priority,
                data_spec: metadata.data_spec(),
                source,
                destination: metadata.destination_node(),
                transfer_id: metadata.transfer_id(),
                frame_index,
                end_of_transfer: offset + chunk_len == stream_len,
            }
            .serialize();

            let mut datagram =
                MemoryBuffer::allocate(fragment_memory, header.len() + chunk_len)?;
            datagram[..header.len()].copy_from_slice(&header);
            for (slot, position) in datagram[header.len()..]
                .iter_mut()
                .zip(offset..offset + chunk_len)
            {
                *slot = if position < payload.len() {
                    payload[position]
                } else {
                    trailer[position - payload.len()]
                };
            }

            frames.push(TxQueueItem {
                deadline,
                destination,
                dscp,
                datagram,
                marker: self.next_marker,
            });

            offset += chunk_len;
            if offset >= stream_len {
                break;
            }
            frame_index += 1;
        }
        Ok(frames)
    }

    /// The next frame to transmit: highest priority first, FIFO within one priority.
    pub fn peek(&self) -> Option<&TxQueueItem> {
        let priority = self.occupancy.first()?;
        self.queues[usize::from(priority)].front()
    }

    /// Removes the head frame only.
    pub fn pop_frame(&mut self) -> Option<TxQueueItem> {
        let priority = self.occupancy.first()?;
        let queue = &mut self.queues[usize::from(priority)];
        let item = queue.pop_front();
        if item.is_some() {
            self.len -= 1;
        }
        if queue.is_empty() {
            self.occupancy.remove(priority);
        }
        item
    }

    /// Removes the head frame together with every following fragment of the same
    /// logical transfer. Returns the number of frames dropped.
    pub fn drop_head_transfer(&mut self) -> usize {
        let Some(priority) = self.occupancy.first() else {
            return 0;
        };
        let queue = &mut self.queues[usize::from(priority)];
        let Some(head) = queue.front() else {
            return 0;
        };

        let marker = head.marker;
        let mut dropped = 0;
        while queue.front().is_some_and(|item| item.marker == marker) {
            queue.pop_front();
            dropped += 1;
        }
        self.len -= dropped;
        if queue.is_empty() {
            self.occupancy.remove(priority);
        }
        dropped
    }

    /// Drops every queued frame. Used on transport teardown.
    pub fn flush(&mut self) {
        for queue in &mut self.queues {
            queue.clear();
        }
        self.occupancy = PrioritySet::NONE;
        self.len = 0;
    }
}
