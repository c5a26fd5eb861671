//! Node status publication
//!
//! Every Cyphal node with a node id must publish `node.Heartbeat.1.0` on its fixed
//! subject once per second. [`HeartbeatPublisher`] does that in the background: it owns
//! a message TX session and a repeating executor callback, and exposes a control handle
//! for the advertised status.

use alloc::rc::Rc;
use core::cell::Cell;

use polycyphal_core::{Priority, SubjectId, TransferId};
use polycyphal_media::time::{Duration, Instant};

use crate::error::AnyFailure;
use crate::executor::{Callback, SingleThreadExecutor};
use crate::session::{MessageTxParams, TransferMetadata};
use crate::transport::UdpTransport;

/// `node.Health.1.0`
///
/// Abstract component health information. If the node performs multiple activities,
/// its health status should reflect the status of the worst-performing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Health {
    /// The component is functioning properly (nominal).
    Nominal,
    /// A critical parameter went out of range or the component encountered a minor
    /// failure that does not prevent the subsystem from performing its functions.
    Advisory,
    /// The component encountered a major failure and is performing in a degraded mode.
    Caution,
    /// The component suffered a fatal malfunction and is unable to perform its
    /// intended function.
    Warning,
}

impl Health {
    const fn into_u8(self) -> u8 {
        match self {
            Health::Nominal => 0,
            Health::Advisory => 1,
            Health::Caution => 2,
            Health::Warning => 3,
        }
    }
}

/// `node.Mode.1.0`
///
/// The operating mode of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// Normal operating mode.
    Operational,
    /// Initialization is in progress; this mode is entered immediately after startup.
    Initialization,
    /// E.g., calibration, self-test, etc.
    Maintenance,
    /// New software/firmware is being loaded or the bootloader is running.
    SoftwareUpdate,
}

impl Mode {
    const fn into_u8(self) -> u8 {
        match self {
            Mode::Operational => 0,
            Mode::Initialization => 1,
            Mode::Maintenance => 2,
            Mode::SoftwareUpdate => 3,
        }
    }
}

/// The advertised status of this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeStatus {
    pub health: Health,
    pub mode: Mode,
    pub vendor_specific_code: u8,
}

impl Default for NodeStatus {
    fn default() -> Self {
        Self {
            health: Health::Nominal,
            mode: Mode::Operational,
            vendor_specific_code: 0,
        }
    }
}

/// `node.Heartbeat.1.0`
///
/// Abstract node status information; fixed size 7 bytes. This is the only high-level
/// function that shall be implemented by all nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Heartbeat {
    /// \[second\] Uptime counter; saturates at `u32::MAX` until the node restarts.
    pub uptime: u32,
    pub health: Health,
    pub mode: Mode,
    pub vendor_specific_status_code: u8,
}

impl Heartbeat {
    /// The fixed subject ID for this message type
    pub const SUBJECT: SubjectId = SubjectId::new(7509).unwrap();

    /// \[second\] The publication period shall not exceed this limit.
    pub const MAX_PUBLICATION_PERIOD: u16 = 1;

    /// \[second\] A node whose last heartbeat is older than this should be considered
    /// offline.
    pub const OFFLINE_TIMEOUT: u16 = 3;

    pub const SIZE: usize = 7;

    pub fn serialize(&self) -> [u8; Self::SIZE] {
        let uptime = self.uptime.to_le_bytes();
        [
            uptime[0],
            uptime[1],
            uptime[2],
            uptime[3],
            self.health.into_u8(),
            self.mode.into_u8(),
            self.vendor_specific_status_code,
        ]
    }
}

const PERIOD: Duration = Duration::from_secs(Heartbeat::MAX_PUBLICATION_PERIOD as u64);

/// Background heartbeat publication.
///
/// Publishing starts with the first executor spin after construction and repeats once
/// per second with sequentially advancing transfer ids. Dropping the publisher cancels
/// the callback and releases the TX session.
pub struct HeartbeatPublisher {
    status: Rc<Cell<NodeStatus>>,
    _callback: Callback,
}

impl HeartbeatPublisher {
    pub fn new(
        executor: &SingleThreadExecutor,
        transport: &UdpTransport,
    ) -> Result<Self, AnyFailure> {
        let session = transport.make_message_tx_session(MessageTxParams {
            subject_id: Heartbeat::SUBJECT,
        })?;

        let status = Rc::new(Cell::new(NodeStatus::default()));
        let started = executor.now();

        // The callback reschedules itself by id; the id is known only after
        // registration, hence the slot.
        let id_slot = Rc::new(Cell::new(0));
        let reschedule = executor.clone();
        let id_for_callback = id_slot.clone();
        let status_for_callback = status.clone();
        let mut transfer_id = TransferId::default();

        let callback = executor.register(move |now: Instant| {
            let uptime = u32::try_from((now - started).as_secs()).unwrap_or(u32::MAX);
            let current = status_for_callback.get();
            let message = Heartbeat {
                uptime,
                health: current.health,
                mode: current.mode,
                vendor_specific_status_code: current.vendor_specific_code,
            };
            let metadata = TransferMetadata {
                transfer_id,
                timestamp: now,
                priority: Priority::Nominal,
            };
            if session.send(&metadata, &[&message.serialize()]).is_ok() {
                transfer_id = transfer_id.next();
            } else {
                warn!("heartbeat publication failed");
            }
            reschedule.schedule_by_id(id_for_callback.get(), now + PERIOD);
        });
        id_slot.set(callback.id());
        executor.schedule_at(&callback, started);

        Ok(Self {
            status,
            _callback: callback,
        })
    }

    pub fn status(&self) -> NodeStatus {
        self.status.get()
    }

    pub fn set_status(&self, status: NodeStatus) {
        self.status.set(status);
    }
}
