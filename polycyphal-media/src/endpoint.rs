//! UDP endpoint addressing
//!
//! Cyphal/UDP maps ports onto fixed IPv4 multicast groups, so no discovery protocol is
//! needed: every participant derives the same endpoints from subject and node identifiers.

use polycyphal_core::{NodeId, SubjectId};

/// The fixed UDP port shared by all Cyphal/UDP traffic.
pub const CYPHAL_UDP_PORT: u16 = 9382;

const MESSAGE_GROUP_PREFIX: u32 = 0xef00_0000;
const SERVICE_GROUP_PREFIX: u32 = 0xef01_0000;

/// An IPv4 address and UDP port pair.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IpEndpoint {
    /// IPv4 address in host byte order.
    pub address: u32,
    pub port: u16,
}

impl IpEndpoint {
    pub const fn new(address: u32, port: u16) -> Self {
        Self { address, port }
    }

    /// The multicast group a subject is published to: `239.0.S/8.S&0xff`.
    pub const fn for_message(subject: SubjectId) -> Self {
        Self {
            address: MESSAGE_GROUP_PREFIX | subject.into_u16() as u32,
            port: CYPHAL_UDP_PORT,
        }
    }

    /// The multicast group a node receives service transfers at: `239.1.N/8.N&0xff`.
    pub const fn for_service(node: NodeId) -> Self {
        Self {
            address: SERVICE_GROUP_PREFIX | node.into_u16() as u32,
            port: CYPHAL_UDP_PORT,
        }
    }
}
