//! Cyphal/UDP wire header codec and checksums
//!
//! Every datagram starts with a fixed 24-byte header; little-endian fields throughout.
//! Multi-frame transfers append a CRC-32C of the whole transfer payload after the last
//! fragment. Single-frame transfers carry no transfer CRC.

use polycyphal_core::{NodeId, Priority, ServiceId, SubjectId, TransferId};

pub const HEADER_SIZE: usize = 24;
pub const HEADER_VERSION: u8 = 1;
pub const TRANSFER_CRC_SIZE: usize = 4;

const NODE_ID_UNSET: u16 = 0xffff;
const DATA_SPEC_SERVICE: u16 = 0x8000;
const DATA_SPEC_REQUEST: u16 = 0x4000;
const END_OF_TRANSFER: u32 = 0x8000_0000;

/// Encodes the semantic properties of the data type carried by a transfer and its kind
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataSpecifier {
    Message(SubjectId),
    Request(ServiceId),
    Response(ServiceId),
}

impl DataSpecifier {
    fn into_u16(self) -> u16 {
        match self {
            DataSpecifier::Message(subject) => subject.into_u16(),
            DataSpecifier::Request(service) => {
                service.into_u16() | DATA_SPEC_SERVICE | DATA_SPEC_REQUEST
            }
            DataSpecifier::Response(service) => service.into_u16() | DATA_SPEC_SERVICE,
        }
    }

    fn try_from_u16(value: u16) -> Option<Self> {
        if value & DATA_SPEC_SERVICE == 0 {
            let subject = SubjectId::new(value)?;
            Some(DataSpecifier::Message(subject))
        } else {
            let service = ServiceId::new(value & !(DATA_SPEC_SERVICE | DATA_SPEC_REQUEST))?;
            if value & DATA_SPEC_REQUEST != 0 {
                Some(DataSpecifier::Request(service))
            } else {
                Some(DataSpecifier::Response(service))
            }
        }
    }
}

/// One datagram's frame header
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Header {
    pub priority: Priority,
    pub data_spec: DataSpecifier,
    /// `None` for anonymous publishers.
    pub source: Option<NodeId>,
    /// `None` for messages (broadcast), `Some` for service transfers.
    pub destination: Option<NodeId>,
    pub transfer_id: TransferId,
    pub frame_index: u32,
    pub end_of_transfer: bool,
}

impl Header {
    pub fn serialize(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0] = HEADER_VERSION;
        bytes[1] = self.priority.into_u8();
        bytes[2..4].copy_from_slice(&node_to_u16(self.source).to_le_bytes());
        bytes[4..6].copy_from_slice(&node_to_u16(self.destination).to_le_bytes());
        bytes[6..8].copy_from_slice(&self.data_spec.into_u16().to_le_bytes());
        bytes[8..16].copy_from_slice(&self.transfer_id.into_u64().to_le_bytes());
        let index_eot = (self.frame_index & !END_OF_TRANSFER)
            | if self.end_of_transfer { END_OF_TRANSFER } else { 0 };
        bytes[16..20].copy_from_slice(&index_eot.to_le_bytes());
        // bytes 20..22 are opaque user data, transmitted as zero
        let mut crc = HeaderCrc::default();
        crc.add_bytes(&bytes[..22]);
        bytes[22..24].copy_from_slice(&crc.get().to_le_bytes());
        bytes
    }

    /// Parses and validates a header. Malformed datagrams yield `None` and are dropped
    /// silently by the dispatcher.
    pub fn parse(datagram: &[u8]) -> Option<Header> {
        if datagram.len() < HEADER_SIZE {
            return None;
        }
        if datagram[0] != HEADER_VERSION {
            return None;
        }

        let mut crc = HeaderCrc::default();
        crc.add_bytes(&datagram[..22]);
        if crc.get() != u16::from_le_bytes([datagram[22], datagram[23]]) {
            return None;
        }

        let priority = Priority::try_from_u8(datagram[1])?;
        let source = node_from_u16(u16::from_le_bytes([datagram[2], datagram[3]]));
        let destination = node_from_u16(u16::from_le_bytes([datagram[4], datagram[5]]));
        let data_spec =
            DataSpecifier::try_from_u16(u16::from_le_bytes([datagram[6], datagram[7]]))?;
        let transfer_id = TransferId::new(u64::from_le_bytes(
            datagram[8..16].try_into().ok()?,
        ));
        let index_eot = u32::from_le_bytes(datagram[16..20].try_into().ok()?);

        Some(Header {
            priority,
            data_spec,
            source,
            destination,
            transfer_id,
            frame_index: index_eot & !END_OF_TRANSFER,
            end_of_transfer: index_eot & END_OF_TRANSFER != 0,
        })
    }
}

fn node_to_u16(node: Option<NodeId>) -> u16 {
    node.map_or(NODE_ID_UNSET, NodeId::into_u16)
}

fn node_from_u16(value: u16) -> Option<NodeId> {
    NodeId::new(value)
}

/// CRC-16/CCITT-FALSE protecting the frame header
#[derive(Debug, Clone, Copy)]
pub struct HeaderCrc(u16);

impl Default for HeaderCrc {
    fn default() -> Self {
        Self(Self::INIT_VALUE)
    }
}

impl HeaderCrc {
    const INIT_VALUE: u16 = 0xffff;
    const POLYNOMIAL: u16 = 0x1021;

    pub fn add(&mut self, byte: u8) {
        self.0 ^= u16::from(byte) << 8;
        for _bit in 0..8 {
            if (self.0 & 0x8000) != 0 {
                self.0 = (self.0 << 1) ^ Self::POLYNOMIAL;
            } else {
                self.0 <<= 1;
            }
        }
    }

    pub fn add_bytes(&mut self, bytes: &[u8]) {
        bytes.iter().for_each(|&byte| self.add(byte));
    }

    pub fn get(&self) -> u16 {
        self.0
    }
}

/// CRC-32C (Castagnoli) protecting multi-frame transfer payloads
#[derive(Debug, Clone, Copy)]
pub struct TransferCrc(u32);

impl Default for TransferCrc {
    fn default() -> Self {
        Self(Self::INIT_VALUE)
    }
}

impl TransferCrc {
    const INIT_VALUE: u32 = 0xffff_ffff;
    const POLYNOMIAL: u32 = 0x82f6_3b78;
    const OUTPUT_XOR: u32 = 0xffff_ffff;

    pub fn add(&mut self, byte: u8) {
        self.0 ^= u32::from(byte);
        for _bit in 0..8 {
            if (self.0 & 0x1) != 0 {
                self.0 = (self.0 >> 1) ^ Self::POLYNOMIAL;
            } else {
                self.0 >>= 1;
            }
        }
    }

    pub fn add_bytes(&mut self, bytes: &[u8]) {
        bytes.iter().for_each(|&byte| self.add(byte));
    }

    pub fn get(&self) -> u32 {
        self.0 ^ Self::OUTPUT_XOR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_crc_check_value() {
        let mut crc = HeaderCrc::default();
        crc.add_bytes(b"123456789");
        assert_eq!(crc.get(), 0x29b1);
    }

    #[test]
    fn test_transfer_crc_check_value() {
        let mut crc = TransferCrc::default();
        crc.add_bytes(b"123456789");
        assert_eq!(crc.get(), 0xe306_9283);
    }

    #[test]
    fn test_header_round_trip() {
        let header = Header {
            priority: Priority::Fast,
            data_spec: DataSpecifier::Request(ServiceId::new(0x123).unwrap()),
            source: Some(NodeId::new(0x1a2b).unwrap()),
            destination: Some(NodeId::new(42).unwrap()),
            transfer_id: TransferId::new(0x0102_0304_0506_0708),
            frame_index: 3,
            end_of_transfer: true,
        };
        let bytes = header.serialize();
        assert_eq!(Header::parse(&bytes), Some(header));
    }

    #[test]
    fn test_header_anonymous_message() {
        let header = Header {
            priority: Priority::Nominal,
            data_spec: DataSpecifier::Message(SubjectId::new(7509).unwrap()),
            source: None,
            destination: None,
            transfer_id: TransferId::new(7),
            frame_index: 0,
            end_of_transfer: true,
        };
        let bytes = header.serialize();
        let parsed = Header::parse(&bytes).unwrap();
        assert_eq!(parsed.source, None);
        assert_eq!(parsed.destination, None);
    }

    #[test]
    fn test_header_rejects_corruption() {
        let header = Header {
            priority: Priority::Nominal,
            data_spec: DataSpecifier::Message(SubjectId::new(10).unwrap()),
            source: Some(NodeId::new(1).unwrap()),
            destination: None,
            transfer_id: TransferId::new(0),
            frame_index: 0,
            end_of_transfer: true,
        };
        let mut bytes = header.serialize();
        bytes[9] ^= 0x40;
        assert_eq!(Header::parse(&bytes), None);

        let bytes = header.serialize();
        assert_eq!(Header::parse(&bytes[..HEADER_SIZE - 1]), None);
    }

    #[test]
    fn test_header_rejects_foreign_version() {
        let header = Header {
            priority: Priority::Nominal,
            data_spec: DataSpecifier::Message(SubjectId::new(10).unwrap()),
            source: None,
            destination: None,
            transfer_id: TransferId::new(0),
            frame_index: 0,
            end_of_transfer: true,
        };
        let mut bytes = header.serialize();
        bytes[0] = 2;
        assert_eq!(Header::parse(&bytes), None);
    }
}
