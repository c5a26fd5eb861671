//! Media and socket capability traits
//!
//! A transport owns up to several redundant media. Each medium is a socket factory;
//! the sockets themselves move single datagrams without blocking. All three traits are
//! object-safe so media implementations can be registered dynamically.

use alloc::boxed::Box;

use crate::endpoint::IpEndpoint;
use crate::error::MediaFailure;
use crate::memory::MemoryBuffer;
use crate::time::Instant;

/// Default maximum number of Cyphal payload bytes per datagram, wire header excluded.
///
/// Derived from the standard 1500-byte Ethernet MTU less IP/UDP overhead and the
/// 24-byte Cyphal header.
pub const DEFAULT_MTU: usize = 1408;

/// Outcome of a datagram submission that did not fail.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SendStatus {
    /// The datagram was taken by the medium.
    Accepted,
    /// The medium cannot take a datagram right now. Not an error: keep the datagram
    /// queued and retry later.
    WouldBlock,
}

/// A received datagram and the instant it arrived.
#[derive(Debug)]
pub struct RxDatagram {
    pub timestamp: Instant,
    /// Must be allocated from the `payload` memory category; the deleter travels
    /// inside the buffer.
    pub payload: MemoryBuffer,
}

/// Non-blocking datagram transmitter of one medium.
pub trait TxSocket {
    /// Maximum number of Cyphal payload bytes this socket can carry per datagram,
    /// wire header excluded.
    fn mtu(&self) -> usize {
        DEFAULT_MTU
    }

    /// Submits a single datagram.
    ///
    /// The deadline is advisory: the socket may use it for internal queue management,
    /// and exceeding it is not an error. The caller enforces expiry separately.
    fn send(
        &mut self,
        deadline: Instant,
        destination: IpEndpoint,
        dscp: u8,
        datagram: &[u8],
    ) -> Result<SendStatus, MediaFailure>;
}

/// Non-blocking datagram receiver of one medium.
pub trait RxSocket {
    /// Fetches the next pending datagram, or `None` when nothing is pending.
    ///
    /// Ownership of the payload buffer transfers to the caller.
    fn receive(&mut self) -> Result<Option<RxDatagram>, MediaFailure>;
}

/// One redundant network interface.
///
/// Socket construction is deferred until the transport first needs the socket, and is
/// retried on every tick after a transient failure.
pub trait Media {
    fn make_tx_socket(&mut self) -> Result<Box<dyn TxSocket>, MediaFailure>;

    fn make_rx_socket(&mut self, endpoint: IpEndpoint) -> Result<Box<dyn RxSocket>, MediaFailure>;
}
