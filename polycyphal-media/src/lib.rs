//! Polycyphal media interface
//!
//! The crate provides the interface between network media drivers and the Polycyphal stack.
//! Limited scope facilitates compatibility across versions.
//! Media crates should depend on this crate. Polycyphal stack users should depend on
//! the `polycyphal` crate instead.
//!
//! A medium is one of up to several redundant network interfaces a transport sends and
//! receives through simultaneously. The stack never opens sockets by itself; it asks the
//! medium for them on first need:
//! * `Media::make_tx_socket` produces the datagram transmitter
//! * `Media::make_rx_socket` produces the datagram receiver bound to a given endpoint
//!
//! Both factories and both socket operations are fallible with transient semantics: a
//! failure affects one medium on one tick, and the stack retries or consults its
//! transient-error policy without losing progress on the other media.
//!
//! Sockets are strictly non-blocking. A transmitter that cannot take a datagram right now
//! reports `WouldBlock`, which is not an error; the stack keeps the frame queued and
//! retries on the next tick. A receiver with nothing pending yields `None`.
//!
//! Received payload buffers are allocated by the driver from the `payload` memory
//! category and travel with their deleter (see [`memory::MemoryBuffer`]), so ownership
//! can cross the stack boundary and be released from anywhere.

#![no_std]

extern crate alloc;

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod endpoint;
pub mod error;
pub mod memory;
pub mod socket;

pub mod time {
    pub use embassy_time::{Duration, Instant};
}
