//! # Polycyphal
//!
//! This library provides a Cyphal/UDP node runtime for single-threaded cooperative
//! systems: a transport that moves typed message and service transfers between nodes
//! over redundant UDP media, driven entirely by a time-triggered callback executor.
//! No dynamic payload memory is used beyond the caller-supplied allocator categories.
//!
//! ## Architecture
//!
//! ```text
//!  ┌──────────────────────┐   spin_once    ┌───────────────────────┐
//!  │ SingleThreadExecutor ├───────────────►│ UdpTransport::run     │
//!  └──────────────────────┘                │  TX drain ▸ RX pump   │
//!                                          └───┬───────────────▲───┘
//!       ┌───────────┐  send                    │               │
//!       │ TX session├────► per-medium TxQueue ─┘               │
//!       └───────────┘      (framer)                            │
//!       ┌───────────┐  on_receive   RxPort reassembly          │
//!       │ RX session│◄───────────── session tree lookup ◄──────┘
//!       └───────────┘
//!            ▲                    ┌───────┐ make_tx_socket / make_rx_socket
//!            └─ user callbacks    │ Media │◄─── lazily, per medium
//!                                 └───────┘
//! ```
//!
//! Components:
//! * _Executor_ schedules time-triggered callbacks; the embedder spins it in a hot
//!   loop or after a short sleep. Everything runs on that one thread.
//! * _Transport_ owns up to three redundant media. Each `run` tick drains every
//!   medium's TX queue first (transmission frees framer memory reassembly may need),
//!   then pumps every medium's RX socket.
//! * _TX sessions_ (publish, request, respond) serialize transfers into every medium's
//!   framer queue; per-frame deadlines derive from the metadata timestamp plus the
//!   session's send timeout.
//! * _RX sessions_ (subject, request, response) occupy a node in the transport's
//!   session tree and receive reassembled transfers through a synchronous callback.
//!   The framer deduplicates transfers arriving over redundant media by transfer id.
//! * _Media_ are embedder-provided socket factories; sockets are strictly non-blocking
//!   and materialized lazily. Per-medium faults route through a configurable
//!   transient-error policy and never stall the other media.
//!
//! ## Concurrency model
//!
//! Strictly single-threaded cooperative. No operation suspends or blocks; sockets
//! surface `WouldBlock` explicitly and the executor retries on later ticks. Sharing
//! any object of this crate across threads is not possible in safe Rust (`Rc` based),
//! which is the intended contract.
//!
//! # References:
//!
//! * \[1\] Cyphal Specification v1.0
//!   <https://opencyphal.org/specification/Cyphal_Specification.pdf>
#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub use polycyphal_core as core;
pub use polycyphal_media as media;
pub use polycyphal_media::time;

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod error;
pub mod executor;
pub mod framer;
pub mod node;
pub mod session;
mod session_tree;
pub mod transient;
pub mod transport;
