//! Cyphal/UDP framing layer
//!
//! The transport consumes this layer through a narrow surface: push a transfer into a
//! per-medium [`tx_queue::TxQueue`], pop ready frames from it, and feed received
//! datagrams into per-port [`rx::RxPort`] reassembly. The wire codec lives in
//! [`format`]; the transport core itself never parses bytes.

pub mod format;
pub mod rx;
pub mod tx_queue;
