//! Runtime-wide failure sum
//!
//! The media boundary defines the base failure kinds; this module folds them together
//! with the framing layer's kinds into the one sum every fallible transport operation
//! reports.

pub use polycyphal_media::error::{ArgumentError, MediaFailure, MemoryError, PlatformError};

/// A TX queue would exceed its configured frame capacity.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CapacityError;

/// Any failure the transport, its media, or the framing layer can produce.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AnyFailure {
    Argument(ArgumentError),
    Memory(MemoryError),
    Platform(PlatformError),
    Capacity(CapacityError),
}

impl From<ArgumentError> for AnyFailure {
    fn from(value: ArgumentError) -> Self {
        Self::Argument(value)
    }
}

impl From<MemoryError> for AnyFailure {
    fn from(value: MemoryError) -> Self {
        Self::Memory(value)
    }
}

impl From<PlatformError> for AnyFailure {
    fn from(value: PlatformError) -> Self {
        Self::Platform(value)
    }
}

impl From<CapacityError> for AnyFailure {
    fn from(value: CapacityError) -> Self {
        Self::Capacity(value)
    }
}

impl From<MediaFailure> for AnyFailure {
    fn from(value: MediaFailure) -> Self {
        match value {
            MediaFailure::Argument(e) => Self::Argument(e),
            MediaFailure::Memory(e) => Self::Memory(e),
            MediaFailure::Platform(e) => Self::Platform(e),
        }
    }
}
