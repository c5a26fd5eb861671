//! Failure types shared across the media boundary
//!
//! Errors are values; no operation in the stack panics on a fallible path. The three base
//! kinds below cover everything a medium can report. Transports fold them, together with
//! framing-layer kinds, into their own failure sums.

/// An input argument is outside its admissible domain.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ArgumentError;

/// A caller-supplied memory resource declined an allocation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MemoryError;

/// An operating-system or hardware failure, carrying the platform-specific code
/// (e.g., `errno`).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PlatformError(pub i32);

/// Any failure a medium or one of its sockets can produce.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MediaFailure {
    Argument(ArgumentError),
    Memory(MemoryError),
    Platform(PlatformError),
}

impl From<ArgumentError> for MediaFailure {
    fn from(value: ArgumentError) -> Self {
        Self::Argument(value)
    }
}

impl From<MemoryError> for MediaFailure {
    fn from(value: MemoryError) -> Self {
        Self::Memory(value)
    }
}

impl From<PlatformError> for MediaFailure {
    fn from(value: PlatformError) -> Self {
        Self::Platform(value)
    }
}
