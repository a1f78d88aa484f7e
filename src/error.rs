//! Error types for slotset.

use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while operating on a set.
///
/// Only allocation failures cross the API boundary: lookups of absent
/// values and erases of dead slots are no-ops, not errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The allocator refused to provide backing memory for the arena.
    #[error("arena allocation of {bytes} bytes failed")]
    OutOfMemory {
        /// Size of the allocation that was refused.
        bytes: usize,
    },

    /// The arena would exceed the maximum addressable size.
    ///
    /// Node links are signed 32-bit byte distances, which caps the arena
    /// at 2 GiB.
    #[error("arena capacity of {bytes} bytes exceeds the 2 GiB addressing limit")]
    CapacityExceeded {
        /// Capacity that was requested.
        bytes: u64,
    },
}
