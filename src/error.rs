//! Error taxonomy for the arena resources.
//!
//! Capacity failures are recoverable values: the pool is left byte-identical
//! and can serve smaller requests immediately. A corrupt deallocation is a
//! programmer error and terminates instead of continuing on poisoned state.

use std::fmt;

use crate::logging::error;

/// Recoverable allocation failures.
///
/// Every variant leaves the pool state unchanged; the caller may retry with a
/// smaller request, free memory, or fall back to another allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The request can never fit a single arena.
    TooLargeRequest {
        /// Bytes the arena would have needed, including alignment slack.
        bytes_needed: usize,
        /// Usable bytes in one arena.
        bytes_available: usize,
    },
    /// The active arena is full and the free list is empty.
    ArenasExhausted {
        /// Total number of arenas in the pool, none of which had room.
        num_arenas: usize,
    },
    /// Rejected pool geometry: zero arenas, an arena size that is zero or not
    /// a multiple of [`MAX_ALIGN`](crate::MAX_ALIGN), or a total size that
    /// overflows.
    InvalidConstruction {
        num_arenas: usize,
        arena_size: usize,
    },
    /// The upstream byte-source refused the backing buffer at construction.
    UpstreamExhausted {
        bytes_needed: usize,
    },
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::TooLargeRequest { bytes_needed, bytes_available } => write!(
                f,
                "request of {bytes_needed} bytes exceeds the {bytes_available}-byte arena capacity"
            ),
            Self::ArenasExhausted { num_arenas } => {
                write!(f, "all {num_arenas} arenas are exhausted")
            }
            Self::InvalidConstruction { num_arenas, arena_size } => write!(
                f,
                "invalid pool geometry: {num_arenas} arenas of {arena_size} bytes \
                 (need at least one arena and a nonzero arena size divisible by {})",
                crate::MAX_ALIGN
            ),
            Self::UpstreamExhausted { bytes_needed } => {
                write!(f, "upstream byte-source could not supply {bytes_needed} bytes")
            }
        }
    }
}

impl std::error::Error for AllocError {}

/// Report a deallocation that does not belong to the pool and terminate.
///
/// Reached on a double free, a foreign pointer, or an address past the pool
/// bounds. The caller's program has already invoked undefined behavior from
/// the allocator's point of view; refusing to continue is the only safe
/// answer.
#[cold]
pub(crate) fn corrupt_deallocation(address: *mut u8, bytes: usize, align: usize) -> ! {
    error!(
        target: "multiarena",
        address = ?address,
        bytes,
        align,
        "deallocation does not match any live allocation"
    );
    panic!(
        "corrupt deallocation: {address:?} (bytes={bytes}, align={align}) \
         was not allocated from this pool"
    );
}
