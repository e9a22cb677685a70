//! Logging utilities for the arena resources.
//!
//! Uses `tracing` for structured logging with minimal overhead: `trace!` on
//! the allocation hot path, `debug!` on arena transitions, `error!` before a
//! corruption panic.

// Re-export tracing macros for use throughout the crate
pub use tracing::{debug, error, trace, warn};

/// Initialize logging with sensible defaults.
///
/// Honors `RUST_LOG` when set; otherwise enables `multiarena=info`
/// (`multiarena=debug` in debug builds). Safe to call more than once; later
/// calls are ignored.
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        #[cfg(debug_assertions)]
        {
            EnvFilter::new("multiarena=debug")
        }
        #[cfg(not(debug_assertions))]
        {
            EnvFilter::new("multiarena=info")
        }
    });

    fmt()
        .with_env_filter(filter)
        .compact()
        .try_init()
        .ok(); // Ignore error if already initialized
}

/// Log an allocation event
#[inline]
pub fn log_allocation(bytes: usize, align: usize, ptr: *const u8) {
    trace!(
        target: "multiarena",
        bytes,
        align,
        ptr = ?ptr,
        "allocated block"
    );
}

/// Log a deallocation event
#[inline]
pub fn log_deallocation(bytes: usize, ptr: *const u8) {
    trace!(
        target: "multiarena",
        bytes,
        ptr = ?ptr,
        "deallocated block"
    );
}

/// Log an arena transition: the active arena overflowed and a free arena was
/// promoted in its place.
#[inline]
pub fn log_arena_swap(displaced: u32, promoted: u32) {
    debug!(
        target: "multiarena",
        displaced,
        promoted,
        "active arena swapped"
    );
}

/// Log an arena returning to the free list after draining.
#[inline]
pub fn log_arena_recycled(arena: u32) {
    debug!(
        target: "multiarena",
        arena,
        "drained arena recycled"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_helpers_do_not_panic() {
        log_allocation(1024, 8, std::ptr::null());
        log_deallocation(1024, std::ptr::null());
        log_arena_swap(0, 1);
        log_arena_recycled(3);
    }
}
