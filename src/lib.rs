//! Fixed-capacity multi-arena memory resources for real-time workloads.
//!
//! Design: a pre-reserved pool is carved into N equally-sized arenas and
//! filled by a downward bump cursor; whole arenas - never single blocks -
//! are the unit of reclamation:
//! 1. Bump carve in the active arena (fast path, two arithmetic ops)
//! 2. Free-list swap when the active arena overflows (slow path, O(1))
//! 3. Arena recycling once every allocation in it has been freed
//!
//! Allocation and deallocation are constant-time and never touch the system
//! heap after construction, which makes the pools suitable where determinism
//! and fragmentation immunity matter more than peak throughput. The trade:
//! no request may exceed one arena, and memory is only reclaimed when an
//! entire arena drains.
//!
//! Four variants share the engine, crossing thread-safety with geometry
//! binding:
//!
//! | | compile-time `N`, `S` | runtime `N`, `S` |
//! |---|---|---|
//! | single-threaded | [`FixedArenaPool`] | [`ArenaPool`] |
//! | thread-safe | [`SyncFixedArenaPool`] | [`SyncArenaPool`] |
//!
//! A fifth, [`StatsArenaPool`], layers an address map, histogram and
//! percentile/mean/stddev reporting over the engine for sizing the geometry
//! and hunting leaks; it also detects double frees exactly.
//!
//! Compile-time variants embed their bytes in the value (stack or static,
//! cache-line aligned); runtime variants reserve one buffer from an upstream
//! [`ByteSource`] - the system heap by default, or another pool, so a whole
//! resource stack can run heap-free.

pub mod logging;

mod cursor;
mod error;
mod registry;
mod resource;
mod scoped;
mod source;
mod stats;
mod sync;
mod unsync;


pub use cursor::{CACHE_LINE, MAX_ALIGN};
pub use error::AllocError;
pub use resource::ArenaResource;
pub use scoped::ScopedBox;
pub use source::{ByteSource, SystemSource};
pub use stats::{AddressMap, Histogram, StatsArenaPool};
pub use sync::{SyncArenaPool, SyncFixedArenaPool};
pub use unsync::{ArenaPool, FixedArenaPool};

// Re-export logging setup for convenience
pub use logging::init_logging;
