//! Statistics arena resource - instrumented variant for capacity planning.
//!
//! Wraps the unsynchronized engine with a mutex-guarded address-to-size map.
//! The map answers the questions the plain counters cannot: how big the live
//! blocks are (histogram, percentile, mean, stddev), how much is allocated in
//! total, and the lifetime high-water marks for busy arenas and allocation
//! count. It also turns a double free into a deterministic report instead of
//! a corrupted registry, which makes this the variant to run when hunting
//! leaks or sizing `(num_arenas, arena_size)` for production.

use std::collections::BTreeMap;
use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::error::{corrupt_deallocation, AllocError};
use crate::resource::ArenaResource;
use crate::source::{ByteSource, SystemSource};
use crate::unsync::ArenaPool;

/// Live allocations keyed by address, ordered.
pub type AddressMap = BTreeMap<usize, usize>;

/// Block-size to live-block-count, ordered by size.
pub type Histogram = BTreeMap<usize, usize>;

struct StatsState {
    /// Address of every live allocation mapped to its size in bytes.
    map: AddressMap,
    /// All-time high number of busy arenas.
    max_busy_arenas: usize,
    /// All-time high number of live allocations.
    max_num_allocations: usize,
}

/// Instrumented pool with runtime geometry.
///
/// Thread-safe regardless of the unsynchronized engine underneath: every
/// operation that touches engine state serializes through the internal
/// mutex. Accounting costs a map operation per allocate/deallocate, so this
/// variant trades throughput for visibility.
pub struct StatsArenaPool<U: ByteSource = SystemSource> {
    engine: ArenaPool<U>,
    state: Mutex<StatsState>,
}

// Sound because the engine's `RefCell` state is only ever reached while
// holding `state`; geometry reads are immutable after construction.
unsafe impl<U: ByteSource + Send> Send for StatsArenaPool<U> {}
unsafe impl<U: ByteSource + Send + Sync> Sync for StatsArenaPool<U> {}

impl StatsArenaPool<SystemSource> {
    /// Instrumented pool of `num_arenas` arenas of `arena_size` bytes backed
    /// by the system heap.
    pub fn new(num_arenas: usize, arena_size: usize) -> Result<Self, AllocError> {
        Self::with_upstream(num_arenas, arena_size, SystemSource)
    }
}

impl<U: ByteSource> StatsArenaPool<U> {
    /// Instrumented pool whose arena backing is reserved from `upstream`.
    /// The bookkeeping map itself uses the global allocator.
    pub fn with_upstream(
        num_arenas: usize,
        arena_size: usize,
        upstream: U,
    ) -> Result<Self, AllocError> {
        Ok(Self {
            engine: ArenaPool::with_upstream(num_arenas, arena_size, upstream)?,
            state: Mutex::new(StatsState {
                map: AddressMap::new(),
                max_busy_arenas: 0,
                max_num_allocations: 0,
            }),
        })
    }

    /// Snapshot of the live allocations, ordered by address.
    pub fn address_map(&self) -> AddressMap {
        self.state.lock().map.clone()
    }

    /// Sum of all live allocations in bytes.
    pub fn bytes_allocated(&self) -> usize {
        self.state.lock().map.values().sum()
    }

    /// Histogram of live block sizes: size in bytes to number of live blocks
    /// of that size.
    pub fn histogram(&self) -> Histogram {
        let state = self.state.lock();
        let mut hist = Histogram::new();
        for &bytes in state.map.values() {
            *hist.entry(bytes).or_insert(0) += 1;
        }
        hist
    }

    /// Smallest block size whose cumulative live-block count reaches
    /// `floor(p * total)`. `p` is clamped into `[0, 1]`; `p = 0` and an empty
    /// pool both yield 0, `p = 1` yields the largest live block size,
    /// `p = 0.5` the median.
    pub fn percentile(&self, p: f64) -> usize {
        let p = p.clamp(0.0, 1.0);
        let hist = self.histogram();
        let total: usize = hist.values().sum();
        let target = (p * total as f64).floor() as usize;
        if target == 0 {
            return 0;
        }
        let mut accumulated = 0;
        for (&bytes, &count) in &hist {
            accumulated += count;
            if accumulated >= target {
                return bytes;
            }
        }
        0
    }

    /// Mean live block size in bytes; 0 when nothing is allocated.
    pub fn mean(&self) -> f64 {
        let state = self.state.lock();
        let n = state.map.len();
        if n == 0 {
            return 0.0;
        }
        state.map.values().map(|&b| b as f64).sum::<f64>() / n as f64
    }

    /// Population standard deviation of the live block sizes; 0 when nothing
    /// is allocated.
    pub fn stddev(&self) -> f64 {
        let state = self.state.lock();
        let n = state.map.len();
        if n == 0 {
            return 0.0;
        }
        let inv = 1.0 / n as f64;
        let mean = state.map.values().map(|&b| b as f64).sum::<f64>() * inv;
        let variance = state
            .map
            .values()
            .map(|&b| {
                let diff = b as f64 - mean;
                diff * diff
            })
            .sum::<f64>()
            * inv;
        variance.sqrt()
    }

    /// All-time high number of busy arenas.
    pub fn max_busy_arenas(&self) -> usize {
        self.state.lock().max_busy_arenas
    }

    /// All-time high number of live allocations.
    pub fn max_num_allocations(&self) -> usize {
        self.state.lock().max_num_allocations
    }
}

impl<U: ByteSource> ArenaResource for StatsArenaPool<U> {
    fn allocate(&self, bytes: usize, align: usize) -> Result<NonNull<u8>, AllocError> {
        let mut state = self.state.lock();
        let ptr = self.engine.allocate(bytes, align)?;
        if bytes > 0 {
            state.map.insert(ptr.as_ptr() as usize, bytes);
            state.max_num_allocations = state.max_num_allocations.max(state.map.len());
            state.max_busy_arenas = state.max_busy_arenas.max(self.engine.num_busy_arenas());
        }
        Ok(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, bytes: usize, align: usize) {
        if bytes == 0 {
            return;
        }
        let mut state = self.state.lock();
        // Stronger check than the engine's range test: the address must be a
        // live allocation recorded by this pool.
        if state.map.remove(&(ptr.as_ptr() as usize)).is_none() {
            corrupt_deallocation(ptr.as_ptr(), bytes, align);
        }
        self.engine.deallocate(ptr, bytes, align);
    }

    #[inline]
    fn num_arenas(&self) -> usize {
        self.engine.num_arenas()
    }

    #[inline]
    fn arena_size(&self) -> usize {
        self.engine.arena_size()
    }

    fn num_allocations(&self) -> usize {
        self.state.lock().map.len()
    }

    fn num_busy_arenas(&self) -> usize {
        let _state = self.state.lock();
        self.engine.num_busy_arenas()
    }
}

impl<U: ByteSource> ByteSource for StatsArenaPool<U> {
    fn reserve(&self, layout: std::alloc::Layout) -> Result<NonNull<u8>, AllocError> {
        self.allocate(layout.size(), layout.align())
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: std::alloc::Layout) {
        self.deallocate(ptr, layout.size(), layout.align());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pool_reports_zeroed_statistics() {
        let pool = StatsArenaPool::new(4, 256).expect("pool");
        assert!(pool.address_map().is_empty());
        assert_eq!(pool.bytes_allocated(), 0);
        assert!(pool.histogram().is_empty());
        assert_eq!(pool.percentile(0.5), 0);
        assert_eq!(pool.mean(), 0.0);
        assert_eq!(pool.stddev(), 0.0);
        assert_eq!(pool.max_busy_arenas(), 0);
        assert_eq!(pool.max_num_allocations(), 0);
    }

    #[test]
    fn map_tracks_live_allocations() {
        let pool = StatsArenaPool::new(4, 256).expect("pool");
        let a = pool.allocate(32, 8).expect("alloc");
        let b = pool.allocate(64, 8).expect("alloc");
        assert_eq!(pool.num_allocations(), 2);
        assert_eq!(pool.bytes_allocated(), 96);
        let map = pool.address_map();
        assert_eq!(map.get(&(a.as_ptr() as usize)), Some(&32));
        assert_eq!(map.get(&(b.as_ptr() as usize)), Some(&64));
        unsafe {
            pool.deallocate(a, 32, 8);
            pool.deallocate(b, 64, 8);
        }
        assert_eq!(pool.bytes_allocated(), 0);
        // Maxima stay at the high-water mark.
        assert_eq!(pool.max_num_allocations(), 2);
        assert_eq!(pool.max_busy_arenas(), 1);
    }

    #[test]
    fn geometry_is_validated_like_every_other_variant() {
        assert!(StatsArenaPool::new(0, 256).is_err());
        assert!(StatsArenaPool::new(4, 100).is_err());
    }

    #[test]
    #[should_panic(expected = "corrupt deallocation")]
    fn double_free_is_fatal() {
        let pool = StatsArenaPool::new(4, 256).expect("pool");
        let ptr = pool.allocate(32, 8).expect("alloc");
        unsafe {
            pool.deallocate(ptr, 32, 8);
            pool.deallocate(ptr, 32, 8);
        }
    }

    #[test]
    fn stddev_of_identical_blocks_is_zero() {
        let pool = StatsArenaPool::new(4, 256).expect("pool");
        let a = pool.allocate(64, 8).expect("alloc");
        let b = pool.allocate(64, 8).expect("alloc");
        assert_eq!(pool.mean(), 64.0);
        assert_eq!(pool.stddev(), 0.0);
        unsafe {
            pool.deallocate(a, 64, 8);
            pool.deallocate(b, 64, 8);
        }
    }
}
