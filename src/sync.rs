//! Synchronized arena resources - thread-safe variants of the same engine.
//!
//! Design: one mutex orders the cursor and the free list for the whole
//! allocate call; per-arena alloc/dealloc counters are relaxed atomics whose
//! difference is the live count. Deallocation is mostly lock-free: a relaxed
//! increment plus an equality hint, and only a *probable* drain takes the
//! lock to double-check before recycling. A stale relaxed read can skip the
//! hint and leave a drained arena unrecycled; that is harmless (the arena is
//! simply not reused until the pool is dropped) and the locked re-check
//! prevents the opposite failure, recycling an arena that is still live.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering::Relaxed};

use parking_lot::Mutex;

use crate::cursor::{carve_down, charge_for, zero_size_sentinel, Carve, MAX_ALIGN};
use crate::error::{corrupt_deallocation, AllocError};
use crate::logging::{debug, log_allocation, log_arena_recycled, log_arena_swap, log_deallocation};
use crate::registry::Frame;
use crate::resource::ArenaResource;
use crate::source::{Backing, ByteSource, HeapBacking, InlineBacking, SystemSource};

/// Thread-safe allocation engine. `B` supplies geometry and bytes, `F` the
/// free-list array, `C` the atomic counter arrays.
pub(crate) struct SyncEngine<B, F, C> {
    backing: B,
    /// Allocations per arena since activation.
    allocs: C,
    /// Deallocations per arena since activation.
    deallocs: C,
    frame: Mutex<Frame<F>>,
}

impl<B, F, C> SyncEngine<B, F, C>
where
    B: Backing,
    F: AsRef<[u32]> + AsMut<[u32]>,
    C: AsRef<[AtomicU32]>,
{
    pub fn new(backing: B, free_slots: F, allocs: C, deallocs: C) -> Self {
        let arena_size = backing.arena_size();
        Self {
            backing,
            allocs,
            deallocs,
            frame: Mutex::new(Frame::new(free_slots, arena_size)),
        }
    }

    #[inline]
    pub fn num_arenas(&self) -> usize {
        self.backing.num_arenas()
    }

    #[inline]
    pub fn arena_size(&self) -> usize {
        self.backing.arena_size()
    }

    #[inline]
    fn live(&self, arena: usize) -> u32 {
        // Relaxed is enough: callers either hold the lock or only use the
        // value as a hint that is re-checked under the lock.
        let a = self.allocs.as_ref()[arena].load(Relaxed);
        let d = self.deallocs.as_ref()[arena].load(Relaxed);
        a.saturating_sub(d)
    }

    pub fn allocate(&self, bytes: usize, align: usize) -> Result<NonNull<u8>, AllocError> {
        debug_assert!(align.is_power_of_two(), "alignment must be a power of 2");
        if bytes == 0 {
            return Ok(zero_size_sentinel(align));
        }
        let arena_size = self.backing.arena_size();
        if bytes > arena_size {
            return Err(AllocError::TooLargeRequest {
                bytes_needed: bytes,
                bytes_available: arena_size,
            });
        }
        let base = self.backing.base() as usize;
        let mut frame = self.frame.lock();

        if let Some(carve) = carve_down(base, frame.cursor, frame.headroom, bytes, align) {
            return Ok(self.commit(&mut frame, carve, bytes, align));
        }

        // Same discipline as the unsynchronized engine: prove the fit before
        // the swap commits so failures leave the pool unchanged.
        let Some(candidate) = frame.peek_free() else {
            debug!(
                target: "multiarena",
                bytes,
                align,
                "allocation failed: free list empty and active arena full"
            );
            return Err(AllocError::ArenasExhausted { num_arenas: self.backing.num_arenas() });
        };
        let top = arena_size * (candidate as usize + 1);
        let charged = charge_for(base, top, bytes, align);
        if charged > arena_size {
            return Err(AllocError::TooLargeRequest {
                bytes_needed: charged,
                bytes_available: arena_size,
            });
        }

        frame.pop_free();
        let displaced = frame.active;
        let displaced_live = self.live(displaced as usize);
        frame.rebind(candidate, arena_size);
        if displaced_live == 0 {
            // Nothing live in the displaced arena: it can never drain, so
            // clear its counters and hand it straight back.
            self.allocs.as_ref()[displaced as usize].store(0, Relaxed);
            self.deallocs.as_ref()[displaced as usize].store(0, Relaxed);
            frame.push_free(displaced);
        }
        log_arena_swap(displaced, candidate);

        Ok(self.commit(&mut frame, Carve { cursor: top - charged, charged }, bytes, align))
    }

    fn commit(&self, frame: &mut Frame<F>, carve: Carve, bytes: usize, align: usize) -> NonNull<u8> {
        frame.cursor = carve.cursor;
        frame.headroom -= carve.charged;
        self.allocs.as_ref()[frame.active as usize].fetch_add(1, Relaxed);
        let addr = (self.backing.base() as usize + carve.cursor) as *mut u8;
        log_allocation(bytes, align, addr);
        // base is non-null and the cursor offset stays inside the buffer
        unsafe { NonNull::new_unchecked(addr) }
    }

    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this engine and not be freed twice.
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>, bytes: usize, align: usize) {
        if bytes == 0 {
            return;
        }
        let arena_size = self.backing.arena_size();
        let offset = (ptr.as_ptr() as usize).wrapping_sub(self.backing.base() as usize);
        if offset >= self.backing.num_arenas() * arena_size {
            corrupt_deallocation(ptr.as_ptr(), bytes, align);
        }
        let arena = (offset / arena_size) as usize;

        let observed = self.deallocs.as_ref()[arena].fetch_add(1, Relaxed) + 1;
        log_deallocation(bytes, ptr.as_ptr());
        if observed != self.allocs.as_ref()[arena].load(Relaxed) {
            // Common case: the arena still holds live allocations. No lock.
            return;
        }

        // The arena has probably drained. Confirm under the lock against the
        // counter values this thread observed: a concurrent allocation, a
        // concurrent recycle, or a reuse of the arena all change them and
        // turn this into a no-op.
        let mut frame = self.frame.lock();
        let allocs_now = self.allocs.as_ref()[arena].load(Relaxed);
        let deallocs_now = self.deallocs.as_ref()[arena].load(Relaxed);
        if allocs_now == observed && deallocs_now == observed {
            let arena = arena as u32;
            if arena == frame.active {
                frame.rebind(arena, arena_size);
            } else {
                frame.push_free(arena);
                log_arena_recycled(arena);
            }
            self.allocs.as_ref()[arena as usize].store(0, Relaxed);
            self.deallocs.as_ref()[arena as usize].store(0, Relaxed);
        }
    }

    pub fn num_allocations(&self) -> usize {
        // The lock orders the sum against arena transitions, giving a count
        // consistent with some serial interleaving of the concurrent calls.
        let _frame = self.frame.lock();
        (0..self.backing.num_arenas()).map(|i| self.live(i) as usize).sum()
    }

    pub fn num_busy_arenas(&self) -> usize {
        let _frame = self.frame.lock();
        (0..self.backing.num_arenas()).filter(|&i| self.live(i) > 0).count()
    }
}

fn atomic_slots(n: usize) -> Box<[AtomicU32]> {
    (0..n).map(|_| AtomicU32::new(0)).collect()
}

/// Thread-safe pool with compile-time geometry: `N` arenas of `S` bytes
/// embedded in the value, cache-line aligned.
///
/// `S` must be a nonzero multiple of [`MAX_ALIGN`](crate::MAX_ALIGN) and
/// `N >= 1`; both are enforced at compile time. Moving the pool while
/// allocations are outstanding invalidates them; drain the pool first.
pub struct SyncFixedArenaPool<const N: usize, const S: usize> {
    engine: SyncEngine<InlineBacking<N, S>, [u32; N], [AtomicU32; N]>,
}

// The embedded bytes are handed out in disjoint blocks; the cursor and free
// list live under the engine's mutex and the counters are atomic. Only the
// `UnsafeCell` around the raw bytes blocks the auto trait.
unsafe impl<const N: usize, const S: usize> Sync for SyncFixedArenaPool<N, S> {}

impl<const N: usize, const S: usize> SyncFixedArenaPool<N, S> {
    const GEOMETRY_OK: () = {
        assert!(N >= 1, "pool needs at least one arena");
        assert!(
            S > 0 && S % MAX_ALIGN == 0,
            "arena size must be a nonzero multiple of the fundamental alignment"
        );
    };

    pub fn new() -> Self {
        let () = Self::GEOMETRY_OK;
        Self {
            engine: SyncEngine::new(
                InlineBacking::new(),
                [0u32; N],
                std::array::from_fn(|_| AtomicU32::new(0)),
                std::array::from_fn(|_| AtomicU32::new(0)),
            ),
        }
    }
}

impl<const N: usize, const S: usize> Default for SyncFixedArenaPool<N, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize, const S: usize> ArenaResource for SyncFixedArenaPool<N, S> {
    #[inline]
    fn allocate(&self, bytes: usize, align: usize) -> Result<NonNull<u8>, AllocError> {
        self.engine.allocate(bytes, align)
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, bytes: usize, align: usize) {
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
        self.engine.num_allocations()
    }

    fn num_busy_arenas(&self) -> usize {
        self.engine.num_busy_arenas()
    }
}

impl<const N: usize, const S: usize> ByteSource for SyncFixedArenaPool<N, S> {
    fn reserve(&self, layout: std::alloc::Layout) -> Result<NonNull<u8>, AllocError> {
        self.allocate(layout.size(), layout.align())
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: std::alloc::Layout) {
        self.deallocate(ptr, layout.size(), layout.align());
    }
}

/// Thread-safe pool with runtime geometry, backed by an upstream
/// [`ByteSource`] consulted only at construction and destruction.
pub struct SyncArenaPool<U: ByteSource = SystemSource> {
    engine: SyncEngine<HeapBacking<U>, Box<[u32]>, Box<[AtomicU32]>>,
}

impl SyncArenaPool<SystemSource> {
    /// Pool of `num_arenas` arenas of `arena_size` bytes backed by the
    /// system heap.
    pub fn new(num_arenas: usize, arena_size: usize) -> Result<Self, AllocError> {
        Self::with_upstream(num_arenas, arena_size, SystemSource)
    }
}

impl<U: ByteSource> SyncArenaPool<U> {
    /// Pool whose backing buffer is reserved from `upstream`.
    pub fn with_upstream(
        num_arenas: usize,
        arena_size: usize,
        upstream: U,
    ) -> Result<Self, AllocError> {
        let backing = HeapBacking::new(num_arenas, arena_size, upstream)?;
        Ok(Self {
            engine: SyncEngine::new(
                backing,
                vec![0u32; num_arenas].into_boxed_slice(),
                atomic_slots(num_arenas),
                atomic_slots(num_arenas),
            ),
        })
    }
}

impl<U: ByteSource> ArenaResource for SyncArenaPool<U> {
    #[inline]
    fn allocate(&self, bytes: usize, align: usize) -> Result<NonNull<u8>, AllocError> {
        self.engine.allocate(bytes, align)
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, bytes: usize, align: usize) {
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
        self.engine.num_allocations()
    }

    fn num_busy_arenas(&self) -> usize {
        self.engine.num_busy_arenas()
    }
}

impl<U: ByteSource> ByteSource for SyncArenaPool<U> {
    fn reserve(&self, layout: std::alloc::Layout) -> Result<NonNull<u8>, AllocError> {
        self.allocate(layout.size(), layout.align())
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: std::alloc::Layout) {
        self.deallocate(ptr, layout.size(), layout.align());
    }
}
