//! Unsynchronized arena resources - the single-threaded fast path.
//!
//! Design: one storage-generic engine drives the bump cursor and the free
//! list; the two public variants differ only in where the bytes live
//! (embedded array vs. upstream-backed buffer). No locks, no atomics, no
//! system calls after construction. `RefCell` keeps the state honest and
//! makes the types `!Sync` by construction.

use std::cell::RefCell;
use std::ptr::NonNull;

use crate::cursor::{carve_down, charge_for, zero_size_sentinel, Carve, MAX_ALIGN};
use crate::error::{corrupt_deallocation, AllocError};
use crate::logging::{debug, log_allocation, log_arena_recycled, log_arena_swap, log_deallocation};
use crate::registry::Frame;
use crate::resource::ArenaResource;
use crate::source::{Backing, ByteSource, HeapBacking, InlineBacking, SystemSource};

struct State<F> {
    frame: Frame<F>,
    /// Live-allocation count per arena since it was activated.
    live: F,
}

/// Storage-generic allocation engine. `B` supplies geometry and the byte
/// buffer, `F` the registry arrays (`[u32; N]` inline, `Box<[u32]>` runtime).
pub(crate) struct Engine<B, F> {
    backing: B,
    state: RefCell<State<F>>,
}

impl<B: Backing, F: AsRef<[u32]> + AsMut<[u32]>> Engine<B, F> {
    /// `free_slots` and `live` must hold one slot per arena; callers have
    /// already validated the geometry.
    pub fn new(backing: B, free_slots: F, live: F) -> Self {
        let arena_size = backing.arena_size();
        Self {
            backing,
            state: RefCell::new(State { frame: Frame::new(free_slots, arena_size), live }),
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
        let mut st = self.state.borrow_mut();

        if let Some(carve) = carve_down(base, st.frame.cursor, st.frame.headroom, bytes, align) {
            return Ok(self.commit(&mut st, carve, bytes, align));
        }

        // The active arena lacks room. Verify the request fits a fresh arena
        // before touching the free list: a failed allocation must leave the
        // pool unchanged, and the carve after the swap must not fail.
        let Some(candidate) = st.frame.peek_free() else {
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

        st.frame.pop_free();
        let displaced = st.frame.active;
        let displaced_live = st.live.as_ref()[displaced as usize];
        st.frame.rebind(candidate, arena_size);
        if displaced_live == 0 {
            // An arena displaced with nothing live in it can never drain;
            // hand it straight back to the free list.
            st.frame.push_free(displaced);
        }
        log_arena_swap(displaced, candidate);

        Ok(self.commit(&mut st, Carve { cursor: top - charged, charged }, bytes, align))
    }

    fn commit(&self, st: &mut State<F>, carve: Carve, bytes: usize, align: usize) -> NonNull<u8> {
        st.frame.cursor = carve.cursor;
        st.frame.headroom -= carve.charged;
        st.live.as_mut()[st.frame.active as usize] += 1;
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
        let arena = (offset / arena_size) as u32;

        let mut st = self.state.borrow_mut();
        let live = st.live.as_ref()[arena as usize];
        debug_assert!(live > 0, "deallocation from an arena with no live allocations");
        let live = live.saturating_sub(1);
        st.live.as_mut()[arena as usize] = live;
        log_deallocation(bytes, ptr.as_ptr());

        if live == 0 {
            if arena == st.frame.active {
                // Drained while active: rewind in place and skip the
                // release/reserve round trip.
                st.frame.rebind(arena, arena_size);
            } else {
                st.frame.push_free(arena);
                log_arena_recycled(arena);
            }
        }
    }

    pub fn num_allocations(&self) -> usize {
        self.state.borrow().live.as_ref().iter().map(|&c| c as usize).sum()
    }

    pub fn num_busy_arenas(&self) -> usize {
        self.state.borrow().live.as_ref().iter().filter(|&&c| c > 0).count()
    }
}

/// Unsynchronized pool with compile-time geometry: `N` arenas of `S` bytes
/// embedded in the value, cache-line aligned. Construction performs no heap
/// allocation at all.
///
/// `S` must be a nonzero multiple of [`MAX_ALIGN`](crate::MAX_ALIGN) and
/// `N >= 1`; both are enforced at compile time.
///
/// Not thread-safe (`!Sync`); use [`SyncFixedArenaPool`] to share across
/// threads. Because the bytes live inside the value, moving the pool while
/// allocations are outstanding invalidates them; drain the pool first.
///
/// [`SyncFixedArenaPool`]: crate::SyncFixedArenaPool
pub struct FixedArenaPool<const N: usize, const S: usize> {
    engine: Engine<InlineBacking<N, S>, [u32; N]>,
}

impl<const N: usize, const S: usize> FixedArenaPool<N, S> {
    const GEOMETRY_OK: () = {
        assert!(N >= 1, "pool needs at least one arena");
        assert!(
            S > 0 && S % MAX_ALIGN == 0,
            "arena size must be a nonzero multiple of the fundamental alignment"
        );
    };

    pub fn new() -> Self {
        let () = Self::GEOMETRY_OK;
        Self { engine: Engine::new(InlineBacking::new(), [0u32; N], [0u32; N]) }
    }
}

impl<const N: usize, const S: usize> Default for FixedArenaPool<N, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize, const S: usize> ArenaResource for FixedArenaPool<N, S> {
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

impl<const N: usize, const S: usize> ByteSource for FixedArenaPool<N, S> {
    fn reserve(&self, layout: std::alloc::Layout) -> Result<NonNull<u8>, AllocError> {
        self.allocate(layout.size(), layout.align())
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: std::alloc::Layout) {
        self.deallocate(ptr, layout.size(), layout.align());
    }
}

/// Unsynchronized pool with runtime geometry: the backing buffer comes from
/// an upstream [`ByteSource`] (the system heap by default) once at
/// construction; allocate and deallocate never touch the upstream again.
///
/// Not thread-safe (`!Sync`); use [`SyncArenaPool`] to share across threads.
///
/// [`SyncArenaPool`]: crate::SyncArenaPool
pub struct ArenaPool<U: ByteSource = SystemSource> {
    engine: Engine<HeapBacking<U>, Box<[u32]>>,
}

impl<U: ByteSource> std::fmt::Debug for ArenaPool<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArenaPool")
            .field("num_arenas", &self.engine.num_arenas())
            .field("arena_size", &self.engine.arena_size())
            .finish()
    }
}

impl ArenaPool<SystemSource> {
    /// Pool of `num_arenas` arenas of `arena_size` bytes backed by the
    /// system heap.
    pub fn new(num_arenas: usize, arena_size: usize) -> Result<Self, AllocError> {
        Self::with_upstream(num_arenas, arena_size, SystemSource)
    }
}

impl<U: ByteSource> ArenaPool<U> {
    /// Pool whose backing buffer is reserved from `upstream`. Pass a
    /// reference to another pool to stack resources without touching the
    /// heap.
    pub fn with_upstream(
        num_arenas: usize,
        arena_size: usize,
        upstream: U,
    ) -> Result<Self, AllocError> {
        let backing = HeapBacking::new(num_arenas, arena_size, upstream)?;
        let free_slots = vec![0u32; num_arenas].into_boxed_slice();
        let live = vec![0u32; num_arenas].into_boxed_slice();
        Ok(Self { engine: Engine::new(backing, free_slots, live) })
    }
}

impl<U: ByteSource> ArenaResource for ArenaPool<U> {
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

impl<U: ByteSource> ByteSource for ArenaPool<U> {
    fn reserve(&self, layout: std::alloc::Layout) -> Result<NonNull<u8>, AllocError> {
        self.allocate(layout.size(), layout.align())
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: std::alloc::Layout) {
        self.deallocate(ptr, layout.size(), layout.align());
    }
}
