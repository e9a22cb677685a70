//! Backing storage - where the pool's bytes come from.
//!
//! Inline-backed pools embed their arenas in the pool value itself, aligned
//! to a cache line. Upstream-backed pools obtain one contiguous buffer from a
//! [`ByteSource`] at construction and release it on drop; allocate and
//! deallocate never touch the upstream.

use std::alloc::{alloc, dealloc, Layout};
use std::cell::UnsafeCell;
use std::ptr::NonNull;

use crate::cursor::{zero_size_sentinel, CACHE_LINE, MAX_ALIGN};
use crate::error::AllocError;
use crate::logging::{debug, trace};

/// An upstream allocator consulted once for the backing buffer.
///
/// The system heap ([`SystemSource`]) is the default. Every pool variant also
/// implements `ByteSource`, so a pool can be backed by another pool and the
/// whole stack runs heap-free after the outermost construction.
pub trait ByteSource {
    /// Obtain a block satisfying `layout`.
    fn reserve(&self, layout: Layout) -> Result<NonNull<u8>, AllocError>;

    /// Return a block previously obtained from [`reserve`](Self::reserve).
    ///
    /// # Safety
    ///
    /// `ptr` must come from a `reserve` call on this source with the same
    /// `layout`, and must not be released twice.
    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout);
}

impl<S: ByteSource + ?Sized> ByteSource for &S {
    #[inline]
    fn reserve(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        (**self).reserve(layout)
    }

    #[inline]
    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        (**self).release(ptr, layout);
    }
}

/// The process heap, via the global allocator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSource;

impl ByteSource for SystemSource {
    fn reserve(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        if layout.size() == 0 {
            return Ok(zero_size_sentinel(layout.align()));
        }
        trace!(target: "multiarena", bytes = layout.size(), "reserving backing buffer from the heap");
        let ptr = unsafe { alloc(layout) };
        NonNull::new(ptr).ok_or(AllocError::UpstreamExhausted { bytes_needed: layout.size() })
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        trace!(target: "multiarena", bytes = layout.size(), "releasing backing buffer to the heap");
        dealloc(ptr.as_ptr(), layout);
    }
}

/// Geometry + base address of a pool's backing buffer.
pub(crate) trait Backing {
    fn base(&self) -> *mut u8;
    fn num_arenas(&self) -> usize;
    fn arena_size(&self) -> usize;
}

/// Cache-line aligned wrapper for embedded arena bytes.
#[repr(C, align(64))]
pub(crate) struct CacheAligned<T>(pub T);

/// Arenas embedded in the pool value: `N` arenas of `S` bytes, contiguous,
/// cache-line aligned. No memory leaves the pool object.
pub(crate) struct InlineBacking<const N: usize, const S: usize> {
    bytes: UnsafeCell<CacheAligned<[[u8; S]; N]>>,
}

impl<const N: usize, const S: usize> InlineBacking<N, S> {
    pub fn new() -> Self {
        Self { bytes: UnsafeCell::new(CacheAligned([[0u8; S]; N])) }
    }
}

impl<const N: usize, const S: usize> Backing for InlineBacking<N, S> {
    #[inline]
    fn base(&self) -> *mut u8 {
        self.bytes.get().cast::<u8>()
    }

    #[inline]
    fn num_arenas(&self) -> usize {
        N
    }

    #[inline]
    fn arena_size(&self) -> usize {
        S
    }
}

/// One buffer of `num_arenas * arena_size` bytes obtained from the upstream
/// at construction and released exactly once on drop.
pub(crate) struct HeapBacking<U: ByteSource> {
    base: NonNull<u8>,
    num_arenas: usize,
    arena_size: usize,
    upstream: U,
}

impl<U: ByteSource> HeapBacking<U> {
    pub fn new(num_arenas: usize, arena_size: usize, upstream: U) -> Result<Self, AllocError> {
        let invalid = AllocError::InvalidConstruction { num_arenas, arena_size };
        if num_arenas == 0 || arena_size == 0 || arena_size % MAX_ALIGN != 0 {
            return Err(invalid);
        }
        let total = num_arenas.checked_mul(arena_size).ok_or(invalid)?;
        let layout = Layout::from_size_align(total, CACHE_LINE).map_err(|_| invalid)?;
        let base = upstream.reserve(layout)?;
        debug!(
            target: "multiarena",
            num_arenas,
            arena_size,
            base = ?base.as_ptr(),
            "backing buffer reserved"
        );
        Ok(Self { base, num_arenas, arena_size, upstream })
    }

    fn layout(&self) -> Layout {
        // Validated at construction, cannot fail a second time.
        Layout::from_size_align(self.num_arenas * self.arena_size, CACHE_LINE)
            .unwrap_or(Layout::new::<u8>())
    }
}

impl<U: ByteSource> Drop for HeapBacking<U> {
    fn drop(&mut self) {
        unsafe { self.upstream.release(self.base, self.layout()) };
    }
}

impl<U: ByteSource> Backing for HeapBacking<U> {
    #[inline]
    fn base(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    #[inline]
    fn num_arenas(&self) -> usize {
        self.num_arenas
    }

    #[inline]
    fn arena_size(&self) -> usize {
        self.arena_size
    }
}

// The buffer is exclusively owned and only ever reached through the owning
// pool's own synchronization; the raw pointer alone blocks the auto traits.
unsafe impl<U: ByteSource + Send> Send for HeapBacking<U> {}
unsafe impl<U: ByteSource + Sync> Sync for HeapBacking<U> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_source_round_trip() {
        let layout = Layout::from_size_align(4096, CACHE_LINE).unwrap();
        let ptr = SystemSource.reserve(layout).expect("heap reserve");
        assert_eq!(ptr.as_ptr() as usize % CACHE_LINE, 0);
        unsafe { SystemSource.release(ptr, layout) };
    }

    #[test]
    fn heap_backing_validates_geometry() {
        assert!(HeapBacking::new(0, 256, SystemSource).is_err());
        assert!(HeapBacking::new(4, 0, SystemSource).is_err());
        assert!(HeapBacking::new(4, 100, SystemSource).is_err());
        assert!(HeapBacking::new(usize::MAX, MAX_ALIGN, SystemSource).is_err());
    }

    #[test]
    fn inline_backing_is_cache_line_aligned() {
        let backing = InlineBacking::<4, 256>::new();
        assert_eq!(backing.base() as usize % CACHE_LINE, 0);
        assert_eq!(backing.num_arenas(), 4);
        assert_eq!(backing.arena_size(), 256);
    }
}
