//! The allocator capability implemented uniformly by every pool variant.

use std::ptr::NonNull;

use crate::error::AllocError;

/// Fixed-capacity arena allocator surface.
///
/// Containers and helpers that consume a pool take this capability as a
/// parameter; behavior is identical across variants, only the locking
/// discipline and storage source differ.
pub trait ArenaResource {
    /// Allocate `bytes` aligned to `align` (a power of two).
    ///
    /// A zero-byte request returns an aligned dangling sentinel without
    /// consuming any arena; the sentinel must not be passed to
    /// [`deallocate`](Self::deallocate) with a nonzero size. On error the
    /// pool is unchanged and remains fully serviceable.
    fn allocate(&self, bytes: usize, align: usize) -> Result<NonNull<u8>, AllocError>;

    /// Return a block obtained from [`allocate`](Self::allocate).
    ///
    /// A zero-byte deallocation is a no-op. A pointer that does not belong to
    /// this pool (double free, foreign pointer, overflow) is fatal: the call
    /// reports and panics rather than corrupt the registry.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this very pool with the same
    /// `bytes` and `align`, and must not be deallocated twice.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, bytes: usize, align: usize);

    /// Number of arenas `N` fixed at construction.
    fn num_arenas(&self) -> usize;

    /// Usable bytes `S` in each arena; also the largest serviceable request.
    fn arena_size(&self) -> usize;

    /// Live allocations summed over all arenas.
    fn num_allocations(&self) -> usize;

    /// Arenas holding at least one live allocation. The active arena counts
    /// only once something is carved from it.
    fn num_busy_arenas(&self) -> usize;

    /// Identity equality: true iff `other` is this very pool instance.
    /// Deallocation through an equal resource is always valid.
    fn is_equal(&self, other: &dyn ArenaResource) -> bool {
        std::ptr::eq(
            (self as *const Self).cast::<u8>(),
            (other as *const dyn ArenaResource).cast::<u8>(),
        )
    }
}
