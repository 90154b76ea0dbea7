use std::alloc::{Layout, alloc, dealloc};
use std::ptr::NonNull;

/// Supplies the raw memory blocks that a [`SlotPool`][crate::SlotPool] subdivides into slots.
///
/// The pool asks for a block only when it runs out of both recycled and never-used slots, and
/// gives every block back exactly once, when the pool itself is dropped. All blocks requested by
/// one pool share the same layout.
///
/// The default source is [`GlobalBlocks`]. A custom source is useful for instrumentation or for
/// carving pool blocks out of a preallocated region.
///
/// # Safety
///
/// A block returned from [`allocate_block()`][Self::allocate_block] must be valid for reads and
/// writes of `layout.size()` bytes, must be aligned to `layout.align()` and must not be handed out
/// again until it has been passed back to [`release_block()`][Self::release_block].
///
/// # Examples
///
/// ```
/// use std::alloc::Layout;
/// use std::cell::Cell;
/// use std::ptr::NonNull;
///
/// use slot_pool::{BlockSource, GlobalBlocks, SlotPool};
///
/// #[derive(Debug, Default)]
/// struct CountingBlocks {
///     live: Cell<usize>,
/// }
///
/// // SAFETY: We forward to GlobalBlocks, which upholds the contract.
/// unsafe impl BlockSource for CountingBlocks {
///     fn allocate_block(&self, layout: Layout) -> Option<NonNull<u8>> {
///         self.live.set(self.live.get() + 1);
///         GlobalBlocks.allocate_block(layout)
///     }
///
///     unsafe fn release_block(&self, block: NonNull<u8>, layout: Layout) {
///         self.live.set(self.live.get() - 1);
///         // SAFETY: Forwarding the caller's guarantees.
///         unsafe { GlobalBlocks.release_block(block, layout) };
///     }
/// }
///
/// let blocks = CountingBlocks::default();
///
/// {
///     let mut pool = SlotPool::<u64>::builder().block_source(&blocks).build();
///     pool.new_element(42).unwrap();
///     assert_eq!(blocks.live.get(), 1);
/// }
///
/// assert_eq!(blocks.live.get(), 0);
/// ```
pub unsafe trait BlockSource {
    /// Requests one block with the given layout.
    ///
    /// Returns `None` if the memory cannot be supplied, which the pool reports to its caller as
    /// [`Error::AllocationFailure`][crate::Error::AllocationFailure].
    fn allocate_block(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Takes back a block previously supplied by [`allocate_block()`][Self::allocate_block].
    ///
    /// # Safety
    ///
    /// The caller must pass a block obtained from this source with the same `layout`, and must
    /// not use the block after this call.
    unsafe fn release_block(&self, block: NonNull<u8>, layout: Layout);
}

/// A [`BlockSource`] that obtains blocks from the Rust global allocator.
///
/// This is the default block source of [`SlotPool`][crate::SlotPool].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct GlobalBlocks;

// SAFETY: The global allocator returns memory that fits the layout, and we never hand out
// the same allocation twice.
unsafe impl BlockSource for GlobalBlocks {
    #[inline]
    fn allocate_block(&self, layout: Layout) -> Option<NonNull<u8>> {
        debug_assert!(layout.size() > 0, "pool blocks are never zero-sized");

        // SAFETY: The layout is not zero-sized, which is the only requirement of `alloc`.
        NonNull::new(unsafe { alloc(layout) })
    }

    #[inline]
    unsafe fn release_block(&self, block: NonNull<u8>, layout: Layout) {
        // SAFETY: The caller guarantees the block came from `alloc` with this layout.
        unsafe {
            dealloc(block.as_ptr(), layout);
        }
    }
}

// SAFETY: A shared reference forwards every call to the same underlying source,
// so the guarantees of `S` carry over unchanged.
unsafe impl<S> BlockSource for &S
where
    S: BlockSource + ?Sized,
{
    #[inline]
    fn allocate_block(&self, layout: Layout) -> Option<NonNull<u8>> {
        (**self).allocate_block(layout)
    }

    #[inline]
    unsafe fn release_block(&self, block: NonNull<u8>, layout: Layout) {
        // SAFETY: Forwarding the caller's guarantees.
        unsafe {
            (**self).release_block(block, layout);
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(GlobalBlocks: Send, Sync, Copy);

    #[test]
    fn global_blocks_honor_alignment() {
        let layout = Layout::from_size_align(256, 64).unwrap();

        let block = GlobalBlocks.allocate_block(layout).unwrap();
        assert_eq!(block.addr().get() % 64, 0);

        // The whole block must be writable.
        unsafe {
            block.as_ptr().write_bytes(0xAB, layout.size());
        }

        unsafe {
            GlobalBlocks.release_block(block, layout);
        }
    }

    #[test]
    fn reference_forwards_to_source() {
        let source = GlobalBlocks;
        let by_ref = &source;
        let layout = Layout::from_size_align(64, 8).unwrap();

        let block = by_ref.allocate_block(layout).unwrap();

        unsafe {
            by_ref.release_block(block, layout);
        }
    }
}
