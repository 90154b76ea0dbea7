use std::alloc::Layout;
use std::iter;
use std::ptr::NonNull;

use tracing::trace;

use crate::{BlockSource, Error, Result};

/// Sits at the start of every block, linking it to the block allocated before it.
#[repr(C)]
struct BlockHeader {
    previous: Option<NonNull<BlockHeader>>,
}

/// Layout calculations for the blocks of a pool, derived from the configured block size and the
/// slot layout.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct BlockGeometry {
    /// Layout requested from the block source for every block. The alignment satisfies both the
    /// header and the slots, so the slot offset is the same in every block.
    block_layout: Layout,

    /// Byte offset of the first slot from the start of the block: the header size rounded up
    /// to the slot alignment.
    slots_offset: usize,

    /// Stride between consecutive slots.
    slot_size: usize,

    /// How many whole slots fit between the slot offset and the end of the block.
    slot_capacity: usize,
}

impl BlockGeometry {
    /// # Panics
    ///
    /// Panics if a block of `block_size` bytes cannot hold at least two slots or if the block
    /// layout is not representable.
    #[must_use]
    pub(crate) fn calculate(block_size: usize, slot_layout: Layout) -> Self {
        let header_layout = Layout::new::<BlockHeader>();

        let (header_with_slot, slots_offset) = header_layout
            .extend(slot_layout)
            .expect("header followed by one slot cannot overflow isize for any real type");

        let block_layout = Layout::from_size_align(block_size, header_with_slot.align())
            .expect("block size must not overflow isize when rounded up to the slot alignment");

        // Layout::new() already pads the slot size to its alignment, so it is also the stride.
        let slot_size = slot_layout.size();

        #[expect(
            clippy::integer_division,
            reason = "we want the number of whole slots that fit"
        )]
        #[expect(
            clippy::arithmetic_side_effects,
            reason = "slot size is never zero because a slot always fits a pointer"
        )]
        let slot_capacity = block_size.saturating_sub(slots_offset) / slot_size;

        assert!(
            slot_capacity >= 2,
            "block size {block_size} cannot hold two slots of {slot_size} bytes after a {slots_offset}-byte header"
        );

        Self {
            block_layout,
            slots_offset,
            slot_size,
            slot_capacity,
        }
    }

    #[must_use]
    pub(crate) fn block_layout(&self) -> Layout {
        self.block_layout
    }

    #[must_use]
    pub(crate) fn slot_size(&self) -> usize {
        self.slot_size
    }

    #[must_use]
    pub(crate) fn slot_capacity(&self) -> usize {
        self.slot_capacity
    }

    /// Upper bound on the number of slots the pool could ever serve: slots per block times the
    /// number of blocks that fit in the address space.
    #[must_use]
    pub(crate) fn max_capacity(&self) -> usize {
        #[expect(
            clippy::integer_division,
            reason = "we want the number of whole blocks that fit"
        )]
        #[expect(
            clippy::arithmetic_side_effects,
            reason = "block size is at least two slots, so never zero"
        )]
        let max_blocks = usize::MAX / self.block_layout.size();

        self.slot_capacity.saturating_mul(max_blocks)
    }
}

/// The singly-linked list of blocks owned by a pool, newest block first.
///
/// Blocks are only ever added at the head. None is released until the whole chain is released,
/// which happens once, when the pool is dropped.
#[derive(Debug)]
pub(crate) struct BlockChain<S: BlockSource> {
    newest: Option<NonNull<BlockHeader>>,

    geometry: BlockGeometry,

    source: S,
}

impl<S: BlockSource> BlockChain<S> {
    #[must_use]
    pub(crate) fn new(geometry: BlockGeometry, source: S) -> Self {
        Self {
            newest: None,
            geometry,
            source,
        }
    }

    #[must_use]
    pub(crate) fn geometry(&self) -> &BlockGeometry {
        &self.geometry
    }

    /// Requests a new block from the block source and links it in as the newest block.
    ///
    /// Returns a pointer to the first slot of the new block. All `slot_capacity` slots from there
    /// on lie within the block.
    pub(crate) fn grow(&mut self) -> Result<NonNull<u8>> {
        let layout = self.geometry.block_layout;

        let block = self
            .source
            .allocate_block(layout)
            .ok_or(Error::AllocationFailure {
                block_size: layout.size(),
                block_align: layout.align(),
            })?;

        let header = block.cast::<BlockHeader>();

        // SAFETY: The block source guarantees the block is writable and aligned for our layout,
        // whose alignment is at least that of the header.
        unsafe {
            header.write(BlockHeader {
                previous: self.newest,
            });
        }

        self.newest = Some(header);

        trace!(
            block_size = layout.size(),
            slot_capacity = self.geometry.slot_capacity,
            "slot pool grew by one block"
        );

        // SAFETY: The geometry guarantees the slot offset lies within the block.
        Ok(unsafe { block.add(self.geometry.slots_offset) })
    }

    fn first_slot_of(&self, header: NonNull<BlockHeader>) -> NonNull<u8> {
        // SAFETY: Every block in the chain was allocated with our geometry, so the slot offset
        // lies within it.
        unsafe { header.cast::<u8>().add(self.geometry.slots_offset) }
    }

    /// Iterates over the first slot of every block, newest block first.
    pub(crate) fn first_slots(&self) -> impl Iterator<Item = NonNull<u8>> {
        iter::successors(self.newest, |header| {
            // SAFETY: Every header in the chain was initialized in `grow()` and the block stays
            // allocated for as long as the chain is borrowed.
            unsafe { header.as_ref().previous }
        })
        .map(|header| self.first_slot_of(header))
    }

    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Diagnostics only, mutations cannot break the pool.
    pub(crate) fn len(&self) -> usize {
        self.first_slots().count()
    }

    /// Releases every block back to the block source, newest first.
    ///
    /// Before each block is released, `visit` is called with the block's position in the chain
    /// (0 for the newest block) and a pointer to its first slot.
    pub(crate) fn release_all(&mut self, mut visit: impl FnMut(usize, NonNull<u8>)) {
        let mut position: usize = 0;

        while let Some(header) = self.newest {
            // SAFETY: The header was initialized in `grow()` and the block is still allocated.
            let previous = unsafe { header.as_ref().previous };

            visit(position, self.first_slot_of(header));

            // SAFETY: The block came from this source with this layout and nothing refers to it
            // once it is unlinked below.
            unsafe {
                self.source
                    .release_block(header.cast(), self.geometry.block_layout);
            }

            self.newest = previous;

            // Cannot overflow because that would imply more blocks than addressable memory.
            position = position.wrapping_add(1);
        }
    }
}

impl<S: BlockSource> Drop for BlockChain<S> {
    fn drop(&mut self) {
        // Normally the pool has already released everything. This only finds blocks if the
        // pool teardown was interrupted by a panicking element destructor.
        self.release_all(|_, _| {});
    }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::GlobalBlocks;

    #[derive(Debug, Default)]
    struct CountingBlocks {
        allocated: Cell<usize>,
        released: Cell<usize>,
        refuse: Cell<bool>,
    }

    unsafe impl BlockSource for CountingBlocks {
        fn allocate_block(&self, layout: Layout) -> Option<NonNull<u8>> {
            if self.refuse.get() {
                return None;
            }

            self.allocated.set(self.allocated.get() + 1);
            GlobalBlocks.allocate_block(layout)
        }

        unsafe fn release_block(&self, block: NonNull<u8>, layout: Layout) {
            self.released.set(self.released.get() + 1);
            unsafe { GlobalBlocks.release_block(block, layout) };
        }
    }

    fn pointer_slots() -> Layout {
        Layout::new::<usize>()
    }

    #[test]
    fn geometry_for_pointer_sized_slots() {
        let geometry = BlockGeometry::calculate(4096, pointer_slots());

        assert_eq!(geometry.slot_size(), 8);
        assert_eq!(geometry.slot_capacity(), (4096 - 8) / 8);
        assert_eq!(geometry.block_layout().size(), 4096);
    }

    #[test]
    fn geometry_pads_header_to_slot_alignment() {
        let slot_layout = Layout::from_size_align(64, 64).unwrap();
        let geometry = BlockGeometry::calculate(64 * 5, slot_layout);

        // The header occupies the first 64 bytes after padding, leaving room for 4 slots.
        assert_eq!(geometry.slot_capacity(), 4);
        assert_eq!(geometry.block_layout().align(), 64);
    }

    #[test]
    fn geometry_ignores_trailing_partial_slot() {
        let slot_layout = Layout::from_size_align(16, 8).unwrap();
        let geometry = BlockGeometry::calculate(8 + 16 * 3 + 15, slot_layout);

        assert_eq!(geometry.slot_capacity(), 3);
    }

    #[test]
    #[should_panic]
    fn geometry_rejects_block_for_single_slot() {
        drop(BlockGeometry::calculate(8 + 8, pointer_slots()));
    }

    #[test]
    fn geometry_accepts_block_for_two_slots() {
        let geometry = BlockGeometry::calculate(8 + 8 * 2, pointer_slots());

        assert_eq!(geometry.slot_capacity(), 2);
    }

    #[test]
    fn max_capacity_scales_with_block_count() {
        let geometry = BlockGeometry::calculate(4096, pointer_slots());

        assert_eq!(geometry.max_capacity(), 511 * (usize::MAX / 4096));
    }

    #[test]
    fn grow_links_blocks_newest_first() {
        let source = CountingBlocks::default();
        let mut chain = BlockChain::new(BlockGeometry::calculate(256, pointer_slots()), &source);

        assert_eq!(chain.len(), 0);

        let first = chain.grow().unwrap();
        let second = chain.grow().unwrap();

        assert_eq!(chain.len(), 2);
        assert_eq!(source.allocated.get(), 2);

        let first_slots = chain.first_slots().collect::<Vec<_>>();
        assert_eq!(first_slots, vec![second, first]);
    }

    #[test]
    fn first_slot_is_aligned_for_slots() {
        let source = CountingBlocks::default();
        let slot_layout = Layout::from_size_align(32, 32).unwrap();
        let mut chain = BlockChain::new(BlockGeometry::calculate(1024, slot_layout), &source);

        let first = chain.grow().unwrap();
        assert_eq!(first.addr().get() % 32, 0);
    }

    #[test]
    fn refused_block_is_allocation_failure() {
        let source = CountingBlocks::default();
        source.refuse.set(true);

        let mut chain = BlockChain::new(BlockGeometry::calculate(256, pointer_slots()), &source);

        let result = chain.grow();
        assert!(matches!(
            result,
            Err(Error::AllocationFailure {
                block_size: 256,
                ..
            })
        ));
        assert_eq!(chain.len(), 0);
    }

    #[test]
    fn release_all_visits_newest_first_then_releases() {
        let source = CountingBlocks::default();
        let mut chain = BlockChain::new(BlockGeometry::calculate(256, pointer_slots()), &source);

        let oldest = chain.grow().unwrap();
        let middle = chain.grow().unwrap();
        let newest = chain.grow().unwrap();

        let mut visited = Vec::new();
        chain.release_all(|position, first_slot| visited.push((position, first_slot)));

        assert_eq!(visited, vec![(0, newest), (1, middle), (2, oldest)]);
        assert_eq!(source.released.get(), 3);
        assert_eq!(chain.len(), 0);
    }

    #[test]
    fn drop_releases_remaining_blocks() {
        let source = CountingBlocks::default();

        {
            let mut chain =
                BlockChain::new(BlockGeometry::calculate(256, pointer_slots()), &source);
            chain.grow().unwrap();
            chain.grow().unwrap();
        }

        assert_eq!(source.allocated.get(), 2);
        assert_eq!(source.released.get(), 2);
    }
}
