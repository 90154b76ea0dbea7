//! The sweep that drops every live element exactly once when a pool is dropped.
//!
//! Slots are not tagged with their state, so the sweep reconstructs it. Every slot below the bump
//! cursor of the newest block, and every slot of an older block, was handed out at some point.
//! Of those, the ones on the free list have already been dropped; the rest are live.

use std::ptr::NonNull;

use bitvec::vec::BitVec;

use crate::{BlockChain, BlockSource, Slot, TeardownStrategy};

/// Drops every live element in the pool and releases all blocks.
///
/// Returns the number of elements that were dropped.
///
/// # Safety
///
/// `free_list` must be the pool's free list and `cursor` its bump cursor, both describing the
/// slots of `blocks`. Every slot that was handed out and is not on the free list must hold an
/// initialized element that is not referenced anywhere else.
pub(crate) unsafe fn drop_live_elements<T, S: BlockSource>(
    blocks: &mut BlockChain<S>,
    free_list: Option<NonNull<Slot<T>>>,
    cursor: *mut Slot<T>,
    strategy: TeardownStrategy,
) -> usize {
    // SAFETY: Forwarding the caller's guarantee that this is the pool's free list.
    let free_addresses = unsafe { Slot::walk_free_list(free_list) }
        .map(|slot| slot.addr().get())
        .collect::<Vec<_>>();

    let free_slots = match strategy {
        TeardownStrategy::SortedFreeList => FreeSlots::sorted(free_addresses),
        TeardownStrategy::LivenessBitmap => FreeSlots::bitmap(blocks, &free_addresses),
    };

    let slot_size = blocks.geometry().slot_size();
    let slot_capacity = blocks.geometry().slot_capacity();
    let mut dropped: usize = 0;

    blocks.release_all(|position, first_slot| {
        let first_slot = first_slot.cast::<Slot<T>>();

        // Only the newest block can have slots that were never handed out.
        let handed_out = if position == 0 {
            slots_between(first_slot, cursor, slot_size)
        } else {
            slot_capacity
        };

        for index in 0..handed_out {
            // SAFETY: `index` is below the number of slots carved out of this block.
            let slot = unsafe { first_slot.add(index) };

            if free_slots.contains(position, index, slot.addr().get()) {
                continue;
            }

            // SAFETY: The slot was handed out and is not free, so it holds a live element that
            // nothing else refers to (guaranteed by the caller).
            unsafe {
                Slot::element_ptr(slot).drop_in_place();
            }

            // Cannot overflow because every dropped element occupied a distinct slot.
            dropped = dropped.wrapping_add(1);
        }
    });

    dropped
}

#[expect(
    clippy::arithmetic_side_effects,
    clippy::integer_division,
    reason = "the cursor never precedes the first slot and slot size is never zero"
)]
fn slots_between<T>(
    first_slot: NonNull<Slot<T>>,
    cursor: *mut Slot<T>,
    slot_size: usize,
) -> usize {
    (cursor.addr() - first_slot.addr().get()) / slot_size
}

/// Answers "is this handed-out slot on the free list" during a sweep.
#[derive(Debug)]
enum FreeSlots {
    /// Ascending free slot addresses.
    Sorted(Vec<usize>),

    /// One bit per slot, `slots_per_block` bits per block, blocks ordered by chain position.
    Bitmap { slots_per_block: usize, free: BitVec },
}

impl FreeSlots {
    fn sorted(mut free_addresses: Vec<usize>) -> Self {
        free_addresses.sort_unstable();
        Self::Sorted(free_addresses)
    }

    #[allow(
        clippy::arithmetic_side_effects,
        clippy::integer_division,
        reason = "all operands are bounded by the block geometry"
    )]
    fn bitmap<S: BlockSource>(blocks: &BlockChain<S>, free_addresses: &[usize]) -> Self {
        let slot_size = blocks.geometry().slot_size();
        let slots_per_block = blocks.geometry().slot_capacity();

        // (first slot address, chain position), ascending by address so we can binary search
        // for the block that contains a free slot.
        let mut block_starts = blocks
            .first_slots()
            .enumerate()
            .map(|(position, first_slot)| (first_slot.addr().get(), position))
            .collect::<Vec<_>>();
        block_starts.sort_unstable();

        let mut free = BitVec::repeat(false, slots_per_block * block_starts.len());

        for &address in free_addresses {
            let blocks_at_or_below = block_starts.partition_point(|&(start, _)| start <= address);

            let &(start, position) = blocks_at_or_below
                .checked_sub(1)
                .and_then(|i| block_starts.get(i))
                .expect("every free slot lies within a block of its pool");

            let index = (address - start) / slot_size;

            free.set(position * slots_per_block + index, true);
        }

        Self::Bitmap {
            slots_per_block,
            free,
        }
    }

    #[allow(
        clippy::arithmetic_side_effects,
        reason = "all operands are bounded by the block geometry"
    )]
    fn contains(&self, position: usize, index: usize, address: usize) -> bool {
        match self {
            Self::Sorted(addresses) => addresses.binary_search(&address).is_ok(),
            Self::Bitmap {
                slots_per_block,
                free,
            } => free
                .get(position * slots_per_block + index)
                .is_some_and(|bit| *bit),
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::indexing_slicing,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::{BlockGeometry, GlobalBlocks};

    /// Records its id into a shared log when dropped.
    struct Logged {
        id: usize,
        log: Rc<RefCell<Vec<usize>>>,
    }

    impl Drop for Logged {
        fn drop(&mut self) {
            self.log.borrow_mut().push(self.id);
        }
    }

    /// Carves `count` slots out of a fresh chain of 4-slot blocks, the way the pool's bump
    /// cursor would, and fills each with a `Logged` element.
    fn carve(
        count: usize,
        log: &Rc<RefCell<Vec<usize>>>,
    ) -> (BlockChain<GlobalBlocks>, Vec<NonNull<Slot<Logged>>>, *mut Slot<Logged>) {
        let slot_layout = Slot::<Logged>::layout();
        let geometry = BlockGeometry::calculate(slot_layout.size() * 5, slot_layout);
        assert_eq!(geometry.slot_capacity(), 4);

        let mut chain = BlockChain::new(geometry, GlobalBlocks);
        let mut slots = Vec::new();
        let mut cursor: *mut Slot<Logged> = std::ptr::null_mut();
        let mut remaining_in_block = 0;

        for id in 0..count {
            if remaining_in_block == 0 {
                cursor = chain.grow().unwrap().cast::<Slot<Logged>>().as_ptr();
                remaining_in_block = 4;
            }

            let slot = NonNull::new(cursor).unwrap();
            unsafe {
                Slot::element_ptr(slot).write(Logged {
                    id,
                    log: Rc::clone(log),
                });
                cursor = cursor.add(1);
            }

            remaining_in_block -= 1;
            slots.push(slot);
        }

        (chain, slots, cursor)
    }

    /// Drops the elements at `freed` and threads their slots onto a free list.
    fn free(slots: &[NonNull<Slot<Logged>>], freed: &[usize]) -> Option<NonNull<Slot<Logged>>> {
        let mut head = None;

        for &index in freed {
            unsafe {
                Slot::element_ptr(slots[index]).drop_in_place();
                Slot::set_next_free(slots[index], head);
            }
            head = Some(slots[index]);
        }

        head
    }

    fn sweep_drops_exactly_live(strategy: TeardownStrategy) {
        let log = Rc::new(RefCell::new(Vec::new()));

        // 10 elements across 3 blocks, the newest only half used.
        let (mut chain, slots, cursor) = carve(10, &log);
        let free_list = free(&slots, &[1, 4, 9, 6]);

        log.borrow_mut().clear();

        let dropped = unsafe { drop_live_elements(&mut chain, free_list, cursor, strategy) };

        assert_eq!(dropped, 6);

        let mut dropped_ids = log.borrow().clone();
        dropped_ids.sort_unstable();
        assert_eq!(dropped_ids, vec![0, 2, 3, 5, 7, 8]);

        assert_eq!(chain.len(), 0);
    }

    #[test]
    fn sorted_free_list_drops_exactly_live() {
        sweep_drops_exactly_live(TeardownStrategy::SortedFreeList);
    }

    #[test]
    fn liveness_bitmap_drops_exactly_live() {
        sweep_drops_exactly_live(TeardownStrategy::LivenessBitmap);
    }

    #[test]
    fn empty_free_list_drops_everything_handed_out() {
        for strategy in [
            TeardownStrategy::SortedFreeList,
            TeardownStrategy::LivenessBitmap,
        ] {
            let log = Rc::new(RefCell::new(Vec::new()));
            let (mut chain, _slots, cursor) = carve(5, &log);

            let dropped = unsafe { drop_live_elements(&mut chain, None, cursor, strategy) };

            assert_eq!(dropped, 5);
            assert_eq!(log.borrow().len(), 5);
        }
    }

    #[test]
    fn fully_freed_pool_drops_nothing() {
        for strategy in [
            TeardownStrategy::SortedFreeList,
            TeardownStrategy::LivenessBitmap,
        ] {
            let log = Rc::new(RefCell::new(Vec::new()));
            let (mut chain, slots, cursor) = carve(8, &log);
            let free_list = free(&slots, &[0, 1, 2, 3, 4, 5, 6, 7]);

            log.borrow_mut().clear();

            let dropped = unsafe { drop_live_elements(&mut chain, free_list, cursor, strategy) };

            assert_eq!(dropped, 0);
            assert!(log.borrow().is_empty());
        }
    }

    #[test]
    fn bitmap_marks_only_free_slots() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let (mut chain, slots, cursor) = carve(8, &log);
        let free_list = free(&slots, &[2, 5]);

        let free_addresses = [slots[2].addr().get(), slots[5].addr().get()];
        let free_slots = FreeSlots::bitmap(&chain, &free_addresses);

        // Position 0 is the newest block, which holds slots 4..8.
        let FreeSlots::Bitmap { free: bits, .. } = &free_slots else {
            panic!("expected a bitmap");
        };
        assert_eq!(bits.count_ones(), 2);
        assert_eq!(bits.len(), 8);

        assert!(free_slots.contains(1, 2, slots[2].addr().get()));
        assert!(free_slots.contains(0, 1, slots[5].addr().get()));
        assert!(!free_slots.contains(1, 1, slots[1].addr().get()));
        assert!(!free_slots.contains(0, 2, slots[6].addr().get()));

        let dropped = unsafe {
            drop_live_elements(
                &mut chain,
                free_list,
                cursor,
                TeardownStrategy::LivenessBitmap,
            )
        };
        assert_eq!(dropped, 6);
    }
}
