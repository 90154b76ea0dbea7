//! Integration tests for the `slot_pool` package.
//!
//! These tests exercise `SlotPool` through its public API only, using an instrumented block
//! source to observe block growth and release.

#![allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]

use std::alloc::Layout;
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::num::NonZero;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;

use new_zealand::nz;
use slot_pool::{BlockSource, DropPolicy, Error, GlobalBlocks, SlotPool, TeardownStrategy};

const STRATEGIES: [TeardownStrategy; 2] = [
    TeardownStrategy::SortedFreeList,
    TeardownStrategy::LivenessBitmap,
];

/// Forwards to the global allocator, counting blocks and optionally refusing to grow.
#[derive(Debug, Default)]
struct CountingBlocks {
    grown: Cell<usize>,
    released: Cell<usize>,
    block_limit: Cell<Option<usize>>,
}

unsafe impl BlockSource for CountingBlocks {
    fn allocate_block(&self, layout: Layout) -> Option<NonNull<u8>> {
        if self
            .block_limit
            .get()
            .is_some_and(|limit| self.grown.get() >= limit)
        {
            return None;
        }

        self.grown.set(self.grown.get() + 1);
        GlobalBlocks.allocate_block(layout)
    }

    unsafe fn release_block(&self, block: NonNull<u8>, layout: Layout) {
        self.released.set(self.released.get() + 1);
        unsafe { GlobalBlocks.release_block(block, layout) };
    }
}

thread_local! {
    static DROPPED_IDS: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

/// An 8-byte element that logs its id into a thread-local when dropped.
#[derive(Debug)]
struct Logged(u64);

impl Drop for Logged {
    fn drop(&mut self) {
        DROPPED_IDS.with_borrow_mut(|ids| ids.push(self.0));
    }
}

fn take_dropped_ids() -> Vec<u64> {
    let mut ids = DROPPED_IDS.with_borrow_mut(std::mem::take);
    ids.sort_unstable();
    ids
}

/// Block size that fits exactly `slots` slots of `T` after the block header.
fn block_size_for<T>(slots: usize) -> NonZero<usize> {
    let slot_size = size_of::<T>().max(size_of::<usize>());
    NonZero::new(size_of::<usize>() + slots * slot_size).unwrap()
}

#[test]
fn four_slot_scenario_reuses_freed_slot_and_drops_each_once() {
    for strategy in STRATEGIES {
        _ = take_dropped_ids();
        let blocks = CountingBlocks::default();

        {
            let mut pool = SlotPool::<Logged>::builder()
                .block_size(block_size_for::<Logged>(4))
                .block_source(&blocks)
                .teardown_strategy(strategy)
                .build();

            assert_eq!(pool.block_capacity(), 4);

            let a1 = pool.new_element(Logged(1)).unwrap();
            let a2 = pool.new_element(Logged(2)).unwrap();
            let a3 = pool.new_element(Logged(3)).unwrap();
            let a4 = pool.new_element(Logged(4)).unwrap();
            assert_eq!(blocks.grown.get(), 1);

            unsafe { pool.delete_element(a2) };
            assert_eq!(take_dropped_ids(), vec![2]);

            let reused = pool.new_element(Logged(22)).unwrap();
            assert_eq!(reused, a2);
            assert_eq!(blocks.grown.get(), 1);

            let distinct = [a1, reused, a3, a4].into_iter().collect::<HashSet<_>>();
            assert_eq!(distinct.len(), 4);
        }

        assert_eq!(take_dropped_ids(), vec![1, 3, 4, 22]);
        assert_eq!(blocks.grown.get(), 1);
        assert_eq!(blocks.released.get(), 1);
    }
}

#[test]
fn teardown_drops_exactly_the_live_elements() {
    for strategy in STRATEGIES {
        _ = take_dropped_ids();
        let mut expected_survivors = Vec::new();

        {
            let mut pool = SlotPool::<Logged>::builder()
                .block_size(block_size_for::<Logged>(16))
                .teardown_strategy(strategy)
                .build();

            let elements = (0..100)
                .map(|id| pool.new_element(Logged(id)).unwrap())
                .collect::<Vec<_>>();

            // Delete every id divisible by 3 or 7. Every other deletion is followed by a new
            // element, which lands in the slot that was just freed.
            let mut expected_deleted = Vec::new();
            let mut next_replacement_id = 1000;

            for (id, element) in (0_u64..).zip(&elements) {
                if id % 3 != 0 && id % 7 != 0 {
                    expected_survivors.push(id);
                    continue;
                }

                unsafe { pool.delete_element(*element) };
                expected_deleted.push(id);

                if id % 2 == 0 {
                    let replacement = pool.new_element(Logged(next_replacement_id)).unwrap();
                    assert_eq!(replacement, *element);

                    expected_survivors.push(next_replacement_id);
                    next_replacement_id += 1;
                }
            }

            assert_eq!(take_dropped_ids(), expected_deleted);
            assert_eq!(pool.len(), expected_survivors.len());
        }

        // Every survivor is dropped exactly once and nothing else is.
        expected_survivors.sort_unstable();
        assert_eq!(take_dropped_ids(), expected_survivors);
    }
}

#[test]
fn block_growth_happens_exactly_past_capacity() {
    let blocks = CountingBlocks::default();
    let mut pool = SlotPool::<u64>::builder()
        .block_size(block_size_for::<u64>(8))
        .block_source(&blocks)
        .build();

    let capacity = pool.block_capacity();
    assert_eq!(capacity, 8);

    let first_block = (0..capacity)
        .map(|_| pool.allocate().unwrap())
        .collect::<HashSet<_>>();
    assert_eq!(blocks.grown.get(), 1);
    assert_eq!(pool.block_count(), 1);

    let next = pool.allocate().unwrap();
    assert_eq!(blocks.grown.get(), 2);
    assert_eq!(pool.block_count(), 2);
    assert!(!first_block.contains(&next));

    drop(pool);
    assert_eq!(blocks.released.get(), 2);
}

#[test]
fn trivial_elements_release_every_block_without_sweeping() {
    let blocks = CountingBlocks::default();

    {
        let mut pool = SlotPool::<u64>::builder()
            .block_size(nz!(512))
            .block_source(&blocks)
            .build();

        for _ in 0..10_000 {
            pool.allocate().unwrap();
        }

        let expected_blocks = 10_000_usize.div_ceil(pool.block_capacity());
        assert_eq!(pool.block_count(), expected_blocks);
        assert_eq!(pool.total_reserved_bytes(), expected_blocks * 512);
    }

    assert!(blocks.grown.get() > 1);
    assert_eq!(blocks.released.get(), blocks.grown.get());
}

#[test]
fn allocation_failure_is_reported_and_pool_stays_usable() {
    let blocks = CountingBlocks::default();
    blocks.block_limit.set(Some(1));

    let mut pool = SlotPool::<u64>::builder()
        .block_size(block_size_for::<u64>(2))
        .block_source(&blocks)
        .build();

    let a = pool.new_element(1).unwrap();
    let b = pool.new_element(2).unwrap();

    let error = pool.new_element(3).unwrap_err();
    assert!(matches!(error, Error::AllocationFailure { .. }));
    assert_eq!(pool.len(), 2);
    assert_eq!(pool.block_count(), 1);

    // Freed slots are still served without a new block.
    unsafe { pool.delete_element(a) };
    let c = pool.new_element(3).unwrap();
    assert_eq!(c, a);

    // Once the source recovers, growth resumes.
    blocks.block_limit.set(None);
    let d = pool.new_element(4).unwrap();
    assert_ne!(d, b);
    assert_eq!(pool.block_count(), 2);
}

#[test]
fn allocation_failure_on_first_block() {
    let blocks = CountingBlocks::default();
    blocks.block_limit.set(Some(0));

    let mut pool = SlotPool::<String>::builder().block_source(&blocks).build();

    assert!(pool.allocate().is_err());
    assert!(pool.is_empty());
    assert_eq!(pool.total_reserved_bytes(), 0);

    drop(pool);
    assert_eq!(blocks.released.get(), 0);
}

#[allow(dead_code, reason = "only here for its layout")]
#[repr(align(16))]
struct Align16(u8);

#[allow(dead_code, reason = "only here for its layout")]
#[repr(align(32))]
struct Align32(u8);

#[allow(dead_code, reason = "only here for its layout")]
#[repr(align(64))]
struct Align64([u8; 80]);

fn assert_slots_aligned<T>(block_size: NonZero<usize>) {
    let mut pool = SlotPool::<T>::builder().block_size(block_size).build();

    // Enough to span several blocks and exercise the free list.
    let mut slots = (0..200).map(|_| pool.allocate().unwrap()).collect::<Vec<_>>();

    for slot in slots.drain(50..150) {
        unsafe { pool.deallocate(slot) };
    }

    slots.extend((0..120).map(|_| pool.allocate().unwrap()));

    for slot in &slots {
        assert_eq!(
            slot.addr().get() % align_of::<T>(),
            0,
            "misaligned slot for {}",
            std::any::type_name::<T>()
        );
    }

    for slot in slots {
        unsafe { pool.deallocate(slot) };
    }
}

#[test]
fn slots_satisfy_element_alignment() {
    assert_slots_aligned::<u8>(nz!(256));
    assert_slots_aligned::<u64>(nz!(256));
    assert_slots_aligned::<Align16>(nz!(256));
    assert_slots_aligned::<Align32>(nz!(512));
    assert_slots_aligned::<Align64>(nz!(1024));
}

#[test]
fn over_aligned_block_capacity_accounts_for_header_padding() {
    let pool = SlotPool::<Align64>::builder().block_size(nz!(1024)).build();

    // 80 bytes padded to 128 per slot; the header takes a whole 64-byte alignment unit.
    assert_eq!(pool.block_capacity(), (1024 - 64) / 128);
}

#[test]
fn pool_can_be_moved_after_allocating() {
    let mut pool = SlotPool::<String>::new();
    let element = pool.new_element("moved".to_string()).unwrap();

    let pools = vec![pool];
    let pool = pools.into_iter().next().unwrap();

    assert_eq!(unsafe { element.as_ref() }, "moved");
    assert_eq!(pool.len(), 1);
}

#[test]
fn pool_moves_between_threads() {
    let mut pool = SlotPool::<String>::new();
    let element = pool.new_element("sent".to_string()).unwrap();
    let address = element.addr().get();

    std::thread::spawn(move || {
        let element = pool.allocate().unwrap();
        assert_ne!(element.addr().get(), address);
        unsafe { pool.deallocate(element) };
        assert_eq!(pool.len(), 1);
    })
    .join()
    .unwrap();
}

#[test]
#[should_panic]
fn must_not_drop_items_panics_after_cleanup() {
    let mut pool = SlotPool::<String>::builder()
        .drop_policy(DropPolicy::MustNotDropItems)
        .build();

    pool.new_element("leftover".to_string()).unwrap();
}

/// Panics when dropped if its flag is set.
struct PanicOnDrop(bool);

impl Drop for PanicOnDrop {
    fn drop(&mut self) {
        assert!(!self.0, "element destructor panicked");
    }
}

#[test]
fn panicking_destructor_still_releases_every_block() {
    let blocks = CountingBlocks::default();

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut pool = SlotPool::<PanicOnDrop>::builder()
            .block_size(block_size_for::<PanicOnDrop>(4))
            .block_source(&blocks)
            .build();

        for index in 0..10 {
            pool.new_element(PanicOnDrop(index == 5)).unwrap();
        }
    }));

    result.unwrap_err();
    assert_eq!(blocks.grown.get(), 3);
    assert_eq!(blocks.released.get(), blocks.grown.get());
}
