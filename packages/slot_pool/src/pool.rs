use std::any::type_name;
#[cfg(debug_assertions)]
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::mem::{self, MaybeUninit};
use std::ptr::{self, NonNull};
use std::thread;

#[cfg(debug_assertions)]
use foldhash::{HashSet, HashSetExt};
use tracing::debug;

use crate::{
    BlockChain, BlockGeometry, BlockSource, DropPolicy, GlobalBlocks, Result, Slot,
    SlotPoolBuilder, TeardownStrategy, drop_live_elements,
};

/// A pool of fixed-size slots for values of type `T`, allocated in large blocks.
///
/// The pool hands out uninitialized, correctly aligned storage for one `T` at a time and takes
/// it back for reuse. It requests memory from its [block source][BlockSource] one block at a
/// time, only when it has run out of slots, and releases all of its blocks together when the pool
/// is dropped. In between, allocation and deallocation are O(1) and never touch the block source.
///
/// There are two layers of API:
///
/// * [`allocate()`][1] and [`deallocate()`][2] deal in raw slots. The caller decides when and how
///   to initialize the slot, e.g. via [`construct()`][3] and [`destroy()`][4].
/// * [`new_element()`][5] and [`delete_element()`][6] combine the two, allocating and
///   initializing (or dropping and deallocating) in one step.
///
/// Slots are recycled in last-in, first-out order: the next allocation after a deallocation
/// returns the most recently deallocated slot.
///
/// # Out of band access
///
/// The pool does not keep references to its elements or create new references to them, so it is
/// valid to access elements via the returned pointers and to create custom references (including
/// exclusive references) to them from unsafe code even while holding a reference to the pool.
/// A pointer stays valid until its slot is deallocated or the pool is dropped.
///
/// # Teardown
///
/// When the pool is dropped, every element still live in it (allocated, initialized and not
/// deallocated) is dropped exactly once, unless `T` does not need dropping, in which case the
/// pool only releases its blocks. The pool does not track per-slot state, so it assumes that every
/// allocated slot that has not been deallocated holds an initialized `T`. Either initialize every
/// slot you allocate or deallocate it before dropping the pool.
///
/// See [`DropPolicy`] and [`TeardownStrategy`] for ways to customize this.
///
/// # Thread safety
///
/// The pool is thread-mobile ([`Send`]) but not thread-safe ([`Sync`]). Wrap it in a mutex or
/// use one pool per thread if multiple threads need to allocate.
///
/// The pool is not [`Clone`]. Move it to transfer ownership of its elements.
///
/// # Examples
///
/// ```
/// use slot_pool::SlotPool;
///
/// let mut pool = SlotPool::<String>::new();
///
/// let hello = pool.new_element("Hello".to_string()).unwrap();
/// let world = pool.new_element("World".to_string()).unwrap();
///
/// // SAFETY: Both elements are live and we hold no other references to them.
/// unsafe {
///     assert_eq!(hello.as_ref(), "Hello");
///     assert_eq!(world.as_ref(), "World");
/// }
///
/// // SAFETY: The element is live and we do not use the pointer after this.
/// unsafe { pool.delete_element(hello) };
///
/// assert_eq!(pool.len(), 1);
///
/// // `world` is still live and is dropped together with the pool.
/// ```
///
/// [1]: Self::allocate
/// [2]: Self::deallocate
/// [3]: Self::construct
/// [4]: Self::destroy
/// [5]: Self::new_element
/// [6]: Self::delete_element
pub struct SlotPool<T, S: BlockSource = GlobalBlocks> {
    /// The blocks that provide the storage of the pool, newest first.
    blocks: BlockChain<S>,

    /// The next never-allocated slot in the newest block. Equal to `last_slot` when the newest
    /// block is exhausted, and null before the first block is allocated.
    current_slot: *mut Slot<T>,

    /// One past the last slot of the newest block, or null before the first block is allocated.
    last_slot: *mut Slot<T>,

    /// Head of the intrusive free list. Each free slot stores the address of the next free slot
    /// in its own storage, forming a stack of the most recently deallocated slots.
    free_list: Option<NonNull<Slot<T>>>,

    /// Number of slots that have been allocated and not deallocated.
    len: usize,

    /// Addresses of the slots on the free list, to catch double deallocation.
    #[cfg(debug_assertions)]
    free_set: HashSet<usize>,

    /// First slot address of every block, to catch pointers that did not come from this pool.
    #[cfg(debug_assertions)]
    block_starts: BTreeSet<usize>,

    drop_policy: DropPolicy,
    teardown_strategy: TeardownStrategy,

    // The pool drops `T` values when it is dropped.
    _element: PhantomData<T>,
}

impl<T> SlotPool<T> {
    /// Creates a new [`SlotPool`] with the default configuration.
    ///
    /// The pool starts empty and requests its first block on the first allocation.
    ///
    /// # Examples
    ///
    /// ```
    /// use slot_pool::SlotPool;
    ///
    /// let mut pool = SlotPool::<u64>::new();
    /// assert!(pool.is_empty());
    /// assert_eq!(pool.total_reserved_bytes(), 0);
    ///
    /// pool.new_element(42).unwrap();
    /// assert_eq!(pool.len(), 1);
    /// assert_eq!(pool.total_reserved_bytes(), 4096);
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts building a new [`SlotPool`].
    ///
    /// Use this when you want to customize the pool configuration beyond the defaults.
    ///
    /// # Examples
    ///
    /// ```
    /// use new_zealand::nz;
    /// use slot_pool::{SlotPool, TeardownStrategy};
    ///
    /// let pool = SlotPool::<String>::builder()
    ///     .block_size(nz!(16_384))
    ///     .teardown_strategy(TeardownStrategy::LivenessBitmap)
    ///     .build();
    ///
    /// assert!(pool.is_empty());
    /// ```
    pub fn builder() -> SlotPoolBuilder<T> {
        SlotPoolBuilder::new()
    }
}

impl<T, S: BlockSource> SlotPool<T, S> {
    /// # Panics
    ///
    /// Panics if a block of `block_size` bytes cannot hold at least two slots.
    #[must_use]
    pub(crate) fn new_inner(
        block_size: usize,
        block_source: S,
        drop_policy: DropPolicy,
        teardown_strategy: TeardownStrategy,
    ) -> Self {
        let geometry = BlockGeometry::calculate(block_size, Slot::<T>::layout());

        Self {
            blocks: BlockChain::new(geometry, block_source),
            current_slot: ptr::null_mut(),
            last_slot: ptr::null_mut(),
            free_list: None,
            len: 0,
            #[cfg(debug_assertions)]
            free_set: HashSet::new(),
            #[cfg(debug_assertions)]
            block_starts: BTreeSet::new(),
            drop_policy,
            teardown_strategy,
            _element: PhantomData,
        }
    }

    /// Allocates storage for one `T` and returns a pointer to it.
    ///
    /// The storage is uninitialized. Initialize it via [`construct()`][Self::construct] (or any
    /// other means) before the pool is dropped, or deallocate it again.
    ///
    /// The most recently deallocated slot is reused if there is one. Otherwise the next
    /// never-used slot of the newest block is handed out, requesting a new block from the block
    /// source first if the newest block is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailure`][crate::Error::AllocationFailure] if a new block was
    /// needed and the block source could not supply one. The pool is unchanged in that case.
    ///
    /// # Examples
    ///
    /// ```
    /// use slot_pool::SlotPool;
    ///
    /// let mut pool = SlotPool::<u64>::new();
    ///
    /// let slot = pool.allocate().unwrap();
    ///
    /// // SAFETY: The slot is valid for writes of one u64.
    /// unsafe { slot.write(1234) };
    ///
    /// // SAFETY: We just initialized it.
    /// assert_eq!(unsafe { slot.read() }, 1234);
    /// # // SAFETY: Allocated above, not deallocated yet.
    /// # unsafe { pool.deallocate(slot) };
    /// ```
    #[inline]
    pub fn allocate(&mut self) -> Result<NonNull<T>> {
        let slot = if let Some(slot) = self.free_list {
            // SAFETY: The head of the free list is a free slot.
            self.free_list = unsafe { Slot::next_free(slot) };

            #[cfg(debug_assertions)]
            self.free_set.remove(&slot.addr().get());

            slot
        } else {
            if self.current_slot == self.last_slot {
                self.grow()?;
            }

            let slot = NonNull::new(self.current_slot)
                .expect("the bump cursor is non-null once the pool has a block");

            // SAFETY: The cursor was below `last_slot`, so advancing by one slot stays within
            // (or one past the end of) the current block.
            self.current_slot = unsafe { self.current_slot.add(1) };

            slot
        };

        // Cannot overflow because every live slot occupies distinct memory.
        self.len = self.len.wrapping_add(1);

        Ok(Slot::element_ptr(slot))
    }

    fn grow(&mut self) -> Result<()> {
        let first_slot = self.blocks.grow()?.cast::<Slot<T>>();

        self.current_slot = first_slot.as_ptr();

        #[cfg(debug_assertions)]
        self.block_starts.insert(first_slot.addr().get());

        // SAFETY: The block geometry guarantees that `slot_capacity` slots fit in the block
        // starting from the first slot, so this is at most one past the last of them.
        self.last_slot = unsafe {
            first_slot
                .as_ptr()
                .add(self.blocks.geometry().slot_capacity())
        };

        Ok(())
    }

    /// Returns a slot to the pool for reuse.
    ///
    /// Any element in the slot is not dropped; use [`destroy()`][Self::destroy] first, or
    /// [`delete_element()`][Self::delete_element] to do both in one step.
    ///
    /// # Panics
    ///
    /// In debug builds, panics if `ptr` was not allocated from this pool or is already free.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// * `ptr` was returned by [`allocate()`][Self::allocate] (or
    ///   [`new_element()`][Self::new_element]) on this pool and has not been deallocated since.
    /// * The slot does not contain a live element that still needs to be dropped. Once
    ///   deallocated, the pool will never drop it.
    /// * Neither `ptr` nor any reference derived from it is used after this call.
    #[inline]
    pub unsafe fn deallocate(&mut self, ptr: NonNull<T>) {
        let slot = Slot::from_element_ptr(ptr);

        #[cfg(debug_assertions)]
        self.assert_deallocatable(slot);

        // SAFETY: The caller guarantees the slot is ours and no longer holds a live element.
        unsafe {
            Slot::set_next_free(slot, self.free_list);
        }

        self.free_list = Some(slot);

        self.len = self
            .len
            .checked_sub(1)
            .expect("more slots deallocated than allocated - a slot was deallocated twice");
    }

    /// Moves `value` into the slot at `ptr`.
    ///
    /// Whatever the slot contained before is overwritten without being dropped.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `ptr` was returned by [`allocate()`][Self::allocate] on this
    /// pool and has not been deallocated since.
    #[cfg_attr(
        not(debug_assertions),
        allow(clippy::unused_self, reason = "self is only used for debug build checks")
    )]
    pub unsafe fn construct(&self, ptr: NonNull<T>, value: T) {
        #[cfg(debug_assertions)]
        self.assert_carved(Slot::from_element_ptr(ptr));

        // SAFETY: The caller guarantees the slot is allocated, so valid for writes of one `T`.
        unsafe {
            ptr.write(value);
        }
    }

    /// Initializes the slot at `ptr` in place.
    ///
    /// This allows the caller to initialize the element using a closure that receives a
    /// `&mut MaybeUninit<T>`, which avoids moving large values into the slot.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// * `ptr` was returned by [`allocate()`][Self::allocate] on this pool and has not been
    ///   deallocated since.
    /// * The closure fully initializes the `MaybeUninit<T>` before returning.
    ///
    /// # Examples
    ///
    /// ```
    /// use slot_pool::SlotPool;
    ///
    /// let mut pool = SlotPool::<[u64; 64]>::new();
    ///
    /// let slot = pool.allocate().unwrap();
    ///
    /// // SAFETY: The slot was just allocated and the closure initializes it.
    /// unsafe {
    ///     pool.construct_with(slot, |uninit| {
    ///         uninit.write([7; 64]);
    ///     });
    /// }
    ///
    /// // SAFETY: Initialized above.
    /// assert_eq!(unsafe { slot.as_ref() }[63], 7);
    /// ```
    #[cfg_attr(
        not(debug_assertions),
        allow(clippy::unused_self, reason = "self is only used for debug build checks")
    )]
    pub unsafe fn construct_with(&self, ptr: NonNull<T>, f: impl FnOnce(&mut MaybeUninit<T>)) {
        #[cfg(debug_assertions)]
        self.assert_carved(Slot::from_element_ptr(ptr));

        // SAFETY: The caller guarantees the slot is allocated, so valid for writes of one `T`,
        // and `MaybeUninit<T>` has the same layout as `T`.
        let uninit = unsafe { ptr.cast::<MaybeUninit<T>>().as_mut() };

        f(uninit);
    }

    /// Drops the element in the slot at `ptr` in place, leaving the slot allocated but
    /// uninitialized.
    ///
    /// If `T` does not need dropping, this does nothing.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// * `ptr` was returned by [`allocate()`][Self::allocate] on this pool and has not been
    ///   deallocated since.
    /// * The slot contains an initialized `T` that is not referenced anywhere else.
    /// * The slot is either initialized again or deallocated before the pool is dropped.
    #[cfg_attr(
        not(debug_assertions),
        allow(clippy::unused_self, reason = "self is only used for debug build checks")
    )]
    pub unsafe fn destroy(&self, ptr: NonNull<T>) {
        if const { mem::needs_drop::<T>() } {
            #[cfg(debug_assertions)]
            self.assert_carved(Slot::from_element_ptr(ptr));

            // SAFETY: The caller guarantees the slot holds an initialized, unaliased `T`.
            unsafe {
                ptr.drop_in_place();
            }
        }
    }

    /// Allocates a slot and moves `value` into it, returning a pointer to the live element.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailure`][crate::Error::AllocationFailure] if a new block was
    /// needed and the block source could not supply one. `value` is dropped in that case.
    ///
    /// # Examples
    ///
    /// ```
    /// use slot_pool::SlotPool;
    ///
    /// let mut pool = SlotPool::<String>::new();
    ///
    /// let greeting = pool.new_element("Hello".to_string()).unwrap();
    ///
    /// // SAFETY: The element is live and not mutably aliased.
    /// assert_eq!(unsafe { greeting.as_ref() }, "Hello");
    /// ```
    #[inline]
    pub fn new_element(&mut self, value: T) -> Result<NonNull<T>> {
        let ptr = self.allocate()?;

        // SAFETY: The slot was just allocated from this pool.
        unsafe {
            self.construct(ptr, value);
        }

        Ok(ptr)
    }

    /// Drops the element at `ptr` and returns its slot to the pool for reuse.
    ///
    /// # Panics
    ///
    /// In debug builds, panics if `ptr` was not allocated from this pool or is already free.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// * `ptr` was returned by [`new_element()`][Self::new_element] (or allocated and then
    ///   initialized) on this pool and has not been deallocated since.
    /// * The element is not referenced anywhere else and neither `ptr` nor any reference derived
    ///   from it is used after this call.
    #[inline]
    pub unsafe fn delete_element(&mut self, ptr: NonNull<T>) {
        // SAFETY: Forwarding the caller's guarantees.
        unsafe {
            self.destroy(ptr);
        }

        // SAFETY: The element was dropped above, so the slot no longer holds a live element.
        unsafe {
            self.deallocate(ptr);
        }
    }

    /// The number of slots in each block.
    ///
    /// # Examples
    ///
    /// ```
    /// use slot_pool::SlotPool;
    ///
    /// let pool = SlotPool::<u64>::new();
    ///
    /// // A 4096-byte block minus an 8-byte header, in 8-byte slots.
    /// assert_eq!(pool.block_capacity(), 511);
    /// ```
    #[must_use]
    pub fn block_capacity(&self) -> usize {
        self.blocks.geometry().slot_capacity()
    }

    /// The largest number of elements the pool could theoretically hold: slots per block times
    /// the number of blocks that fit in the address space.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Diagnostics only, a theoretical limit nothing relies on.
    pub fn max_capacity(&self) -> usize {
        self.blocks.geometry().max_capacity()
    }

    /// The total number of bytes the pool has obtained from its block source.
    ///
    /// This walks the block chain, so takes time proportional to the number of blocks.
    #[must_use]
    pub fn total_reserved_bytes(&self) -> usize {
        self.block_count()
            .saturating_mul(self.blocks.geometry().block_layout().size())
    }

    /// The number of blocks the pool has obtained from its block source.
    ///
    /// This walks the block chain, so takes time proportional to the number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// The configured size of each block, in bytes.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.blocks.geometry().block_layout().size()
    }

    /// The number of slots that have been allocated and not yet deallocated.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the pool has no allocated slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Panics unless `slot` is a slot that the bump cursor has already handed out.
    #[cfg(debug_assertions)]
    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[allow(
        clippy::arithmetic_side_effects,
        clippy::modulo_arithmetic,
        reason = "all operands are bounded by the block geometry"
    )]
    fn assert_carved(&self, slot: NonNull<Slot<T>>) {
        let address = slot.addr().get();
        let slot_size = self.blocks.geometry().slot_size();
        let block_span = slot_size * self.blocks.geometry().slot_capacity();
        let newest_start = self.blocks.first_slots().next().map(|first| first.addr().get());

        let carved = self
            .block_starts
            .range(..=address)
            .next_back()
            .is_some_and(|&start| {
                // Only the newest block has slots the bump cursor has not reached yet.
                let end = if Some(start) == newest_start {
                    self.current_slot.addr()
                } else {
                    start + block_span
                };

                address < end && (address - start) % slot_size == 0
            });

        assert!(
            carved,
            "{slot:?} is not a slot that was allocated from this pool of {}",
            type_name::<T>()
        );
    }

    /// Panics unless `slot` is a handed-out slot that is not on the free list, then records it
    /// as free.
    #[cfg(debug_assertions)]
    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    fn assert_deallocatable(&mut self, slot: NonNull<Slot<T>>) {
        self.assert_carved(slot);

        assert!(
            self.free_set.insert(slot.addr().get()),
            "{slot:?} was deallocated twice in pool of {}",
            type_name::<T>()
        );
    }
}

impl<T> Default for SlotPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, S: BlockSource> std::fmt::Debug for SlotPool<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotPool")
            .field("element_type", &std::format_args!("{}", type_name::<T>()))
            .field("block_size", &self.block_size())
            .field("block_capacity", &self.block_capacity())
            .field("block_count", &self.block_count())
            .field("len", &self.len)
            .field("drop_policy", &self.drop_policy)
            .field("teardown_strategy", &self.teardown_strategy)
            .finish_non_exhaustive()
    }
}

impl<T, S: BlockSource> Drop for SlotPool<T, S> {
    fn drop(&mut self) {
        let live = self.len;

        debug!(
            element_type = type_name::<T>(),
            blocks = self.blocks.len(),
            live,
            strategy = ?self.teardown_strategy,
            "tearing down slot pool"
        );

        if const { mem::needs_drop::<T>() } {
            // SAFETY: The free list and cursor describe our own blocks, and every handed-out slot
            // that is not free holds a live element (a documented requirement of our API).
            let dropped = unsafe {
                drop_live_elements(
                    &mut self.blocks,
                    self.free_list,
                    self.current_slot,
                    self.teardown_strategy,
                )
            };

            debug_assert_eq!(
                dropped,
                live,
                "teardown of pool of {} dropped a different number of elements than were live",
                type_name::<T>()
            );
        } else {
            self.blocks.release_all(|_, _| {});
        }

        self.free_list = None;
        self.current_slot = ptr::null_mut();
        self.last_slot = ptr::null_mut();
        self.len = 0;

        // We do this check at the end so we clean up the memory first. If we are already
        // panicking, we do not want to panic again because that will simply obscure whatever
        // the original panic was, leading to debug difficulties.
        if self.drop_policy == DropPolicy::MustNotDropItems && !thread::panicking() {
            assert!(
                live == 0,
                "dropped a pool of {} with {live} live elements and a policy that says it must be empty when dropped",
                type_name::<T>()
            );
        }
    }
}

// SAFETY: The raw pointers refer to memory owned exclusively by the pool, so moving the pool
// to another thread moves everything it points to. As long as `T` and the block source can move
// between threads, the pool can, too.
unsafe impl<T: Send, S: BlockSource + Send> Send for SlotPool<T, S> {}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::indexing_slicing,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::cell::Cell;
    use std::collections::HashSet;
    use std::rc::Rc;
    use std::sync::{Arc, Mutex};

    use new_zealand::nz;
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(SlotPool<u32>: Send, std::fmt::Debug, Default);
    assert_not_impl_any!(SlotPool<u32>: Sync, Clone, Copy);
    assert_not_impl_any!(SlotPool<Rc<u32>>: Send);

    /// Counts how many times values of this type have been dropped.
    struct DropCounter {
        drops: Rc<Cell<usize>>,
    }

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    #[test]
    fn smoke_test() {
        let mut pool = SlotPool::<u32>::new();

        let a = pool.new_element(42).unwrap();
        let b = pool.new_element(43).unwrap();
        let c = pool.new_element(44).unwrap();

        unsafe {
            assert_eq!(*a.as_ref(), 42);
            assert_eq!(*b.as_ref(), 43);
            assert_eq!(*c.as_ref(), 44);
        }

        assert_eq!(pool.len(), 3);

        unsafe { pool.delete_element(b) };

        assert_eq!(pool.len(), 2);

        let d = pool.new_element(45).unwrap();

        unsafe {
            assert_eq!(*a.as_ref(), 42);
            assert_eq!(*c.as_ref(), 44);
            assert_eq!(*d.as_ref(), 45);
        }
    }

    #[test]
    fn empty_pool_owns_no_blocks() {
        let pool = SlotPool::<u64>::new();

        assert!(pool.is_empty());
        assert_eq!(pool.block_count(), 0);
        assert_eq!(pool.total_reserved_bytes(), 0);
        assert!(pool.current_slot.is_null());
        assert!(pool.last_slot.is_null());
    }

    #[test]
    fn first_allocation_grows_one_block() {
        let mut pool = SlotPool::<u64>::new();

        let slot = pool.allocate().unwrap();

        assert_eq!(pool.block_count(), 1);
        assert_eq!(pool.total_reserved_bytes(), 4096);

        unsafe { pool.deallocate(slot) };
    }

    #[test]
    fn deallocated_slot_is_reused_first() {
        let mut pool = SlotPool::<u64>::new();

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();

        unsafe {
            pool.deallocate(a);
            pool.deallocate(c);
        }

        // Last in, first out.
        assert_eq!(pool.allocate().unwrap(), c);
        assert_eq!(pool.allocate().unwrap(), a);

        // Free list exhausted, back to the bump cursor.
        let d = pool.allocate().unwrap();
        assert_ne!(d, a);
        assert_ne!(d, b);
        assert_ne!(d, c);
    }

    #[test]
    fn bump_allocation_is_contiguous() {
        let mut pool = SlotPool::<u64>::new();

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();

        assert_eq!(b.addr().get() - a.addr().get(), Slot::<u64>::layout().size());
    }

    #[test]
    fn live_addresses_are_unique() {
        let mut pool = SlotPool::<u64>::builder().block_size(nz!(128)).build();
        let mut live = Vec::new();

        for round in 0..50 {
            for _ in 0..7 {
                live.push(pool.allocate().unwrap());
            }

            // Free every third live slot to keep the free list busy.
            let mut index = round % 3;
            while index < live.len() {
                let slot = live.swap_remove(index);
                unsafe { pool.deallocate(slot) };
                index += 3;
            }

            let distinct = live.iter().copied().collect::<HashSet<_>>();
            assert_eq!(distinct.len(), live.len());
            assert_eq!(pool.len(), live.len());
        }
    }

    #[test]
    fn construct_then_destroy_drops_once() {
        let drops = Rc::new(Cell::new(0));
        let mut pool = SlotPool::<DropCounter>::new();

        let slot = pool.allocate().unwrap();

        unsafe {
            pool.construct(
                slot,
                DropCounter {
                    drops: Rc::clone(&drops),
                },
            );
            pool.destroy(slot);
        }

        assert_eq!(drops.get(), 1);

        // The slot is still allocated but holds nothing, so it must be deallocated before
        // the pool is dropped.
        unsafe { pool.deallocate(slot) };
        drop(pool);

        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn construct_with_initializes_in_place() {
        let mut pool = SlotPool::<[u32; 16]>::new();

        let slot = pool.allocate().unwrap();

        unsafe {
            pool.construct_with(slot, |uninit| {
                uninit.write([9; 16]);
            });

            assert_eq!(slot.as_ref()[15], 9);
        }
    }

    #[test]
    fn destroy_without_drop_glue_leaves_value() {
        let mut pool = SlotPool::<u64>::new();

        let slot = pool.new_element(77).unwrap();

        unsafe {
            pool.destroy(slot);

            // Nothing to drop for u64, so the bytes are untouched.
            assert_eq!(slot.read(), 77);
        }
    }

    #[test]
    fn delete_element_drops_once() {
        let drops = Rc::new(Cell::new(0));
        let mut pool = SlotPool::<DropCounter>::new();

        let slot = pool
            .new_element(DropCounter {
                drops: Rc::clone(&drops),
            })
            .unwrap();

        unsafe { pool.delete_element(slot) };
        assert_eq!(drops.get(), 1);

        // Reusing the slot must not disturb the free list.
        let again = pool.allocate().unwrap();
        assert_eq!(again, slot);
        unsafe { pool.deallocate(again) };

        drop(pool);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn drop_runs_destructors_of_live_elements() {
        let drops = Rc::new(Cell::new(0));

        {
            let mut pool = SlotPool::<DropCounter>::builder()
                .block_size(nz!(64))
                .build();

            let mut elements = Vec::new();
            for _ in 0..20 {
                elements.push(
                    pool.new_element(DropCounter {
                        drops: Rc::clone(&drops),
                    })
                    .unwrap(),
                );
            }

            for element in elements.drain(..5) {
                unsafe { pool.delete_element(element) };
            }

            assert_eq!(drops.get(), 5);
        }

        assert_eq!(drops.get(), 20);
    }

    #[test]
    fn zero_sized_elements_get_distinct_slots() {
        let mut pool = SlotPool::<()>::new();

        let a = pool.new_element(()).unwrap();
        let b = pool.new_element(()).unwrap();

        assert_ne!(a, b);
        assert_eq!(pool.block_capacity(), 511);
    }

    #[test]
    fn block_capacity_matches_geometry() {
        let pool = SlotPool::<[u8; 24]>::builder()
            .block_size(nz!(248))
            .build();

        // [u8; 24] has alignment 1 but the slot takes pointer alignment from the link.
        assert_eq!(pool.block_capacity(), 10);
        assert_eq!(pool.block_size(), 8 + 24 * 10);
    }

    #[test]
    fn max_capacity_is_blocks_times_capacity() {
        let pool = SlotPool::<u64>::new();

        assert_eq!(pool.max_capacity(), 511 * (usize::MAX / 4096));
    }

    #[test]
    fn in_mutex_across_threads() {
        let pool = Arc::new(Mutex::new(SlotPool::<u64>::new()));

        let address = {
            let mut pool = pool.lock().unwrap();
            pool.new_element(5).unwrap().addr().get()
        };

        let pool_clone = Arc::clone(&pool);
        std::thread::spawn(move || {
            let mut pool = pool_clone.lock().unwrap();
            let other = pool.new_element(6).unwrap();
            assert_ne!(other.addr().get(), address);
        })
        .join()
        .unwrap();

        assert_eq!(pool.lock().unwrap().len(), 2);
    }

    #[test]
    fn debug_output_describes_pool() {
        let mut pool = SlotPool::<u16>::new();
        pool.new_element(1).unwrap();

        let debug = format!("{pool:?}");
        assert!(debug.contains("u16"), "{debug}");
        assert!(debug.contains("block_count: 1"), "{debug}");
        assert!(debug.contains("len: 1"), "{debug}");
    }

    #[test]
    #[should_panic]
    fn drop_live_with_forbidden_to_drop_policy_panics() {
        let mut pool = SlotPool::<u32>::builder()
            .drop_policy(DropPolicy::MustNotDropItems)
            .build();

        pool.new_element(123).unwrap();
    }

    #[test]
    fn drop_empty_with_forbidden_to_drop_policy_ok() {
        let mut pool = SlotPool::<u32>::builder()
            .drop_policy(DropPolicy::MustNotDropItems)
            .build();

        let element = pool.new_element(123).unwrap();
        unsafe { pool.delete_element(element) };
    }

    #[test]
    fn deallocating_many_slots_then_reusing_them() {
        let mut pool = SlotPool::<u64>::new();

        let slots = (0..50_000)
            .map(|_| pool.allocate().unwrap())
            .collect::<Vec<_>>();
        let blocks = pool.block_count();

        for slot in slots {
            unsafe { pool.deallocate(slot) };
        }

        assert!(pool.is_empty());

        // Every freed slot is served again before the pool grows.
        for _ in 0..50_000 {
            pool.allocate().unwrap();
        }

        assert_eq!(pool.block_count(), blocks);
        assert_eq!(pool.len(), 50_000);
    }

    #[test]
    fn reused_slot_can_be_deallocated_again() {
        let mut pool = SlotPool::<u64>::new();

        let slot = pool.allocate().unwrap();
        unsafe { pool.deallocate(slot) };

        let again = pool.allocate().unwrap();
        assert_eq!(again, slot);

        // Not a double free: the slot left the free list when it was handed out again.
        unsafe { pool.deallocate(again) };
        assert!(pool.is_empty());
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic]
    fn deallocate_beyond_bump_cursor_panics_in_debug() {
        let mut pool = SlotPool::<u64>::new();

        let slot = pool.allocate().unwrap();

        // The next slot in the block has not been handed out yet.
        let untouched = unsafe { slot.add(1) };
        unsafe { pool.deallocate(untouched) };
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic]
    fn double_deallocate_panics_in_debug() {
        let mut pool = SlotPool::<u64>::new();

        let slot = pool.allocate().unwrap();
        let _other = pool.allocate().unwrap();

        unsafe {
            pool.deallocate(slot);
            pool.deallocate(slot);
        }
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic]
    fn foreign_deallocate_panics_in_debug() {
        let mut pool = SlotPool::<u64>::new();
        let mut other = SlotPool::<u64>::new();

        let foreign = other.allocate().unwrap();
        _ = pool.allocate().unwrap();

        unsafe { pool.deallocate(foreign) };
    }
}
