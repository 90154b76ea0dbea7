use std::marker::PhantomData;
use std::num::NonZero;

use new_zealand::nz;

use crate::{BlockSource, DropPolicy, GlobalBlocks, SlotPool, TeardownStrategy};

/// Block size used when none is configured.
pub(crate) const DEFAULT_BLOCK_SIZE: NonZero<usize> = nz!(4096);

/// Builder for creating an instance of [`SlotPool`].
///
/// You only need to use this builder if you want to customize the pool configuration.
/// The default configuration used by [`SlotPool::new()`][1] is sufficient for most use cases.
///
/// # Examples
///
/// ```
/// use new_zealand::nz;
/// use slot_pool::{DropPolicy, SlotPool};
///
/// let pool = SlotPool::<u32>::builder()
///     .block_size(nz!(65_536))
///     .drop_policy(DropPolicy::MustNotDropItems)
///     .build();
///
/// assert_eq!(pool.block_size(), 64 * 1024);
/// ```
///
/// [1]: SlotPool::new
#[must_use]
pub struct SlotPoolBuilder<T, S = GlobalBlocks> {
    block_size: NonZero<usize>,
    block_source: S,
    drop_policy: DropPolicy,
    teardown_strategy: TeardownStrategy,

    _element: PhantomData<T>,
}

impl<T, S> std::fmt::Debug for SlotPoolBuilder<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotPoolBuilder")
            .field(
                "element_type",
                &std::format_args!("{}", std::any::type_name::<T>()),
            )
            .field("block_size", &self.block_size)
            .field("drop_policy", &self.drop_policy)
            .field("teardown_strategy", &self.teardown_strategy)
            .finish_non_exhaustive()
    }
}

impl<T> SlotPoolBuilder<T> {
    pub(crate) fn new() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            block_source: GlobalBlocks,
            drop_policy: DropPolicy::default(),
            teardown_strategy: TeardownStrategy::default(),
            _element: PhantomData,
        }
    }
}

impl<T, S: BlockSource> SlotPoolBuilder<T, S> {
    /// Sets the size in bytes of each block the pool requests from its block source.
    ///
    /// Every block spends a pointer-sized header (padded to the slot alignment) on linking
    /// blocks together; the rest is divided into slots. The block must have room for at least
    /// two slots, which is checked in [`build()`][Self::build].
    ///
    /// The default is 4096 bytes.
    ///
    /// # Examples
    ///
    /// ```
    /// use new_zealand::nz;
    /// use slot_pool::SlotPool;
    ///
    /// let pool = SlotPool::<u64>::builder().block_size(nz!(1024)).build();
    ///
    /// // One 8-byte header, 127 slots of 8 bytes.
    /// assert_eq!(pool.block_capacity(), 127);
    /// ```
    #[inline]
    pub fn block_size(mut self, block_size: NonZero<usize>) -> Self {
        self.block_size = block_size;
        self
    }

    /// Sets the [block source][BlockSource] the pool obtains its memory from.
    ///
    /// The default is [`GlobalBlocks`], which uses the Rust global allocator.
    #[inline]
    pub fn block_source<S2: BlockSource>(self, block_source: S2) -> SlotPoolBuilder<T, S2> {
        SlotPoolBuilder {
            block_size: self.block_size,
            block_source,
            drop_policy: self.drop_policy,
            teardown_strategy: self.teardown_strategy,
            _element: PhantomData,
        }
    }

    /// Sets the [drop policy][DropPolicy] for the pool. This governs how
    /// to treat remaining elements in the pool when the pool is dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// use slot_pool::{DropPolicy, SlotPool};
    ///
    /// let pool = SlotPool::<u32>::builder()
    ///     .drop_policy(DropPolicy::MustNotDropItems)
    ///     .build();
    /// ```
    #[inline]
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Sets the [teardown strategy][TeardownStrategy] used to find the live elements that
    /// need to be dropped when the pool is dropped.
    #[inline]
    pub fn teardown_strategy(mut self, strategy: TeardownStrategy) -> Self {
        self.teardown_strategy = strategy;
        self
    }

    /// Builds the slot pool with the specified configuration.
    ///
    /// No memory is requested from the block source until the first allocation.
    ///
    /// # Panics
    ///
    /// Panics if a block of the configured size cannot hold at least two slots.
    ///
    /// # Examples
    ///
    /// ```
    /// use slot_pool::SlotPool;
    ///
    /// let pool = SlotPool::<u32>::builder().build();
    /// assert_eq!(pool.block_count(), 0);
    /// ```
    #[must_use]
    pub fn build(self) -> SlotPool<T, S> {
        SlotPool::new_inner(
            self.block_size.get(),
            self.block_source,
            self.drop_policy,
            self.teardown_strategy,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let builder = SlotPoolBuilder::<u64>::new();

        assert_eq!(builder.block_size, DEFAULT_BLOCK_SIZE);
        assert_eq!(builder.drop_policy, DropPolicy::MayDropItems);
        assert_eq!(builder.teardown_strategy, TeardownStrategy::SortedFreeList);
    }

    #[test]
    fn debug_names_element_type() {
        let builder = SlotPool::<String>::builder();

        let debug = format!("{builder:?}");
        assert!(debug.contains("String"), "{debug}");
        assert!(debug.contains("4096"), "{debug}");
    }

    #[test]
    fn block_source_keeps_other_settings() {
        let source = GlobalBlocks;

        let builder = SlotPool::<u64>::builder()
            .block_size(nz!(512))
            .drop_policy(DropPolicy::MustNotDropItems)
            .teardown_strategy(TeardownStrategy::LivenessBitmap)
            .block_source(&source);

        assert_eq!(builder.block_size.get(), 512);
        assert_eq!(builder.drop_policy, DropPolicy::MustNotDropItems);
        assert_eq!(builder.teardown_strategy, TeardownStrategy::LivenessBitmap);
    }

    #[test]
    #[should_panic]
    fn block_too_small_for_two_slots_panics() {
        // 8-byte header plus one 8-byte slot.
        drop(SlotPool::<u64>::builder().block_size(nz!(16)).build());
    }
}
