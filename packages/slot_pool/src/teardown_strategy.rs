/// Determines how a pool tells live slots apart from free ones when it is dropped.
///
/// Slots carry no per-slot state tag, so at teardown the pool reconstructs which slots still hold
/// a live element from its free list. This only matters for element types that need dropping;
/// for other types the pool releases its blocks without looking at individual slots.
///
/// # Examples
///
/// ```
/// use slot_pool::{SlotPool, TeardownStrategy};
///
/// let pool = SlotPool::<String>::builder()
///     .teardown_strategy(TeardownStrategy::LivenessBitmap)
///     .build();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum TeardownStrategy {
    /// Snapshots the free list into a sorted array of addresses and binary searches it for
    /// every slot that was ever handed out. This is the default.
    ///
    /// Needs one pointer of temporary memory per free slot.
    #[default]
    SortedFreeList,

    /// Marks every free slot in a per-block bitmap and checks one bit per slot.
    ///
    /// Needs one bit of temporary memory per slot in the pool, trading that for constant-time
    /// lookups during the sweep. Preferable when many slots are free at teardown.
    LivenessBitmap,
}
