/// Determines what happens to elements that are still live when a pool is dropped.
///
/// By default, the pool drops its remaining elements when it is dropped.
///
/// # Examples
///
/// ```
/// use slot_pool::{DropPolicy, SlotPool};
///
/// // The drop policy is set at pool creation time.
/// let pool = SlotPool::<u32>::builder()
///     .drop_policy(DropPolicy::MustNotDropItems)
///     .build();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// Live elements are dropped in place when the pool is dropped. This is the default.
    #[default]
    MayDropItems,

    /// The pool will panic if it still contains live elements when it is dropped.
    ///
    /// The elements are still dropped and all blocks are released before the panic. This is
    /// useful when pointers to pool elements are shared with code that must be finished with
    /// them before the pool goes away.
    MustNotDropItems,
}
