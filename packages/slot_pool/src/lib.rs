//! A fixed-size slot allocator for values of a single type.
//!
//! This crate provides [`SlotPool`], which serves storage for one `T` at a time out of large
//! blocks of memory, so that individual allocations do not go through the general-purpose
//! heap allocator. Freed slots are recycled through an intrusive free list threaded through the
//! slots themselves, so the pool needs no per-slot bookkeeping.
//!
//! # Key Features
//!
//! - **O(1) allocation and deallocation**: recycled slots are popped from a free list, fresh slots
//!   are carved out of the newest block with a bump cursor
//! - **Lazy growth**: the pool requests a new block only when every slot is in use
//! - **Stable addresses**: elements never move; blocks are only released when the pool is dropped
//! - **Exactly-once teardown**: live elements are dropped once when the pool is dropped, freed and
//!   never-used slots are skipped, and types without drop glue skip the sweep entirely
//! - **Pluggable memory**: blocks come from a [`BlockSource`], the global allocator by default
//! - **Configurable teardown**: choose between a sorted free list snapshot and a liveness bitmap
//!   via [`TeardownStrategy`]
//!
//! # Raw slots
//!
//! ```rust
//! use slot_pool::SlotPool;
//!
//! let mut pool = SlotPool::<u64>::new();
//!
//! let slot = pool.allocate().unwrap();
//!
//! // SAFETY: The slot was just allocated from this pool.
//! unsafe { pool.construct(slot, 42) };
//!
//! // SAFETY: The slot holds an initialized u64 that nothing else references.
//! unsafe {
//!     assert_eq!(*slot.as_ref(), 42);
//!     pool.destroy(slot);
//!     pool.deallocate(slot);
//! }
//! ```
//!
//! # Elements
//!
//! ```rust
//! use slot_pool::SlotPool;
//!
//! let mut pool = SlotPool::<String>::new();
//!
//! let first = pool.new_element("first".to_string()).unwrap();
//! let second = pool.new_element("second".to_string()).unwrap();
//!
//! // SAFETY: The element is live and we do not use the pointer after this.
//! unsafe { pool.delete_element(first) };
//!
//! // The freed slot is reused by the next allocation.
//! let third = pool.new_element("third".to_string()).unwrap();
//! assert_eq!(third, first);
//!
//! // `second` and `third` are dropped together with the pool.
//! # _ = second;
//! ```

mod block_chain;
mod block_source;
mod builder;
mod drop_policy;
mod error;
mod pool;
mod slot;
mod teardown;
mod teardown_strategy;

pub(crate) use block_chain::*;
pub use block_source::*;
pub use builder::SlotPoolBuilder;
pub use drop_policy::*;
pub use error::*;
pub use pool::SlotPool;
pub(crate) use slot::*;
pub(crate) use teardown::*;
pub use teardown_strategy::*;
