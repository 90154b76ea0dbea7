use thiserror::Error;

/// Errors that can occur when a [`SlotPool`][crate::SlotPool] needs more memory.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The backing [`BlockSource`][crate::BlockSource] could not supply a new block.
    ///
    /// The pool is left unchanged: every element allocated so far remains valid and slots that
    /// were returned to the pool can still be reused. Whether to retry (e.g. after freeing memory
    /// elsewhere) is up to the caller.
    #[error(
        "backing allocator could not supply a block of {block_size} bytes aligned to {block_align}"
    )]
    AllocationFailure {
        /// Size in bytes of the block that was requested.
        block_size: usize,

        /// Alignment in bytes of the block that was requested.
        block_align: usize,
    },
}

/// A specialized `Result` type for slot pool operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn allocation_failure_names_requested_block() {
        let error = Error::AllocationFailure {
            block_size: 4096,
            block_align: 16,
        };

        let message = error.to_string();
        assert!(message.contains("4096 bytes"), "{message}");
        assert!(message.contains("aligned to 16"), "{message}");
    }
}
