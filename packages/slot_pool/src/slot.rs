use std::alloc::Layout;
use std::iter;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;

/// Storage for one pool element.
///
/// A slot either holds a live element or, while it sits on the pool's free list, the link to the
/// next free slot. Which of the two is current is not recorded anywhere in the slot; the pool
/// derives it from its own bookkeeping.
///
/// Both fields live at offset zero, so a pointer to a slot is also a pointer to its element.
#[repr(C)]
pub(crate) union Slot<T> {
    #[expect(
        dead_code,
        reason = "only shapes the slot layout; elements are accessed through cast pointers"
    )]
    element: ManuallyDrop<T>,
    next_free: Option<NonNull<Slot<T>>>,
}

impl<T> Slot<T> {
    /// Size and alignment of one slot: the larger of the element and a free list link,
    /// with the size padded to a multiple of the alignment.
    #[must_use]
    pub(crate) const fn layout() -> Layout {
        Layout::new::<Self>()
    }

    /// Reads the free list link stored in a free slot.
    ///
    /// # Safety
    ///
    /// The slot must be on the free list, i.e. its link must have been written by
    /// [`set_next_free()`][Self::set_next_free] and not overwritten by an element since.
    #[must_use]
    pub(crate) unsafe fn next_free(slot: NonNull<Self>) -> Option<NonNull<Self>> {
        // SAFETY: The caller guarantees the link field is the one currently initialized.
        unsafe { (*slot.as_ptr()).next_free }
    }

    /// Turns the slot into a free list node pointing at `next`.
    ///
    /// # Safety
    ///
    /// The slot must be valid for writes and must not hold a live element (any element it held
    /// must already have been dropped or moved out).
    pub(crate) unsafe fn set_next_free(slot: NonNull<Self>, next: Option<NonNull<Self>>) {
        // SAFETY: Writing a `Copy` union field never drops the previous contents, and the caller
        // guarantees the slot is writable.
        unsafe {
            (*slot.as_ptr()).next_free = next;
        }
    }

    /// Walks a free list from its head, yielding every free slot in list order.
    ///
    /// # Safety
    ///
    /// Every slot reachable from `head` must be on the free list and must stay there for as long
    /// as the iterator is used.
    pub(crate) unsafe fn walk_free_list(
        head: Option<NonNull<Self>>,
    ) -> impl Iterator<Item = NonNull<Self>> {
        iter::successors(head, |slot| {
            // SAFETY: The caller guarantees that every reachable slot is a free list node.
            unsafe { Self::next_free(*slot) }
        })
    }

    /// Reinterprets a slot pointer as a pointer to its element.
    #[must_use]
    pub(crate) const fn element_ptr(slot: NonNull<Self>) -> NonNull<T> {
        slot.cast()
    }

    /// Reinterprets an element pointer handed out by the pool as a pointer to its slot.
    #[must_use]
    pub(crate) const fn from_element_ptr(element: NonNull<T>) -> NonNull<Self> {
        element.cast()
    }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::mem::MaybeUninit;

    use super::*;

    #[repr(align(64))]
    struct CacheLine {
        _bytes: [u8; 64],
    }

    #[test]
    fn small_elements_get_a_pointer_sized_slot() {
        assert_eq!(Slot::<u8>::layout(), Layout::new::<usize>());
        assert_eq!(Slot::<()>::layout(), Layout::new::<usize>());
    }

    #[test]
    fn large_elements_keep_their_own_layout() {
        assert_eq!(Slot::<[u64; 5]>::layout().size(), 40);
        assert_eq!(Slot::<CacheLine>::layout().size(), 64);
        assert_eq!(Slot::<CacheLine>::layout().align(), 64);
    }

    #[test]
    fn odd_sized_elements_are_padded_to_alignment() {
        // 9 bytes of payload, 8-byte alignment from the link field.
        assert_eq!(Slot::<[u8; 9]>::layout().size(), 16);
        assert_eq!(Slot::<[u8; 9]>::layout().align(), align_of::<usize>());
    }

    #[test]
    fn free_link_round_trips_through_slot() {
        let mut storage = [MaybeUninit::<Slot<u64>>::uninit(), MaybeUninit::uninit()];
        let first = NonNull::from(&mut storage[0]).cast::<Slot<u64>>();
        let second = NonNull::from(&mut storage[1]).cast::<Slot<u64>>();

        unsafe {
            Slot::set_next_free(first, Some(second));
            Slot::set_next_free(second, None);

            assert_eq!(Slot::next_free(first), Some(second));
            assert_eq!(Slot::next_free(second), None);

            let walked = Slot::walk_free_list(Some(first)).collect::<Vec<_>>();
            assert_eq!(walked, vec![first, second]);

            assert_eq!(Slot::<u64>::walk_free_list(None).count(), 0);
        }
    }

    #[test]
    fn element_pointer_is_slot_pointer() {
        let mut storage = MaybeUninit::<Slot<u32>>::uninit();
        let slot = NonNull::from(&mut storage).cast::<Slot<u32>>();

        let element = Slot::element_ptr(slot);
        assert_eq!(element.addr(), slot.addr());
        assert_eq!(Slot::from_element_ptr(element), slot);
    }
}
