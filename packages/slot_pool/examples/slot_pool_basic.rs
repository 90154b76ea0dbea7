//! Example that shows the typical lifecycle of elements in a `SlotPool`.
//!
//! Elements are created and deleted individually, freed slots are reused, and whatever is still
//! alive is dropped together with the pool.

use new_zealand::nz;
use slot_pool::SlotPool;

fn main() {
    println!("=== Slot Pool Basic Example ===");

    let mut pool = SlotPool::<String>::builder().block_size(nz!(1024)).build();

    println!(
        "Each block holds {} slots, at most {} slots in total",
        pool.block_capacity(),
        pool.max_capacity()
    );

    let alice = pool.new_element("Alice".to_string()).unwrap();
    let bob = pool.new_element("Bob".to_string()).unwrap();

    // SAFETY: Both elements are live and nothing else references them.
    let (alice_ref, bob_ref) = unsafe { (alice.as_ref(), bob.as_ref()) };
    println!("Created: {alice_ref} and {bob_ref}");

    // SAFETY: The element is live and we do not use the pointer after this.
    unsafe { pool.delete_element(bob) };

    // The slot that held Bob is handed out again.
    let charlie = pool.new_element("Charlie".to_string()).unwrap();
    assert_eq!(charlie, bob);

    // Raw slots can be filled and emptied separately from allocating them.
    let slot = pool.allocate().unwrap();

    // SAFETY: The slot was just allocated from this pool and is uninitialized.
    unsafe { pool.construct(slot, "Dana".to_string()) };

    // SAFETY: The slot holds an initialized element that nothing else references.
    unsafe { pool.destroy(slot) };

    // SAFETY: The slot is allocated and we do not use the pointer after this.
    unsafe { pool.deallocate(slot) };

    // Fill a few blocks to see the pool grow.
    for i in 0..100 {
        pool.new_element(format!("Guest {i}")).unwrap();
    }

    println!(
        "{} live elements in {} blocks, {} bytes reserved",
        pool.len(),
        pool.block_count(),
        pool.total_reserved_bytes()
    );

    // Alice, Charlie and the guests are dropped here.
    drop(pool);

    println!("Slot pool example completed successfully!");
}
