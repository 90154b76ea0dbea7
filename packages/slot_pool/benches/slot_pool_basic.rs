//! Basic benchmarks for the `slot_pool` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::iter;
use std::time::Instant;

use alloc_tracker::Allocator;
use criterion::{Criterion, criterion_group, criterion_main};
use slot_pool::{SlotPool, TeardownStrategy};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

type TestItem = u64;
const TEST_VALUE: TestItem = 1024;

fn entrypoint(c: &mut Criterion) {
    let allocs = alloc_tracker::Session::new();

    let mut group = c.benchmark_group("slot_pool_basic");

    let allocs_op = allocs.operation("build_empty");
    group.bench_function("build_empty", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(SlotPool::<TestItem>::new()));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("new_element_first");
    group.bench_function("new_element_first", |b| {
        b.iter_custom(|iters| {
            let mut pools = iter::repeat_with(SlotPool::<TestItem>::new)
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for pool in &mut pools {
                _ = black_box(pool.new_element(black_box(TEST_VALUE)));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("new_element_second");
    group.bench_function("new_element_second", |b| {
        b.iter_custom(|iters| {
            let mut pools = iter::repeat_with(SlotPool::<TestItem>::new)
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            // Pre-warm each pool with one element, so the first block already exists.
            for pool in &mut pools {
                _ = pool.new_element(TEST_VALUE).unwrap();
            }

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for pool in &mut pools {
                _ = black_box(pool.new_element(black_box(TEST_VALUE)));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("delete_then_reuse");
    group.bench_function("delete_then_reuse", |b| {
        let mut pool = SlotPool::<TestItem>::new();
        let mut element = pool.new_element(TEST_VALUE).unwrap();

        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                // SAFETY: The element is live and we replace the pointer right away.
                unsafe { pool.delete_element(black_box(element)) };
                element = black_box(pool.new_element(black_box(TEST_VALUE)).unwrap());
            }

            start.elapsed()
        });
    });

    for strategy in [
        TeardownStrategy::SortedFreeList,
        TeardownStrategy::LivenessBitmap,
    ] {
        let name = format!("drop_half_freed_{strategy:?}");

        let allocs_op = allocs.operation(&name);
        group.bench_function(&name, |b| {
            b.iter_custom(|iters| {
                let pools = iter::repeat_with(|| half_freed_pool(strategy))
                    .take(usize::try_from(iters).unwrap())
                    .collect::<Vec<_>>();

                let _span = allocs_op.measure_thread().iterations(iters);

                let start = Instant::now();

                for pool in pools {
                    drop(black_box(pool));
                }

                start.elapsed()
            });
        });
    }

    group.finish();

    allocs.print_to_stdout();
}

/// A pool of strings where every other element has been deleted, so teardown has to tell live
/// slots from free ones.
fn half_freed_pool(strategy: TeardownStrategy) -> SlotPool<String> {
    let mut pool = SlotPool::<String>::builder()
        .teardown_strategy(strategy)
        .build();

    let elements = (0..1000)
        .map(|_| pool.new_element(String::new()).unwrap())
        .collect::<Vec<_>>();

    for element in elements.into_iter().step_by(2) {
        // SAFETY: Each element is live and deleted only once.
        unsafe { pool.delete_element(element) };
    }

    pool
}
