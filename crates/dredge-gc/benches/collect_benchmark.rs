//! Collection cycle cost at varying live/garbage ratios.
//!
//! Stack scanning is disabled so each iteration measures marking and
//! sweeping of a known block population, not whatever the bench harness
//! happens to have on its stack.

use std::hint::black_box;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use dredge_gc::{Heap, HeapConfig};

fn quiet_heap(capacity: usize) -> Heap {
    Heap::with_config(HeapConfig::new().capacity(capacity).scan_stack(false))
        .expect("failed to map heap")
}

fn bench_sweep_all_garbage(c: &mut Criterion) {
    for count in [100usize, 1000, 10_000] {
        c.bench_function(&format!("sweep_{count}_garbage_blocks"), |b| {
            let mut heap = quiet_heap(32 * 1024 * 1024);
            b.iter(|| {
                for _ in 0..count {
                    heap.alloc(64).expect("alloc failed");
                }
                heap.collect();
                black_box(heap.block_count());
            });
        });
    }
}

fn bench_mark_live_list(c: &mut Criterion) {
    for count in [100usize, 1000, 10_000] {
        c.bench_function(&format!("mark_{count}_node_list"), |b| {
            let mut heap = quiet_heap(32 * 1024 * 1024);

            let mut next = 0usize;
            for _ in 0..count {
                let node = heap.alloc(32).expect("alloc failed");
                unsafe {
                    node.as_ptr().cast::<usize>().write(next);
                }
                next = node.as_ptr() as usize;
            }
            let head = next;
            unsafe {
                heap.add_root_region(
                    std::ptr::addr_of!(head).cast::<u8>(),
                    std::mem::size_of::<usize>(),
                );
            }

            b.iter(|| {
                heap.collect();
                black_box(heap.block_count());
            });
        });
    }
}

fn bench_alloc_throughput(c: &mut Criterion) {
    c.bench_function("alloc_64b_with_recycling", |b| {
        let mut heap = quiet_heap(1024 * 1024);
        b.iter(|| {
            // Unrooted, so exhaustion recycles the arena in-line.
            black_box(heap.alloc(64).expect("alloc failed"));
        });
    });
}

fn bench_lookup(c: &mut Criterion) {
    c.bench_function("find_block_in_1000", |b| {
        let mut heap = quiet_heap(4 * 1024 * 1024);
        let mut addrs = Vec::new();
        for _ in 0..1000 {
            addrs.push(heap.alloc(64).expect("alloc failed").as_ptr());
        }
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % addrs.len();
            black_box(heap.find_block(black_box(addrs[i])));
        });
    });
}

criterion_group!(
    name = collect_cycles;
    config = Criterion::default()
        .sample_size(30)
        .warm_up_time(Duration::from_millis(200))
        .measurement_time(Duration::from_secs(2))
        .noise_threshold(0.05);
    targets =
        bench_sweep_all_garbage,
        bench_mark_live_list,
        bench_alloc_throughput,
        bench_lookup,
);

criterion_main!(collect_cycles);
