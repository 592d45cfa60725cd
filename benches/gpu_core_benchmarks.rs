use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cinnabar_graphics::backend::null::NullBackend;
use cinnabar_graphics::{
    CommandAllocatorPool, DescriptorHeap, DescriptorKind, DescriptorVisibility, DeviceBackend,
    QueueKind,
};

fn null_backend() -> Arc<dyn DeviceBackend> {
    Arc::new(NullBackend::new())
}

// ---------------------------------------------------------------------------
// Descriptor free-list allocator
// ---------------------------------------------------------------------------

fn bench_descriptor_alloc_free(c: &mut Criterion) {
    let backend = null_backend();
    let heap = DescriptorHeap::new(
        &backend,
        DescriptorKind::Resource,
        DescriptorVisibility::ShaderVisible,
        4096,
    )
    .unwrap();

    c.bench_function("descriptor_alloc_free_single", |b| {
        b.iter(|| {
            let alloc = heap.allocate(black_box(8)).unwrap();
            black_box(alloc.offset());
        });
    });
}

fn bench_descriptor_churn(c: &mut Criterion) {
    let backend = null_backend();
    let heap = DescriptorHeap::new(
        &backend,
        DescriptorKind::Resource,
        DescriptorVisibility::ShaderVisible,
        4096,
    )
    .unwrap();

    c.bench_function("descriptor_churn_interleaved_64", |b| {
        b.iter(|| {
            let mut live = Vec::with_capacity(64);
            for _ in 0..64 {
                live.push(heap.allocate(black_box(4)).unwrap());
            }
            // Free every other allocation first to force merge paths.
            let mut kept = Vec::with_capacity(32);
            for (i, alloc) in live.drain(..).enumerate() {
                if i % 2 == 0 {
                    drop(alloc);
                } else {
                    kept.push(alloc);
                }
            }
            drop(kept);
        });
    });
}

// ---------------------------------------------------------------------------
// Command allocator pool
// ---------------------------------------------------------------------------

fn bench_allocator_pool_reuse(c: &mut Criterion) {
    let backend = null_backend();
    let pool = CommandAllocatorPool::new(Arc::clone(&backend), QueueKind::Graphics);
    let mut fence_value = 0u64;

    c.bench_function("allocator_pool_retrieve_register", |b| {
        b.iter(|| {
            fence_value += 1;
            let allocator = pool.retrieve_allocator(black_box(fence_value)).unwrap();
            let mut list = pool.retrieve_list(&allocator).unwrap();
            backend.close_command_list(&mut list).unwrap();
            pool.register(allocator, list, fence_value).unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_descriptor_alloc_free,
    bench_descriptor_churn,
    bench_allocator_pool_reuse
);
criterion_main!(benches);
