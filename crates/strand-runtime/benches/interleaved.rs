//! Benchmarks for the interleaved driver loop and the primitives under
//! it, re-targeted from the teacher's thread-spawn/work-stealing
//! benchmarks at a single-threaded event loop's actual cost centers:
//! per-`cancelable` scope overhead, `interleavedx` batch scheduling,
//! and `Channel` rendezvous.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use strand_runtime::{cancelable, channel::Channel, driver, host, interleaved, interleavedx};

fn bench_cancelable_overhead(c: &mut Criterion) {
    let mut group = c.benchmark_group("cancelable_overhead");

    group.bench_function("empty_block", |b| {
        b.iter(|| {
            driver::async_handle(host::TestLoop::new(), || async {
                cancelable(async { Ok::<_, strand_runtime::Exn>(black_box(42)) }).await
            })
            .unwrap()
        })
    });

    group.bench_function("nested_10_deep", |b| {
        b.iter(|| {
            driver::async_handle(host::TestLoop::new(), || async {
                async fn nest(depth: u32) -> strand_runtime::Try<u32> {
                    if depth == 0 {
                        return Ok(0);
                    }
                    cancelable(async move { Ok(1 + nest(depth - 1).await?) }).await
                }
                nest(10).await
            })
            .unwrap()
        })
    });

    group.finish();
}

fn bench_interleaved_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("interleaved_batch");

    for n in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*n as u64));
        group.bench_with_input(BenchmarkId::new("interleavedx", n), n, |b, &n| {
            b.iter(|| {
                driver::async_handle(host::TestLoop::new(), || async move {
                    let strands: Vec<_> = (0..n)
                        .map(|i| {
                            Box::pin(async move { Ok::<_, strand_runtime::Exn>(black_box(i)) })
                                as std::pin::Pin<Box<dyn std::future::Future<Output = _>>>
                        })
                        .collect();
                    interleavedx(strands).await
                })
                .unwrap()
            })
        });

        group.bench_with_input(BenchmarkId::new("interleaved_all_ok", n), n, |b, &n| {
            b.iter(|| {
                driver::async_handle(host::TestLoop::new(), || async move {
                    let strands: Vec<_> = (0..n)
                        .map(|i| {
                            Box::pin(async move { Ok::<_, strand_runtime::Exn>(black_box(i)) })
                                as std::pin::Pin<Box<dyn std::future::Future<Output = _>>>
                        })
                        .collect();
                    interleaved(strands).await
                })
                .unwrap()
            })
        });
    }

    group.finish();
}

fn bench_channel_rendezvous(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel_rendezvous");

    group.bench_function("emit_then_receive", |b| {
        b.iter(|| {
            driver::async_handle(host::TestLoop::new(), || async {
                let ch: Channel<i32> = Channel::new();
                ch.emit(black_box(1));
                ch.receive().await
            })
            .unwrap()
        })
    });

    group.finish();
}

criterion_group!(
    interleaved_benches,
    bench_cancelable_overhead,
    bench_interleaved_batch,
    bench_channel_rendezvous,
);

criterion_main!(interleaved_benches);
