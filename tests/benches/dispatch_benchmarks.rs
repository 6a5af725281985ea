//! # Dispatch Benchmarks
//!
//! Overhead the dispatch path adds on top of the operation itself:
//!
//! | Area | Measured | Expectation |
//! |------|----------|-------------|
//! | Wire codec | DoOperation / DoneOperation frame round trip | < 10µs for 64 KiB |
//! | Dispatcher | submit → assign → finish, no network | < 20µs per operation |
//! | Registry | decode, perform and encode a Ping | < 5µs |

#![allow(clippy::unwrap_used)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use qw_02_notify::CallbackNotifyTarget;
use qw_03_dispatcher::Dispatcher;
use qw_04_dispatch_server::WireCodec;
use qw_runtime::{builtin_registry, Ping};
use shared_types::{
    encode_request, ApplicationId, OperationContext, OperationEnvelope, OperationId, Policy,
    WireMessage,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

// ============================================================================
// WIRE CODEC
// ============================================================================

fn bench_wire_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("wire-codec");
    group.measurement_time(Duration::from_secs(5));

    for size in [64usize, 4 * 1024, 64 * 1024] {
        let request = WireMessage::DoOperation {
            operation_id: OperationId(7),
            envelope: OperationEnvelope::new("bench.blob", vec![0xAB; size]),
        };
        let reply = WireMessage::DoneOperation {
            operation_id: OperationId(7),
            result: Ok(vec![0xCD; size]),
            will_exit: false,
        };

        group.throughput(Throughput::Bytes((size * 2) as u64));
        group.bench_with_input(BenchmarkId::new("frame_round_trip", size), &size, |b, _| {
            let mut codec = WireCodec::new();
            let mut buffer = BytesMut::with_capacity(size * 2 + 64);
            b.iter(|| {
                codec.encode(request.clone(), &mut buffer).unwrap();
                codec.encode(reply.clone(), &mut buffer).unwrap();
                black_box(codec.decode(&mut buffer).unwrap());
                black_box(codec.decode(&mut buffer).unwrap());
            })
        });
    }

    group.finish();
}

// ============================================================================
// DISPATCHER
// ============================================================================

fn bench_dispatch_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatcher");

    for workers in [1usize, 4, 16] {
        let dispatcher = Dispatcher::new(Policy::with_workers(workers)).unwrap();
        let handles: Vec<_> = (0..workers)
            .map(|slot| {
                let handle = dispatcher.worker_authenticated(slot).unwrap();
                dispatcher.worker_ready(handle).unwrap();
                handle
            })
            .collect();
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);
        let target = Arc::new(CallbackNotifyTarget::new(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        }));
        let envelope = encode_request(&Ping {
            payload: "bench".into(),
        })
        .unwrap();

        group.throughput(Throughput::Elements(workers as u64));
        group.bench_with_input(
            BenchmarkId::new("submit_assign_finish", workers),
            &workers,
            |b, _| {
                b.iter(|| {
                    for (app, _) in handles.iter().enumerate() {
                        dispatcher
                            .submit(envelope.clone(), ApplicationId(app as i64), target.clone())
                            .unwrap();
                    }
                    for handle in &handles {
                        let assignment = dispatcher.next_work(*handle).unwrap().unwrap();
                        dispatcher
                            .finished_work(*handle, assignment.operation_id, Ok(Vec::new()), false)
                            .unwrap();
                    }
                })
            },
        );
        black_box(delivered.load(Ordering::Relaxed));
    }

    group.finish();
}

// ============================================================================
// REGISTRY
// ============================================================================

fn bench_registry_perform(c: &mut Criterion) {
    let registry = builtin_registry();
    let envelope = encode_request(&Ping {
        payload: "bench".into(),
    })
    .unwrap();
    let ctx = OperationContext::for_worker(0);

    c.bench_function("registry/perform_ping", |b| {
        b.iter(|| black_box(registry.perform(&envelope, &ctx).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_wire_codec,
    bench_dispatch_cycle,
    bench_registry_perform
);
criterion_main!(benches);
