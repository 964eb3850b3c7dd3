//! # Dispatch Benchmarks
//!
//! Measures the synchronous admission path: rejections under load, unmapped
//! notes, and a full accept-run-drain cycle with zero holds.
//!
//! Run: `cargo bench --bench dispatch_bench`

use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use strike_actuator::SimulatedSurface;
use strike_core::{AdmissionPolicy, Channel, DispatchRequest, StrikeConfig};
use strike_orchestration::Dispatcher;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_time()
        .build()
        .unwrap()
}

fn make_dispatcher(rt: &Runtime, policy: AdmissionPolicy, hold_ms: u64) -> Dispatcher {
    let mut config = StrikeConfig {
        policy,
        ..Default::default()
    };
    config.motion.hold_ms = hold_ms;
    let _guard = rt.enter();
    Dispatcher::new(&config, Arc::new(SimulatedSurface::new(16))).unwrap()
}

fn bench_rejections(c: &mut Criterion) {
    let mut group = c.benchmark_group("admission");
    let rt = runtime();

    for policy in [
        AdmissionPolicy::GlobalBusy,
        AdmissionPolicy::PermitPool,
        AdmissionPolicy::SingleSlot,
    ] {
        // long holds keep channel 0 busy for the whole measurement
        let dispatcher = make_dispatcher(&rt, policy, 600_000);
        dispatcher.submit(Channel::from(0));
        dispatcher.submit(Channel::from(0));
        dispatcher.events().clear_history();

        group.bench_function(format!("reject_busy/{}", policy), |b| {
            b.iter(|| black_box(dispatcher.submit(black_box(Channel::from(0)))))
        });
    }

    let dispatcher = make_dispatcher(&rt, AdmissionPolicy::PermitPool, 0);
    group.bench_function("reject_unmapped", |b| {
        b.iter(|| black_box(dispatcher.dispatch(DispatchRequest::note(black_box(61), 100))))
    });

    group.finish();
}

fn bench_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("round_trip");
    let rt = runtime();
    let dispatcher = make_dispatcher(&rt, AdmissionPolicy::PermitPool, 0);

    group.bench_function("accept_and_drain", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(dispatcher.submit(Channel::from(3)));
                dispatcher.wait_idle().await;
            })
        })
    });

    group.finish();
}

criterion_group!(benches, bench_rejections, bench_round_trip);
criterion_main!(benches);
