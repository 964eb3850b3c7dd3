//! # Position Model Benchmarks
//!
//! Measures the angle to native value conversion, note lookup and sequence
//! construction: everything computed per dispatch before a run starts.
//!
//! Run: `cargo bench --bench position_bench`

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use strike_actuator::SequenceProfile;
use strike_core::{ChannelMapper, MotionConfig, PositionModel, Trigger};

fn bench_native_value(c: &mut Criterion) {
    let mut group = c.benchmark_group("position");

    for (name, scale) in [("duty_16bit", 65_535u32), ("percent", 100), ("sysfs_ns", 20_000_000)] {
        let model = PositionModel::default().with_scale(scale);
        group.bench_with_input(BenchmarkId::new("native_value", name), &model, |b, model| {
            b.iter(|| {
                for angle in [0.0, 45.0, 60.0, 90.0, 180.0] {
                    black_box(model.native_value(black_box(angle)).ok());
                }
            })
        });
    }

    let model = PositionModel::default();
    group.bench_function("pulse_width", |b| {
        b.iter(|| black_box(model.pulse_width(black_box(72.5))))
    });

    group.finish();
}

fn bench_mapper(c: &mut Criterion) {
    let mut group = c.benchmark_group("mapper");

    let mapper = ChannelMapper::diatonic(60, 84, 16).unwrap();
    group.bench_function("resolve_full_range", |b| {
        b.iter(|| {
            let mut mapped = 0;
            for note in 0..=127u8 {
                if mapper.resolve(Trigger::Note(black_box(note))).is_some() {
                    mapped += 1;
                }
            }
            black_box(mapped)
        })
    });

    group.bench_function("build_diatonic", |b| {
        b.iter(|| black_box(ChannelMapper::diatonic(black_box(60), black_box(84), 16)))
    });

    group.finish();
}

fn bench_sequence(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequence");

    let profile =
        SequenceProfile::from_config(&MotionConfig::default(), &PositionModel::default()).unwrap();

    group.bench_function("build_normal", |b| b.iter(|| black_box(profile.build(false))));
    group.bench_function("build_alternate", |b| b.iter(|| black_box(profile.build(true))));
    group.bench_function("reference", |b| b.iter(|| black_box(profile.reference())));

    group.finish();
}

criterion_group!(benches, bench_native_value, bench_mapper, bench_sequence);
criterion_main!(benches);
