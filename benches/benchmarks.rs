use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use igsio_recon::{
    CompoundingMode, Components, Extent, Interpolation, Mat4, PasteSliceIntoVolume, SampleBuffer, ScalarKind, Slice,
};
use rand::Rng;

fn make_slice(side: i32) -> Slice {
    let extent = Extent::new(0, side - 1, 0, side - 1, 0, 0);
    let mut buf = SampleBuffer::zeroed(extent, Components::Mono, ScalarKind::U8).unwrap();
    let mut rng = rand::thread_rng();
    for y in 0..side {
        for x in 0..side {
            buf.set(x, y, 0, 0, rng.gen_range(0..255) as f64);
        }
    }
    Slice::new(buf, [1.0, 1.0, 1.0], [0.0, 0.0, 0.0])
}

fn bench_insert_slice(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_slice");

    for side in [64, 256] {
        for (label, interpolation, compounding) in [
            ("nearest_latest", Interpolation::NearestNeighbor, CompoundingMode::Latest),
            ("trilinear_mean", Interpolation::Trilinear, CompoundingMode::Mean),
        ] {
            let id = BenchmarkId::from_parameter(format!("{side}x{side}/{label}"));
            group.bench_with_input(id, &side, |b, &side| {
                let slice = make_slice(side);
                b.iter(|| {
                    let mut orch = PasteSliceIntoVolume::new(
                        Extent::new(0, side - 1, 0, side - 1, 0, 0),
                        [0.0; 3],
                        [1.0; 3],
                        ScalarKind::U8,
                        Components::Mono,
                    );
                    orch.set_interpolation(interpolation);
                    orch.set_compounding(compounding);
                    orch.set_thread_count(1);
                    orch.reset().unwrap();
                    orch.insert_slice(&slice, &Mat4::IDENTITY).unwrap();
                });
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_insert_slice);
criterion_main!(benches);
