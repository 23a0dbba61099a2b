use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dds::Sampler;
use rand::{RngCore, SeedableRng};

fn filled(len: usize, rng: &mut impl RngCore) -> Sampler {
    let mut s = Sampler::new(len);
    for i in 1..=len {
        s.set(i, ((rng.next_u64() >> 40) as f64 + 0.5) * 2f64.powi((rng.next_u64() % 80) as i32 - 40));
    }
    s
}

pub fn sampling(c: &mut Criterion) {
    let mut rng = rand_pcg::Pcg64Mcg::seed_from_u64(2205);
    let mut group = c.benchmark_group("sample");
    for len in [100, 10_000, 1_000_000] {
        let s = filled(len, &mut rng);
        group.bench_with_input(BenchmarkId::from_parameter(len), &s, |b, s| {
            b.iter(|| s.sample(black_box(&mut rng)))
        });
    }
    group.finish();
}

pub fn updating(c: &mut Criterion) {
    let mut rng = rand_pcg::Pcg64Mcg::seed_from_u64(2205);
    let mut s = filled(10_000, &mut rng);

    c.bench_function("set same exponent", |b| b.iter(|| {
        s.set(black_box(777), 1.25)
    }));
    c.bench_function("set alternating exponents", |b| {
        let mut scale = 0;
        b.iter(|| {
            scale = (scale + 1) % 40;
            s.set(black_box(777), 1.25 * 2f64.powi(scale - 20))
        })
    });
    c.bench_function("sample and reweight", |b| b.iter(|| {
        let i = s.sample(&mut rng);
        s.set(i, ((rng.next_u64() >> 40) as f64 + 0.5) * 2f64.powi((rng.next_u64() % 80) as i32 - 40));
    }));
}

criterion_group!(sampler, sampling, updating);
criterion_main!(sampler);
